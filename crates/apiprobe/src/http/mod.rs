//! Outbound HTTP: one blocking call with a bounded timeout, uniform error
//! normalization, and timing.

pub mod client;
pub mod method;
pub mod response;

pub use client::{ClientConfig, HttpClient, NetworkError, NetworkErrorKind};
pub use method::HttpMethod;
pub use response::{HttpResponse, ResponseBody};

/// Join a base URL and a step path.
///
/// Paths that are already absolute URLs are returned unchanged so a step can
/// reach a different host when it needs to.
#[must_use]
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{base}/{path}")
}
