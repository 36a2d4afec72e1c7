use reqwest::blocking::Client;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::method::HttpMethod;
use super::response::{HttpResponse, ResponseBody};
use crate::model::{FailureKind, StepFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// The call did not complete within its timeout.
    Timeout,
    /// Connection refused, DNS failure, TLS handshake failure.
    Connect,
    /// URL or headers rejected before anything was sent.
    InvalidRequest,
    Other,
}

impl NetworkErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call that could not produce an HTTP response at all.
///
/// The message carries the underlying error text verbatim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error calling {url}: {message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub url: String,
    pub message: String,
    pub attempts: u32,
}

impl NetworkError {
    fn new(kind: NetworkErrorKind, url: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.to_string(),
            message: message.into(),
            attempts: 0,
        }
    }

    fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_connect() {
            NetworkErrorKind::Connect
        } else if err.is_builder() {
            NetworkErrorKind::InvalidRequest
        } else {
            NetworkErrorKind::Other
        };
        Self::new(kind, url, error_chain(err))
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == NetworkErrorKind::Connect
    }

    #[must_use]
    pub fn to_failure(&self) -> StepFailure {
        StepFailure::new(FailureKind::NetworkError, self.to_string()).with_details(
            serde_json::json!({
                "kind": self.kind,
                "url": self.url,
                "attempts": self.attempts,
            }),
        )
    }
}

/// Render an error with its source chain; reqwest hides the useful part
/// ("Connection refused") in the sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Extra attempts after a connection failure.
    pub retries: u32,
    /// Fixed sleep between attempts.
    pub retry_backoff: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_backoff: Duration::from_millis(500),
            user_agent: format!("apiprobe/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Blocking HTTP client. One call in flight at a time.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| NetworkError::from_reqwest("", &err))?;
        Ok(Self { client, config })
    }

    /// Perform one HTTP call.
    ///
    /// 4xx and 5xx statuses are returned as ordinary responses. Only failures
    /// to obtain a response are errors; connection failures are retried
    /// `retries` times with a fixed backoff, timeouts never are.
    pub fn send(
        &self,
        method: HttpMethod,
        url: &str,
        json_body: Option<&Value>,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, NetworkError> {
        let parsed = parse_absolute_url(url)?;
        let header_map = build_headers(url, headers)?;
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let mut request = self
                .client
                .request(method.into(), parsed.clone())
                .headers(header_map.clone())
                .timeout(timeout);
            if let Some(body) = json_body {
                request = request.json(body);
            }

            let outcome = request
                .send()
                .and_then(|response| {
                    let status = response.status().as_u16();
                    response.text().map(|text| (status, text))
                })
                .map_err(|err| NetworkError::from_reqwest(url, &err));

            match outcome {
                Ok((status, text)) => {
                    let elapsed_ms = elapsed_ms(&started);
                    debug!(%method, url, status, elapsed_ms, attempts, "http call completed");
                    return Ok(HttpResponse {
                        status,
                        body: ResponseBody::from_text(text),
                        elapsed_ms,
                        attempts,
                    });
                }
                Err(mut err) => {
                    if err.is_retryable() && attempts <= self.config.retries {
                        warn!(%method, url, attempt = attempts, error = %err.message, "retrying after connection failure");
                        thread::sleep(self.config.retry_backoff);
                        continue;
                    }
                    err.attempts = attempts;
                    debug!(%method, url, kind = %err.kind, attempts, "http call failed");
                    return Err(err);
                }
            }
        }
    }
}

fn parse_absolute_url(url: &str) -> Result<reqwest::Url, NetworkError> {
    let parsed = reqwest::Url::parse(url).map_err(|err| {
        NetworkError::new(
            NetworkErrorKind::InvalidRequest,
            url,
            format!("URL must be absolute: {err}"),
        )
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(NetworkError::new(
            NetworkErrorKind::InvalidRequest,
            url,
            format!("unsupported URL scheme `{}`", parsed.scheme()),
        ));
    }
    Ok(parsed)
}

fn build_headers(
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<reqwest::header::HeaderMap, NetworkError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| {
            NetworkError::new(
                NetworkErrorKind::InvalidRequest,
                url,
                format!("invalid header name `{key}`: {err}"),
            )
        })?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            NetworkError::new(
                NetworkErrorKind::InvalidRequest,
                url,
                format!("invalid value for header `{key}`: {err}"),
            )
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

fn elapsed_ms(started: &Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
