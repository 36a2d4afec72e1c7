pub mod ids;
pub mod policy;
pub mod run;
pub mod scenario;

pub use ids::{RunId, StepId};
pub use policy::*;
pub use run::*;
pub use scenario::*;

/// Maximum length for user-supplied regex patterns to prevent `ReDoS` attacks.
pub const MAX_REGEX_PATTERN_LEN: usize = 1000;

/// Environment variable consulted for the target base URL.
pub const BASE_URL_ENV: &str = "APIPROBE_BASE_URL";
