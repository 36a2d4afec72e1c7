use crate::http::HttpMethod;
use crate::model::policy::RunPolicy;
use crate::model::StepId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_scenario_version")]
    pub scenario_version: u32,
    pub metadata: ScenarioMetadata,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub actors: Vec<Actor>,
    pub steps: Vec<Step>,
}

fn default_scenario_version() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Target base URL. The CLI flag and `APIPROBE_BASE_URL` take precedence.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub policy: PolicyRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyRef {
    File { path: String },
    Inline(RunPolicy),
}

impl Default for PolicyRef {
    fn default() -> Self {
        Self::Inline(RunPolicy::default())
    }
}

/// A logical user of the system under test.
///
/// The password is either inline or read from the environment variable named
/// by `password_env` when the login step runs.
#[derive(Clone, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Role the login response is expected to report (`user.role`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_label: Option<String>,
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("phone", &self.phone)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("role_label", &self.role_label)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: StepId,
    pub name: String,
    pub action: Action,
    /// Expected HTTP status. When absent any 2xx status passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,
    #[serde(default)]
    pub assert: Vec<Assertion>,
    /// Context key -> response path. Captured values are visible to later steps.
    #[serde(default)]
    pub capture: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Authenticate an actor and store its bearer token.
    Login {
        actor: String,
        /// Overrides the policy's `login_path`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Perform one HTTP request, optionally as an authenticated actor.
    Request {
        method: HttpMethod,
        /// Path (joined to the base URL) or absolute URL; may hold `{{key}}`
        /// placeholders.
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },
}

impl Action {
    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::Login { actor, .. } => Some(actor),
            Self::Request { actor, .. } => actor.as_deref(),
        }
    }
}

/// Declarative check against a parsed response body.
///
/// Paths use dotted keys and bracket indices, e.g. `items[0].cargo_number`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assertion {
    FieldPresent {
        path: String,
    },
    FieldAbsent {
        path: String,
    },
    FieldEquals {
        path: String,
        expected: Value,
    },
    FieldInSet {
        path: String,
        allowed: Vec<Value>,
    },
    FieldMatches {
        path: String,
        pattern: String,
    },
    ListLength {
        path: String,
        predicate: LengthPredicate,
    },
    NoDuplicateValues {
        path: String,
        /// Compare `element.<key>` instead of whole elements.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

impl Assertion {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FieldPresent { .. } => "field_present",
            Self::FieldAbsent { .. } => "field_absent",
            Self::FieldEquals { .. } => "field_equals",
            Self::FieldInSet { .. } => "field_in_set",
            Self::FieldMatches { .. } => "field_matches",
            Self::ListLength { .. } => "list_length",
            Self::NoDuplicateValues { .. } => "no_duplicate_values",
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::FieldPresent { path }
            | Self::FieldAbsent { path }
            | Self::FieldEquals { path, .. }
            | Self::FieldInSet { path, .. }
            | Self::FieldMatches { path, .. }
            | Self::ListLength { path, .. }
            | Self::NoDuplicateValues { path, .. } => path,
        }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldEquals { path, expected } => {
                write!(f, "{}({path}, {expected})", self.kind())
            }
            Self::ListLength { path, predicate } => {
                write!(f, "{}({path}, {predicate})", self.kind())
            }
            Self::FieldMatches { path, pattern } => {
                write!(f, "{}({path}, /{pattern}/)", self.kind())
            }
            Self::NoDuplicateValues {
                path,
                key: Some(key),
            } => write!(f, "{}({path}[*].{key})", self.kind()),
            _ => write!(f, "{}({})", self.kind(), self.path()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl CompareOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// Length constraint written as `">= 1"`, `"== 5"`, or a bare `"3"` (equality).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LengthPredicate {
    pub op: CompareOp,
    pub value: usize,
}

impl LengthPredicate {
    #[must_use]
    pub fn new(op: CompareOp, value: usize) -> Self {
        Self { op, value }
    }

    #[must_use]
    pub fn matches(&self, len: usize) -> bool {
        match self.op {
            CompareOp::Eq => len == self.value,
            CompareOp::Ne => len != self.value,
            CompareOp::Gt => len > self.value,
            CompareOp::Ge => len >= self.value,
            CompareOp::Lt => len < self.value,
            CompareOp::Le => len <= self.value,
        }
    }
}

impl fmt::Display for LengthPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.value)
    }
}

impl FromStr for LengthPredicate {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        // Two-character operators must be tried before their one-character prefixes.
        let operators = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
        ];
        let (op, rest) = operators
            .iter()
            .find_map(|(symbol, op)| trimmed.strip_prefix(symbol).map(|rest| (*op, rest)))
            .unwrap_or((CompareOp::Eq, trimmed));
        let value = rest
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid length predicate `{raw}`"))?;
        Ok(Self { op, value })
    }
}

impl TryFrom<String> for LengthPredicate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LengthPredicate> for String {
    fn from(value: LengthPredicate) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_predicate_parses_operators() {
        let ge: LengthPredicate = ">= 1".parse().unwrap();
        assert_eq!(ge, LengthPredicate::new(CompareOp::Ge, 1));
        let eq: LengthPredicate = "5".parse().unwrap();
        assert_eq!(eq, LengthPredicate::new(CompareOp::Eq, 5));
        let lt: LengthPredicate = "<10".parse().unwrap();
        assert_eq!(lt, LengthPredicate::new(CompareOp::Lt, 10));
        assert!(">= many".parse::<LengthPredicate>().is_err());
    }

    #[test]
    fn policy_ref_prefers_file_reference() {
        let file: PolicyRef = serde_json::from_value(serde_json::json!({"path": "p.json"})).unwrap();
        assert!(matches!(file, PolicyRef::File { .. }));
        let inline: PolicyRef =
            serde_json::from_value(serde_json::json!({"abort": "continue"})).unwrap();
        assert!(matches!(inline, PolicyRef::Inline(p) if !p.stops_on_failure()));
    }

    #[test]
    fn actor_debug_redacts_password() {
        let actor = Actor {
            name: "admin".to_string(),
            phone: "+79999888777".to_string(),
            password: Some("secret".to_string()),
            password_env: None,
            role_label: None,
        };
        let rendered = format!("{actor:?}");
        assert!(!rendered.contains("secret"));
    }
}
