use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Response body, parsed as JSON when possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "content", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Parse a raw body. Empty or non-JSON bodies are kept as text.
    #[must_use]
    pub fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            return Self::Text(text);
        }
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }

    /// View of the body that assertions and captures run against.
    /// Text bodies are exposed as a JSON string.
    #[must_use]
    pub fn as_value(&self) -> Cow<'_, Value> {
        match self {
            Self::Json(value) => Cow::Borrowed(value),
            Self::Text(text) => Cow::Owned(Value::String(text.clone())),
        }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: ResponseBody,
    pub elapsed_ms: u64,
    /// Attempts made, including retries of connection failures.
    pub attempts: u32,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
