//! Bearer tokens per actor.
//!
//! Each actor logs in through its own login step; its token is then injected
//! into every request that names the actor. Tokens are never shared across
//! actors, and a repeated login replaces the stored token.

use crate::http::{HttpClient, HttpMethod, HttpResponse, NetworkError};
use crate::model::{Actor, FailureKind, StepFailure};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Login request body: `{"phone": .., "password": ..}`.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub phone: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("phone", &self.phone)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("actor '{actor}' has neither `password` nor `password_env`")]
    Missing { actor: String },
    #[error("environment variable `{var}` for actor '{actor}' is not set")]
    EnvUnset { actor: String, var: String },
}

impl Actor {
    /// Resolve the actor's login credentials. An inline password wins over
    /// `password_env`.
    pub fn credentials(&self) -> Result<Credentials, CredentialsError> {
        let password = match (&self.password, &self.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(var)) => {
                std::env::var(var).map_err(|_| CredentialsError::EnvUnset {
                    actor: self.name.clone(),
                    var: var.clone(),
                })?
            }
            (None, None) => {
                return Err(CredentialsError::Missing {
                    actor: self.name.clone(),
                })
            }
        };
        Ok(Credentials {
            phone: self.phone.clone(),
            password,
        })
    }
}

/// A request referenced an actor that has no token.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("actor '{actor}' has no bearer token; add a login step for it first")]
pub struct AuthNotReady {
    pub actor: String,
}

impl AuthNotReady {
    #[must_use]
    pub fn to_failure(&self) -> StepFailure {
        StepFailure::new(FailureKind::AuthNotReady, self.to_string())
    }
}

/// Authenticated state of one actor.
#[derive(Clone, PartialEq, Eq)]
pub struct ActorSession {
    pub token: String,
    /// `user.id`, falling back to `user.user_number`.
    pub user_id: Option<String>,
    /// `user.role` as reported by the login response.
    pub role: Option<String>,
}

impl fmt::Debug for ActorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSession")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .finish()
    }
}

impl ActorSession {
    /// Extract a session from a login response body. `None` when the body has
    /// no non-empty `access_token`.
    #[must_use]
    pub fn from_login_body(body: &Value) -> Option<Self> {
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())?;
        let user = body.get("user");
        let user_id = user
            .and_then(|user| user.get("id").or_else(|| user.get("user_number")))
            .and_then(scalar_to_string);
        let role = user
            .and_then(|user| user.get("role"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            token: token.to_string(),
            user_id,
            role,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct SessionContext {
    sessions: HashMap<String, ActorSession>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log an actor in and report whether a token was obtained.
    pub fn login(
        &mut self,
        client: &HttpClient,
        actor: &str,
        login_url: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<bool, NetworkError> {
        self.login_exchange(client, actor, login_url, credentials, timeout)
            .map(|(authenticated, _)| authenticated)
    }

    /// Log an actor in and also return the raw response for assertions.
    ///
    /// Any token stored earlier for the actor is dropped before the request is
    /// sent. A login that fails, or yields no token, leaves the actor without a
    /// session and later requests fail with [`AuthNotReady`].
    pub fn login_exchange(
        &mut self,
        client: &HttpClient,
        actor: &str,
        login_url: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<(bool, HttpResponse), NetworkError> {
        let body = serde_json::json!({
            "phone": credentials.phone,
            "password": credentials.password,
        });
        let headers = json_headers();
        self.logout(actor);
        let response = client.send(HttpMethod::Post, login_url, Some(&body), &headers, timeout)?;

        let session = if response.is_success() {
            ActorSession::from_login_body(&response.body.as_value())
        } else {
            None
        };
        let authenticated = session.is_some();
        match session {
            Some(session) => {
                info!(actor, role = ?session.role, "actor authenticated");
                self.sessions.insert(actor.to_string(), session);
            }
            None => {
                debug!(actor, status = response.status, "login returned no access_token");
            }
        }
        Ok((authenticated, response))
    }

    /// Headers for a request made as `actor`.
    pub fn headers_for(&self, actor: &str) -> Result<BTreeMap<String, String>, AuthNotReady> {
        let session = self.sessions.get(actor).ok_or_else(|| AuthNotReady {
            actor: actor.to_string(),
        })?;
        let mut headers = json_headers();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", session.token),
        );
        Ok(headers)
    }

    #[must_use]
    pub fn session(&self, actor: &str) -> Option<&ActorSession> {
        self.sessions.get(actor)
    }

    /// Drop the actor's session, if any.
    pub fn logout(&mut self, actor: &str) {
        if self.sessions.remove(actor).is_some() {
            debug!(actor, "session cleared");
        }
    }
}

/// Headers for unauthenticated JSON requests.
#[must_use]
pub fn json_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers
}
