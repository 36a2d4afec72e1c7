//! Fluent builders for scenarios, steps, and actors used in tests.
//!
//! ```ignore
//! let scenario = ScenarioBuilder::new("placed-cargo")
//!     .with_actor(actor("operator", "+79777888999", "warehouse123"))
//!     .add_step(StepBuilder::login("operator login", "operator").build())
//!     .add_step(
//!         StepBuilder::get("placed cargo", "/api/warehouses/placed-cargo?page=1&per_page=25")
//!             .as_actor("operator")
//!             .assert(field_equals("items[0].status", "placement_ready"))
//!             .build(),
//!     )
//!     .build();
//! ```

use apiprobe::http::HttpMethod;
use apiprobe::model::{
    Action, Actor, Assertion, PolicyRef, RunConfig, RunPolicy, Scenario, ScenarioMetadata, Step,
    StepId,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Actor with an inline password and no role expectation.
#[must_use]
pub fn actor(name: &str, phone: &str, password: &str) -> Actor {
    Actor {
        name: name.to_string(),
        phone: phone.to_string(),
        password: Some(password.to_string()),
        password_env: None,
        role_label: None,
    }
}

#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: String,
    action: Action,
    expect_status: Option<u16>,
    assertions: Vec<Assertion>,
    capture: BTreeMap<String, String>,
}

impl StepBuilder {
    fn with_action(name: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            action,
            expect_status: None,
            assertions: Vec::new(),
            capture: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn login(name: &str, actor: &str) -> Self {
        Self::with_action(
            name,
            Action::Login {
                actor: actor.to_string(),
                path: None,
            },
        )
    }

    /// Login step posting to `path` instead of the policy's login path.
    #[must_use]
    pub fn login_at(name: &str, actor: &str, path: &str) -> Self {
        Self::with_action(
            name,
            Action::Login {
                actor: actor.to_string(),
                path: Some(path.to_string()),
            },
        )
    }

    #[must_use]
    pub fn request(name: &str, method: HttpMethod, path: &str) -> Self {
        Self::with_action(
            name,
            Action::Request {
                method,
                path: path.to_string(),
                body: None,
                actor: None,
            },
        )
    }

    #[must_use]
    pub fn get(name: &str, path: &str) -> Self {
        Self::request(name, HttpMethod::Get, path)
    }

    #[must_use]
    pub fn post(name: &str, path: &str, body: Value) -> Self {
        Self::request(name, HttpMethod::Post, path).with_body(body)
    }

    /// Send the request as `actor` (no effect on login steps).
    #[must_use]
    pub fn as_actor(mut self, name: &str) -> Self {
        if let Action::Request { actor, .. } = &mut self.action {
            *actor = Some(name.to_string());
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, value: Value) -> Self {
        if let Action::Request { body, .. } = &mut self.action {
            *body = Some(value);
        }
        self
    }

    #[must_use]
    pub fn expect_status(mut self, status: u16) -> Self {
        self.expect_status = Some(status);
        self
    }

    #[must_use]
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    #[must_use]
    pub fn capture(mut self, key: &str, path: &str) -> Self {
        self.capture.insert(key.to_string(), path.to_string());
        self
    }

    #[must_use]
    pub fn build(self) -> Step {
        Step {
            id: StepId::new(),
            name: self.name,
            action: self.action,
            expect_status: self.expect_status,
            assert: self.assertions,
            capture: self.capture,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    base_url: Option<String>,
    policy: RunPolicy,
    actors: Vec<Actor>,
    steps: Vec<Step>,
}

impl ScenarioBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: None,
            policy: RunPolicy::default(),
            actors: Vec::new(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn continue_on_failure(mut self) -> Self {
        self.policy = self.policy.continue_on_failure();
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actors.push(actor);
        self
    }

    #[must_use]
    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn build(self) -> Scenario {
        Scenario {
            scenario_version: 1,
            metadata: ScenarioMetadata {
                name: self.name,
                description: None,
            },
            run: RunConfig {
                base_url: self.base_url,
                policy: PolicyRef::Inline(self.policy),
            },
            actors: self.actors,
            steps: self.steps,
        }
    }
}
