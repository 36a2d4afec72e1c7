//! apiprobe: a scenario-driven harness for probing REST APIs.
//!
//! A scenario declares actors (logical users with credentials) and an ordered
//! list of steps. Each step performs one HTTP call, checks the response with
//! declarative assertions, and may capture values for later steps. The runner
//! executes steps strictly in order and produces a [`ScenarioReport`] that can
//! be rendered as JSON or as a text table.

#![forbid(unsafe_code)]
// Public API types have docs; internal helpers are documented where useful.
#![allow(missing_docs)]

pub mod artifacts;
pub mod assertions;
pub mod http;
pub mod model;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod session;

pub use crate::model::*;
