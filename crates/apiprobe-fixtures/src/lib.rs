//! Test utilities for apiprobe integration tests.
//!
//! - [`MockBackend`] - in-process REST backend with canned routes
//! - [`ScenarioBuilder`] / [`StepBuilder`] - fluent scenario construction
//! - [`temp_dir`] / [`write_scenario`] - files for CLI and loader tests

// Test fixtures crate - relaxed lints for test utilities
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]
#![allow(missing_docs)]

pub mod builders;
pub mod helpers;
pub mod mock;

pub use builders::{actor, ScenarioBuilder, StepBuilder};
pub use helpers::{temp_dir, write_scenario, write_scenario_text};
pub use mock::{MockBackend, MockResponse, RecordedRequest};
