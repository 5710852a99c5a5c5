//! Scenario test runner
//!
//! Reads YAML test scenarios and drives the [`crate::facade::Debugger`]
//! directly, so assertions are made against structured data rather than
//! fragile string matching.

mod config;
mod runner;

pub use config::*;
pub use runner::{run_scenario, TestResult};
