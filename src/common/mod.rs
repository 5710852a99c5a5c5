//! Ambient utilities shared by the bridge, the CLI and the scenario runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorReport, Result};
