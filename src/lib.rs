//! dap-bridge - a Debug Adapter Protocol bridge
//!
//! Speaks DAP to a debug adapter process: frames and correlates requests,
//! turns adapter events into session state, keeps breakpoints in sync and
//! exposes the whole thing through [`facade::Debugger`].

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod facade;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use facade::{Debugger, StopOutcome};
pub use session::SessionState;
