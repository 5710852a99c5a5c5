//! Debug Adapter Protocol (DAP) implementation
//!
//! Wire codec, request correlation, event dispatch and the adapter
//! connection that ties them together. Session semantics live in
//! [`crate::session`].

pub mod client;
pub mod codec;
pub mod correlator;
pub mod events;
pub mod types;

pub use client::{ConnectionState, DapClient, ResponseHandle};
pub use types::*;
