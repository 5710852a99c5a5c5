//! Session-wide state owned behind the connection lock
//!
//! [`SessionCore`] groups everything the reader task and the facade mutate:
//! the in-flight request table, the lifecycle state machine, the breakpoint
//! registry and the output log.

pub mod breakpoints;
pub mod handlers;
pub mod output;
pub mod state;

pub use breakpoints::{BreakpointEntry, BreakpointRegistry, Submission};
pub use output::{OutputCategory, OutputLog, OutputRecord};
pub use state::{PendingResume, ResumeKind, Session, SessionSnapshot, SessionState, StopInfo};

use crate::common::config::OutputConfig;
use crate::dap::client::ConnectionState;
use crate::dap::correlator::PendingTable;

#[derive(Debug)]
pub struct SessionCore {
    pub pending: PendingTable,
    pub session: Session,
    pub breakpoints: BreakpointRegistry,
    pub output: OutputLog,
}

impl SessionCore {
    pub fn new(limits: &OutputConfig) -> Self {
        Self {
            pending: PendingTable::new(),
            session: Session::new(),
            breakpoints: BreakpointRegistry::new(),
            output: OutputLog::new(limits.max_events, limits.max_bytes_mb.saturating_mul(1024 * 1024)),
        }
    }

    /// Move to Terminated and fail everything still waiting
    ///
    /// Desired breakpoints survive; their adapter-side status does not.
    /// Buffered output is kept so it can still be read after the program
    /// exits; it is dropped with the session.
    pub fn terminate(&mut self, reason: &str) -> bool {
        let first = self.session.terminate(reason);
        let failed = self.pending.fail_all(reason);
        if failed > 0 {
            tracing::debug!(failed, "Failed pending requests at termination");
        }
        if first {
            self.breakpoints.reset_verification();
        }
        first
    }
}

impl ConnectionState for SessionCore {
    type Snapshot = SessionSnapshot;

    fn pending(&mut self) -> &mut PendingTable {
        &mut self.pending
    }

    fn closed_reason(&self) -> Option<String> {
        if self.session.is_terminated() {
            Some(
                self.session
                    .terminated_reason()
                    .unwrap_or("session is terminated")
                    .to_string(),
            )
        } else {
            None
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        self.terminate(reason);
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }
}
