//! Session lifecycle state machine
//!
//! All transitions are short synchronous methods called under the
//! connection's state lock, either by event handlers on the reader task or
//! by the facade between requests. Nothing here performs I/O.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::common::{Error, Result};
use crate::dap::{Capabilities, Scope, StackFrame, StoppedEventBody, Variable};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Adapter spawned, initialize not yet acknowledged
    Uninitialized,
    /// Capabilities known; breakpoints may be staged
    Initialized,
    /// Launch configured, program not yet reported running
    Launched,
    /// Program is running
    Running,
    /// Program has stopped (breakpoint, step, exception, pause)
    Paused,
    /// Session is over; absorbing
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Launched => write!(f, "launched"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Execution-resuming request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    Continue,
    StepOver,
    StepIn,
    StepOut,
}

impl ResumeKind {
    /// DAP command implementing this resume
    pub fn command(self) -> &'static str {
        match self {
            ResumeKind::Continue => "continue",
            ResumeKind::StepOver => "next",
            ResumeKind::StepIn => "stepIn",
            ResumeKind::StepOut => "stepOut",
        }
    }

    fn action(self) -> &'static str {
        match self {
            ResumeKind::Continue => "continue",
            ResumeKind::StepOver => "step over",
            ResumeKind::StepIn => "step in",
            ResumeKind::StepOut => "step out",
        }
    }
}

/// A resume request sent but not yet reflected by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingResume {
    pub kind: ResumeKind,
    /// Stop epoch the resume was issued from
    pub epoch: u64,
}

/// Details of the most recent stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopInfo {
    pub reason: String,
    pub thread_id: Option<i64>,
    pub description: Option<String>,
    pub hit_breakpoint_ids: Vec<i64>,
}

/// Published view of the session for waiters
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub adapter_ready: bool,
    pub resume_pending: bool,
    /// Incremented on every stop
    pub stop_epoch: u64,
    pub exit_code: Option<i64>,
}

/// Frames, scopes and variables fetched during the current pause
///
/// Everything here is discarded when execution resumes. The generation
/// lets a request that raced with a resume detect that its result is stale.
#[derive(Debug, Default)]
struct PauseCache {
    generation: u64,
    frames: Option<Vec<StackFrame>>,
    scopes: HashMap<i64, Vec<Scope>>,
    variables: HashMap<i64, Vec<Variable>>,
    references: HashSet<i64>,
}

impl PauseCache {
    fn invalidate(&mut self) {
        self.generation += 1;
        self.frames = None;
        self.scopes.clear();
        self.variables.clear();
        self.references.clear();
    }
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    capabilities: Capabilities,
    adapter_ready: bool,
    current_thread_id: Option<i64>,
    current_frame_id: Option<i64>,
    last_stop: Option<StopInfo>,
    pending_resume: Option<PendingResume>,
    stop_epoch: u64,
    exit_code: Option<i64>,
    terminated_reason: Option<String>,
    program: Option<String>,
    cache: PauseCache,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            capabilities: Capabilities::default(),
            adapter_ready: false,
            current_thread_id: None,
            current_frame_id: None,
            last_stop: None,
            pending_resume: None,
            stop_epoch: 0,
            exit_code: None,
            terminated_reason: None,
            program: None,
            cache: PauseCache::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn adapter_ready(&self) -> bool {
        self.adapter_ready
    }

    pub fn current_thread_id(&self) -> Option<i64> {
        self.current_thread_id
    }

    pub fn current_frame_id(&self) -> Option<i64> {
        self.current_frame_id
    }

    pub fn last_stop(&self) -> Option<&StopInfo> {
        self.last_stop.as_ref()
    }

    pub fn pending_resume(&self) -> Option<PendingResume> {
        self.pending_resume
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    pub fn terminated_reason(&self) -> Option<&str> {
        self.terminated_reason.as_deref()
    }

    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            adapter_ready: self.adapter_ready,
            resume_pending: self.pending_resume.is_some(),
            stop_epoch: self.stop_epoch,
            exit_code: self.exit_code,
        }
    }

    /// Check that the session is in one of `allowed`
    pub fn require(&self, action: &str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        if self.is_terminated() {
            return Err(Error::SessionTerminated(
                self.terminated_reason
                    .clone()
                    .unwrap_or_else(|| "session is terminated".to_string()),
            ));
        }

        let required = allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ");
        Err(Error::invalid_state(action, self.state, &required))
    }

    // === Transitions ===

    /// Uninitialized -> Initialized once the initialize response arrives
    pub fn mark_initialized(&mut self, capabilities: Capabilities) -> Result<()> {
        self.require("initialize", &[SessionState::Uninitialized])?;
        self.capabilities = capabilities;
        self.state = SessionState::Initialized;
        tracing::info!("Session initialized");
        Ok(())
    }

    /// The adapter sent `initialized` and accepts configuration requests
    pub fn set_adapter_ready(&mut self) {
        if !self.is_terminated() {
            self.adapter_ready = true;
        }
    }

    pub fn set_program(&mut self, program: &str) {
        self.program = Some(program.to_string());
    }

    /// Initialized -> Launched after configuration is done
    ///
    /// Events may already have moved the session further (an entry stop can
    /// arrive before the launch sequence finishes, a short program may have
    /// already exited); that is not an error.
    pub fn mark_launched(&mut self) -> Result<()> {
        match self.state {
            SessionState::Initialized => {
                self.state = SessionState::Launched;
                tracing::info!("Program launched");
                Ok(())
            }
            SessionState::Uninitialized => {
                self.require("finish launch", &[SessionState::Initialized])
            }
            _ => Ok(()),
        }
    }

    /// Launched -> Running when the adapter reports the process
    pub fn on_process_started(&mut self) {
        if self.state == SessionState::Launched {
            self.state = SessionState::Running;
            tracing::debug!("Debuggee process started");
        }
    }

    /// Apply a `stopped` event; returns whether it was accepted
    pub fn on_stopped(&mut self, body: &StoppedEventBody) -> bool {
        let accepted = match self.state {
            SessionState::Launched | SessionState::Running | SessionState::Paused => true,
            SessionState::Initialized => self.adapter_ready,
            SessionState::Uninitialized | SessionState::Terminated => false,
        };
        if !accepted {
            tracing::warn!(state = %self.state, reason = %body.reason, "Ignoring stopped event");
            return false;
        }

        self.state = SessionState::Paused;
        if body.thread_id.is_some() {
            self.current_thread_id = body.thread_id;
        }
        self.current_frame_id = None;
        self.pending_resume = None;
        self.stop_epoch += 1;
        self.last_stop = Some(StopInfo {
            reason: body.reason.clone(),
            thread_id: body.thread_id,
            description: body.description.clone(),
            hit_breakpoint_ids: body.hit_breakpoint_ids.clone(),
        });
        self.cache.invalidate();
        tracing::info!(reason = %body.reason, thread = ?body.thread_id, "Program stopped");
        true
    }

    /// Apply a `continued` event
    pub fn on_continued(&mut self) {
        match self.state {
            SessionState::Paused | SessionState::Launched => {
                self.state = SessionState::Running;
                self.pending_resume = None;
                self.current_frame_id = None;
                self.cache.invalidate();
                tracing::debug!("Program continued");
            }
            _ => {}
        }
    }

    /// Record a resume request about to be sent
    ///
    /// State stays Paused until the adapter's event says otherwise. Only one
    /// resume may be outstanding at a time.
    pub fn begin_resume(&mut self, kind: ResumeKind) -> Result<u64> {
        self.require(kind.action(), &[SessionState::Paused])?;
        if self.pending_resume.is_some() {
            return Err(Error::invalid_state(
                kind.action(),
                "paused (resume pending)",
                "paused",
            ));
        }
        self.pending_resume = Some(PendingResume {
            kind,
            epoch: self.stop_epoch,
        });
        Ok(self.stop_epoch)
    }

    /// Undo `begin_resume` after the request failed
    pub fn cancel_resume(&mut self, epoch: u64) {
        if matches!(self.pending_resume, Some(p) if p.epoch == epoch) {
            self.pending_resume = None;
        }
    }

    /// Any state -> Terminated; returns false if already terminated
    pub fn terminate(&mut self, reason: &str) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.state = SessionState::Terminated;
        self.terminated_reason = Some(reason.to_string());
        self.adapter_ready = false;
        self.pending_resume = None;
        self.current_frame_id = None;
        self.cache.invalidate();
        tracing::info!(reason, "Session terminated");
        true
    }

    pub fn set_exit_code(&mut self, code: Option<i64>) {
        if code.is_some() {
            self.exit_code = code;
        }
    }

    /// Use a thread discovered through a `threads` request
    pub fn adopt_thread(&mut self, thread_id: i64) {
        if self.current_thread_id.is_none() {
            self.current_thread_id = Some(thread_id);
        }
    }

    /// Make a frame of the current stop the active one
    pub fn select_frame(&mut self, frame_id: i64) -> Result<()> {
        self.require("select a frame", &[SessionState::Paused])?;
        if !self.knows_frame(frame_id) {
            return Err(Error::FrameNotFound(frame_id));
        }
        self.current_frame_id = Some(frame_id);
        Ok(())
    }

    // === Pause-scoped cache ===

    pub fn cache_generation(&self) -> u64 {
        self.cache.generation
    }

    pub fn cached_frames(&self) -> Option<Vec<StackFrame>> {
        self.cache.frames.clone()
    }

    /// Store frames fetched at `generation`; the top frame becomes current
    /// if none is selected yet
    pub fn store_frames(&mut self, generation: u64, frames: Vec<StackFrame>) -> bool {
        if generation != self.cache.generation {
            return false;
        }
        if self.current_frame_id.is_none() {
            self.current_frame_id = frames.first().map(|f| f.id);
        }
        self.cache.frames = Some(frames);
        true
    }

    pub fn knows_frame(&self, frame_id: i64) -> bool {
        self.cache
            .frames
            .as_ref()
            .is_some_and(|frames| frames.iter().any(|f| f.id == frame_id))
    }

    pub fn frame(&self, frame_id: i64) -> Option<&StackFrame> {
        self.cache
            .frames
            .as_ref()
            .and_then(|frames| frames.iter().find(|f| f.id == frame_id))
    }

    pub fn cached_scopes(&self, frame_id: i64) -> Option<Vec<Scope>> {
        self.cache.scopes.get(&frame_id).cloned()
    }

    pub fn store_scopes(&mut self, generation: u64, frame_id: i64, scopes: Vec<Scope>) -> bool {
        if generation != self.cache.generation {
            return false;
        }
        for scope in &scopes {
            self.cache.references.insert(scope.variables_reference);
        }
        self.cache.scopes.insert(frame_id, scopes);
        true
    }

    pub fn cached_variables(&self, reference: i64) -> Option<Vec<Variable>> {
        self.cache.variables.get(&reference).cloned()
    }

    pub fn store_variables(&mut self, generation: u64, reference: i64, variables: Vec<Variable>) -> bool {
        if generation != self.cache.generation {
            return false;
        }
        for var in &variables {
            if var.variables_reference > 0 {
                self.cache.references.insert(var.variables_reference);
            }
        }
        self.cache.variables.insert(reference, variables);
        true
    }

    /// Remember a structured value reference handed out by `evaluate`
    pub fn note_reference(&mut self, generation: u64, reference: i64) {
        if generation == self.cache.generation && reference > 0 {
            self.cache.references.insert(reference);
        }
    }

    pub fn knows_reference(&self, reference: i64) -> bool {
        self.cache.references.contains(&reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped(thread: i64) -> StoppedEventBody {
        StoppedEventBody {
            reason: "breakpoint".into(),
            description: None,
            thread_id: Some(thread),
            all_threads_stopped: true,
            hit_breakpoint_ids: vec![],
            text: None,
        }
    }

    fn frame(id: i64, line: u32) -> StackFrame {
        StackFrame {
            id,
            name: "<module>".into(),
            source: None,
            line,
            column: 1,
        }
    }

    fn paused_session() -> Session {
        let mut s = Session::new();
        s.mark_initialized(Capabilities::default()).unwrap();
        s.set_adapter_ready();
        s.mark_launched().unwrap();
        assert!(s.on_stopped(&stopped(1)));
        s
    }

    #[test]
    fn test_lifecycle() {
        let mut s = Session::new();
        assert_eq!(s.state(), SessionState::Uninitialized);
        s.mark_initialized(Capabilities::default()).unwrap();
        assert_eq!(s.state(), SessionState::Initialized);
        s.mark_launched().unwrap();
        assert_eq!(s.state(), SessionState::Launched);
        s.on_process_started();
        assert_eq!(s.state(), SessionState::Running);
        s.on_stopped(&stopped(3));
        assert_eq!(s.state(), SessionState::Paused);
        assert_eq!(s.current_thread_id(), Some(3));
        s.on_continued();
        assert_eq!(s.state(), SessionState::Running);
        assert!(s.terminate("done"));
        assert!(!s.terminate("again"));
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn test_require_reports_both_states() {
        let s = Session::new();
        match s.require("step over", &[SessionState::Paused]) {
            Err(Error::InvalidState { current, required, .. }) => {
                assert_eq!(current, "uninitialized");
                assert_eq!(required, "paused");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let mut s = paused_session();
        s.terminate("adapter exited");
        s.on_stopped(&stopped(1));
        s.on_continued();
        s.on_process_started();
        s.set_adapter_ready();
        assert_eq!(s.state(), SessionState::Terminated);
        assert!(!s.adapter_ready());
        assert!(matches!(
            s.require("evaluate", &[SessionState::Paused]),
            Err(Error::SessionTerminated(_))
        ));
    }

    #[test]
    fn test_stop_before_launch_finishes() {
        let mut s = Session::new();
        s.mark_initialized(Capabilities::default()).unwrap();
        // not ready yet: a stray stop is ignored
        assert!(!s.on_stopped(&stopped(1)));
        s.set_adapter_ready();
        assert!(s.on_stopped(&stopped(1)));
        s.mark_launched().unwrap();
        assert_eq!(s.state(), SessionState::Paused);
    }

    #[test]
    fn test_resume_marker() {
        let mut s = paused_session();
        let epoch = s.begin_resume(ResumeKind::StepOver).unwrap();
        assert!(s.snapshot().resume_pending);
        assert_eq!(s.state(), SessionState::Paused);
        assert!(matches!(
            s.begin_resume(ResumeKind::Continue),
            Err(Error::InvalidState { .. })
        ));

        s.cancel_resume(epoch);
        assert!(s.pending_resume().is_none());

        s.begin_resume(ResumeKind::Continue).unwrap();
        s.on_stopped(&stopped(1));
        assert!(s.pending_resume().is_none());
        assert_eq!(s.snapshot().stop_epoch, epoch + 1);
    }

    #[test]
    fn test_cache_survives_ack_and_clears_on_event() {
        let mut s = paused_session();
        let generation = s.cache_generation();
        assert!(s.store_frames(generation, vec![frame(10, 5), frame(11, 20)]));
        assert_eq!(s.current_frame_id(), Some(10));

        s.begin_resume(ResumeKind::Continue).unwrap();
        assert_eq!(s.cached_frames().map(|f| f.len()), Some(2));

        s.on_continued();
        assert!(s.cached_frames().is_none());
        assert!(s.current_frame_id().is_none());
        // a response for a request issued before the resume is discarded
        assert!(!s.store_frames(generation, vec![frame(10, 5)]));
    }

    #[test]
    fn test_select_frame() {
        let mut s = paused_session();
        let generation = s.cache_generation();
        s.store_frames(generation, vec![frame(10, 5), frame(11, 20)]);
        s.select_frame(11).unwrap();
        assert_eq!(s.current_frame_id(), Some(11));
        assert!(matches!(s.select_frame(99), Err(Error::FrameNotFound(99))));
    }

    #[test]
    fn test_references_are_pause_scoped() {
        let mut s = paused_session();
        let generation = s.cache_generation();
        s.store_scopes(
            generation,
            10,
            vec![Scope {
                name: "Locals".into(),
                variables_reference: 7,
                expensive: false,
            }],
        );
        assert!(s.knows_reference(7));
        s.on_stopped(&stopped(1));
        assert!(!s.knows_reference(7));
    }
}
