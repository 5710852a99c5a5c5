//! Command facade
//!
//! [`Debugger`] is the only surface the outward command layer talks to. Each
//! operation checks the session state, issues one or more DAP requests and
//! projects the answers into plain values. Every method takes `&self`, so
//! independent operations can be in flight at the same time.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::common::config::Config;
use crate::common::paths::resolve_source;
use crate::common::{Error, Result};
use crate::dap::client::parse_body;
use crate::dap::events::EventDispatcher;
use crate::dap::{
    Capabilities, DapClient, DisconnectArguments, EvaluateArguments, EvaluateResponseBody,
    InitializeArguments, LaunchArguments, Scope, ScopesArguments, ScopesResponseBody,
    SetBreakpointsResponseBody, StackFrame, StackTraceArguments, StackTraceResponseBody, Thread,
    ThreadArguments, ThreadsResponseBody, Variable, VariablesArguments, VariablesResponseBody,
};
use crate::session::{
    handlers, BreakpointEntry, OutputRecord, PendingResume, ResumeKind, SessionCore,
    SessionSnapshot, SessionState, StopInfo,
};

/// States in which the session still talks to an adapter
const LIVE: &[SessionState] = &[
    SessionState::Uninitialized,
    SessionState::Initialized,
    SessionState::Launched,
    SessionState::Running,
    SessionState::Paused,
];

const EXECUTING: &[SessionState] = &[
    SessionState::Launched,
    SessionState::Running,
    SessionState::Paused,
];

const PAUSED: &[SessionState] = &[SessionState::Paused];

/// Frames requested per stack trace
const MAX_FRAMES: i64 = 100;

/// Upper bound for the best-effort terminate/disconnect exchange
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a wait for the program to stop ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped(StopInfo),
    Terminated { exit_code: Option<i64> },
}

/// Point-in-time summary of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub program: Option<String>,
    pub thread_id: Option<i64>,
    pub frame_id: Option<i64>,
    pub last_stop: Option<StopInfo>,
    pub pending_resume: Option<PendingResume>,
    pub exit_code: Option<i64>,
    pub terminated_reason: Option<String>,
    pub breakpoints: usize,
}

/// A window of source lines around a line of interest
#[derive(Debug, Clone, Serialize)]
pub struct SourceView {
    pub path: PathBuf,
    pub line: u32,
    pub lines: Vec<SourceLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceLine {
    pub number: u32,
    pub text: String,
    pub current: bool,
}

impl std::fmt::Display for SourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .lines
            .last()
            .map(|l| l.number.to_string().len())
            .unwrap_or(1);
        for line in &self.lines {
            let marker = if line.current { "->" } else { "  " };
            writeln!(f, "{} {:>width$} | {}", marker, line.number, line.text, width = width)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    initialize: Duration,
    request: Duration,
    wait: Duration,
}

impl Timeouts {
    fn from_config(config: &Config) -> Self {
        Self {
            initialize: Duration::from_secs(config.timeouts.initialize_secs),
            request: Duration::from_secs(config.timeouts.request_secs),
            wait: Duration::from_secs(config.timeouts.await_secs),
        }
    }
}

/// Build `launch` arguments from the configured defaults
pub fn launch_arguments(config: &Config) -> Result<LaunchArguments> {
    let program = config
        .launch
        .program
        .as_ref()
        .ok_or_else(|| Error::Config("no program configured ([launch] program)".to_string()))?;

    // Adapters may accept non-file programs (modules, package names)
    let program = resolve_source(program, &config.source_dirs).unwrap_or_else(|_| program.clone());

    Ok(LaunchArguments {
        program: program.to_string_lossy().into_owned(),
        args: config.launch.args.clone(),
        cwd: config
            .launch
            .cwd
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        env: config.launch.env.clone(),
        stop_on_entry: config.launch.stop_on_entry,
        no_debug: false,
        extra: config.launch.extra.clone(),
    })
}

/// Adapter settings and `launch` arguments as they would be sent
///
/// `launch` is null when no program is configured.
pub fn effective_launch_config(config: &Config) -> Result<Value> {
    let launch = match launch_arguments(config) {
        Ok(args) => serde_json::to_value(args)?,
        Err(_) => Value::Null,
    };
    Ok(json!({
        "adapter": {
            "path": config.adapter.path,
            "args": config.adapter.args,
            "adapterID": config.adapter.adapter_id,
        },
        "launch": launch,
        "sourceDirs": config.source_dirs,
    }))
}

/// High-level debugger bound to one adapter connection
pub struct Debugger {
    client: DapClient<SessionCore>,
    config: Config,
    timeouts: Timeouts,
}

impl Debugger {
    /// Spawn the configured adapter without initializing it
    pub fn spawn(config: &Config) -> Result<Self> {
        let adapter_path = config.adapter.resolve_path()?;
        let client = DapClient::spawn(
            &adapter_path,
            &config.adapter.args,
            SessionCore::new(&config.output),
            Self::dispatcher(),
        )?;
        Ok(Self::from_client(client, config.clone()))
    }

    /// Use an existing byte transport instead of spawning a process
    pub fn with_transport<R, W>(reader: R, writer: W, config: &Config) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let client = DapClient::from_transport(
            reader,
            writer,
            SessionCore::new(&config.output),
            Self::dispatcher(),
        );
        Self::from_client(client, config.clone())
    }

    /// Spawn the configured adapter and initialize it
    pub async fn connect(config: &Config) -> Result<Self> {
        let debugger = Self::spawn(config)?;
        debugger.initialize().await?;
        Ok(debugger)
    }

    fn dispatcher() -> EventDispatcher<SessionCore> {
        let mut dispatcher = EventDispatcher::new();
        handlers::install(&mut dispatcher);
        dispatcher
    }

    fn from_client(client: DapClient<SessionCore>, config: Config) -> Self {
        let timeouts = Timeouts::from_config(&config);
        Self {
            client,
            config,
            timeouts,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.client.with_state(|c| c.session.state())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.client.with_state(|c| c.session.capabilities().clone())
    }

    /// Watch session snapshots as events arrive
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.client.watch()
    }

    async fn request_as<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        arguments: impl Serialize,
    ) -> Result<T> {
        let arguments = serde_json::to_value(arguments)?;
        self.client
            .request_as(command, Some(arguments), self.timeouts.request)
            .await
    }

    // === Lifecycle ===

    /// Exchange `initialize` and record the adapter's capabilities
    pub async fn initialize(&self) -> Result<Capabilities> {
        self.client
            .with_state(|c| c.session.require("initialize", &[SessionState::Uninitialized]))?;

        let args = InitializeArguments::new(self.config.adapter.adapter_id.clone());
        let handle = self
            .client
            .submit("initialize", Some(serde_json::to_value(&args)?))
            .await?;
        let seq = handle.seq();
        let body = handle.wait(self.timeouts.initialize).await?;

        // Capabilities are optional in the response
        let capabilities = match body {
            Some(body) if !body.is_null() => parse_body("initialize", seq, Some(body))?,
            _ => Capabilities::default(),
        };
        tracing::debug!(?capabilities, "DAP adapter initialized");

        self.client
            .with_state(|c| c.session.mark_initialized(capabilities.clone()))?;
        Ok(capabilities)
    }

    /// Launch the configured program
    pub async fn launch(&self) -> Result<()> {
        let args = launch_arguments(&self.config)?;
        self.launch_with(args).await
    }

    /// Launch a program
    ///
    /// Some adapters answer `launch` immediately, others only after
    /// `configurationDone`. Either way the adapter signals readiness with
    /// `initialized`, after which staged breakpoints are submitted and
    /// configuration is closed. An early launch failure is reported as is.
    ///
    /// `configurationDone` is only sent to adapters that advertise
    /// `supportsConfigurationDoneRequest`; DAP forbids it otherwise, and such
    /// adapters start the debuggee without it.
    #[tracing::instrument(skip(self, args), fields(program = %args.program))]
    pub async fn launch_with(&self, args: LaunchArguments) -> Result<()> {
        self.client
            .with_state(|c| c.session.require("launch", &[SessionState::Initialized]))?;

        let mut watch = self.client.watch();
        let program = args.program.clone();
        let handle = self
            .client
            .submit("launch", Some(serde_json::to_value(&args)?))
            .await?;
        let launch_seq = handle.seq();
        self.client.with_state(|c| c.session.set_program(&program));

        let response = handle.wait(self.timeouts.request);
        tokio::pin!(response);

        let ready = |s: &SessionSnapshot| s.adapter_ready || s.state == SessionState::Terminated;
        let mut early = None;
        tokio::select! {
            result = &mut response => {
                early = Some(result?);
            }
            snapshot = wait_snapshot(&mut watch, ready) => {
                snapshot?;
            }
        }

        if early.is_some() {
            tokio::time::timeout(self.timeouts.request, wait_snapshot(&mut watch, ready))
                .await
                .map_err(|_| Error::RequestTimeout {
                    command: "launch (awaiting initialized)".to_string(),
                    seq: launch_seq,
                    timeout_ms: self.timeouts.request.as_millis() as u64,
                })??;
        }

        let (files, capabilities) = self.client.with_state(|c| -> Result<_> {
            c.session.require("configure", LIVE)?;
            Ok((c.breakpoints.files(), c.session.capabilities().clone()))
        })?;

        for path in files {
            if let Err(e) = self.sync_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to submit breakpoints");
                if e.is_fatal() || matches!(e, Error::SessionTerminated(_)) {
                    return Err(e);
                }
            }
        }

        if capabilities.supports_configuration_done_request {
            self.client
                .request("configurationDone", None, self.timeouts.request)
                .await?;
        }
        self.client.with_state(|c| c.session.mark_launched())?;

        if early.is_none() {
            response.await?;
        }
        tracing::info!("Launch sequence complete");
        Ok(())
    }

    /// End the session
    ///
    /// Sends `terminate` when the adapter supports it and the debuggee is
    /// running, then always finishes with `disconnect`. Both are
    /// best-effort; the local state becomes Terminated regardless of the
    /// outcome.
    pub async fn terminate(&self) -> Result<()> {
        let (state, supports_terminate) = self.client.with_state(|c| -> Result<_> {
            c.session.require("terminate", LIVE)?;
            Ok((
                c.session.state(),
                c.session.capabilities().supports_terminate_request,
            ))
        })?;

        let timeout = self.timeouts.request.min(TERMINATE_TIMEOUT);
        let mut terminated = false;
        if supports_terminate && EXECUTING.contains(&state) {
            match self.client.request("terminate", None, timeout).await {
                Ok(_) => terminated = true,
                // The `terminated` event can overtake the acknowledgment
                Err(_) if self.client.with_state(|c| c.session.is_terminated()) => {
                    terminated = true
                }
                Err(e) => tracing::debug!(error = %e, "terminate request failed"),
            }
        }

        // The adapter may already have reported `terminated`; disconnect
        // goes out through the teardown path either way.
        let args = serde_json::to_value(&DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(!terminated),
        })?;
        let disconnect = match self.client.submit_teardown("disconnect", Some(args)).await {
            Ok(handle) => handle.wait(timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = disconnect {
            tracing::debug!(error = %e, "disconnect request failed");
        }

        self.client.with_state(|c| c.terminate("terminated by user"));
        self.client.unsubscribe_all();
        self.client.shutdown().await;
        Ok(())
    }

    // === Breakpoints ===

    /// Whether breakpoint changes are sent to the adapter right away
    ///
    /// Before the adapter's `initialized` event they are only staged.
    fn accepts_breakpoints(core: &SessionCore) -> bool {
        core.session.adapter_ready() && !core.session.is_terminated()
    }

    async fn sync_file(&self, path: &Path) -> Result<()> {
        let submission = self
            .client
            .with_state(|c| c.breakpoints.begin_submission(path));
        tracing::debug!(
            path = %path.display(),
            count = submission.breakpoints.len(),
            "Submitting breakpoints"
        );

        let body: SetBreakpointsResponseBody = self
            .request_as("setBreakpoints", submission.arguments())
            .await?;
        self.client.with_state(|c| {
            c.breakpoints
                .apply_verification(&submission, &body.breakpoints)
        });
        Ok(())
    }

    /// Set (or update the condition of) a source breakpoint
    pub async fn set_breakpoint(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        condition: Option<String>,
    ) -> Result<BreakpointEntry> {
        let path = resolve_source(path.as_ref(), &self.config.source_dirs)?;

        let submit = self.client.with_state(|c| -> Result<bool> {
            c.session.require("set a breakpoint", LIVE)?;
            c.breakpoints.upsert(&path, line, condition.clone())?;

            let initialized = c.session.state() != SessionState::Uninitialized;
            if condition.is_some()
                && initialized
                && !c.session.capabilities().supports_conditional_breakpoints
            {
                tracing::warn!(
                    path = %path.display(),
                    line,
                    "Adapter does not advertise conditional breakpoints; condition may be ignored"
                );
            }
            Ok(Self::accepts_breakpoints(c))
        })?;

        if submit {
            self.sync_file(&path).await?;
        }
        self.find_breakpoint(&path, line)
    }

    fn find_breakpoint(&self, path: &Path, line: u32) -> Result<BreakpointEntry> {
        self.client
            .with_state(|c| c.breakpoints.list())
            .into_iter()
            .find(|e| e.source_path == path && e.line == line)
            .ok_or_else(|| Error::BreakpointNotFound {
                path: path.display().to_string(),
                line,
            })
    }

    /// Remove a source breakpoint
    pub async fn clear_breakpoint(&self, path: impl AsRef<Path>, line: u32) -> Result<()> {
        let path = resolve_source(path.as_ref(), &self.config.source_dirs)?;

        let submit = self.client.with_state(|c| -> Result<bool> {
            c.session.require("clear a breakpoint", LIVE)?;
            c.breakpoints.remove(&path, line)?;
            Ok(Self::accepts_breakpoints(c))
        })?;

        if submit {
            self.sync_file(&path).await?;
        }
        Ok(())
    }

    /// Remove every breakpoint; returns how many were removed
    pub async fn clear_all_breakpoints(&self) -> Result<usize> {
        let (files, removed, submit) = self.client.with_state(|c| -> Result<_> {
            c.session.require("clear breakpoints", LIVE)?;
            let removed = c.breakpoints.len();
            let files = c.breakpoints.clear_all();
            Ok((files, removed, Self::accepts_breakpoints(c)))
        })?;

        if submit {
            for path in files {
                self.sync_file(&path).await?;
            }
        }
        Ok(removed)
    }

    /// Current breakpoints with their verification status
    pub fn list_breakpoints(&self) -> Result<Vec<BreakpointEntry>> {
        self.client.with_state(|c| {
            c.session.require("list breakpoints", LIVE)?;
            Ok(c.breakpoints.list())
        })
    }

    /// Desired breakpoints, available even after termination
    ///
    /// Feed them to [`Debugger::restore_breakpoints`] of a new session to
    /// carry them over a relaunch.
    pub fn desired_breakpoints(&self) -> Vec<BreakpointEntry> {
        self.client.with_state(|c| c.breakpoints.list())
    }

    /// Stage breakpoints from a previous session
    pub async fn restore_breakpoints(&self, entries: &[BreakpointEntry]) -> Result<()> {
        for entry in entries.iter().filter(|e| e.desired) {
            self.set_breakpoint(&entry.source_path, entry.line, entry.condition.clone())
                .await?;
        }
        Ok(())
    }

    // === Execution ===

    async fn resume(&self, kind: ResumeKind) -> Result<()> {
        let (epoch, thread) = self.client.with_state(|c| -> Result<_> {
            let epoch = c.session.begin_resume(kind)?;
            Ok((epoch, c.session.current_thread_id()))
        })?;

        let result = async {
            let thread_id = match thread {
                Some(id) => id,
                None => self.first_thread().await?,
            };
            let args = serde_json::to_value(ThreadArguments { thread_id })?;
            self.client
                .request(kind.command(), Some(args), self.timeouts.request)
                .await
        }
        .await;

        match result {
            // Still Paused until the adapter's event arrives
            Ok(_) => Ok(()),
            Err(e) => {
                self.client.with_state(|c| c.session.cancel_resume(epoch));
                Err(e)
            }
        }
    }

    pub async fn continue_execution(&self) -> Result<()> {
        self.resume(ResumeKind::Continue).await
    }

    pub async fn step_over(&self) -> Result<()> {
        self.resume(ResumeKind::StepOver).await
    }

    pub async fn step_in(&self) -> Result<()> {
        self.resume(ResumeKind::StepIn).await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.resume(ResumeKind::StepOut).await
    }

    /// Ask the adapter to pause a running program
    pub async fn pause(&self) -> Result<()> {
        let thread = self.client.with_state(|c| -> Result<_> {
            c.session.require("pause", &[SessionState::Running])?;
            Ok(c.session.current_thread_id())
        })?;
        let thread_id = match thread {
            Some(id) => id,
            None => self.first_thread().await?,
        };
        self.client
            .request(
                "pause",
                Some(serde_json::to_value(ThreadArguments { thread_id })?),
                self.timeouts.request,
            )
            .await?;
        Ok(())
    }

    /// Wait until the program stops or the session ends
    ///
    /// Returns immediately when the session is already paused with no
    /// resume outstanding.
    pub async fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<StopOutcome> {
        let timeout = timeout.unwrap_or(self.timeouts.wait);
        let mut watch = self.client.watch();
        let start = watch.borrow_and_update().clone();

        match start.state {
            SessionState::Terminated => {
                return Ok(StopOutcome::Terminated {
                    exit_code: start.exit_code,
                })
            }
            SessionState::Paused if !start.resume_pending => return Ok(self.stopped_outcome()),
            _ => {}
        }
        self.client
            .with_state(|c| c.session.require("wait for a stop", EXECUTING))?;

        let baseline = start.stop_epoch;
        let snapshot = tokio::time::timeout(
            timeout,
            wait_snapshot(&mut watch, |s| {
                s.stop_epoch > baseline || s.state == SessionState::Terminated
            }),
        )
        .await
        .map_err(|_| Error::AwaitTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;

        if snapshot.state == SessionState::Terminated {
            Ok(StopOutcome::Terminated {
                exit_code: snapshot.exit_code,
            })
        } else {
            Ok(self.stopped_outcome())
        }
    }

    fn stopped_outcome(&self) -> StopOutcome {
        self.client.with_state(|c| match c.session.last_stop() {
            Some(stop) => StopOutcome::Stopped(stop.clone()),
            None => StopOutcome::Stopped(StopInfo {
                reason: "unknown".to_string(),
                thread_id: c.session.current_thread_id(),
                description: None,
                hit_breakpoint_ids: Vec::new(),
            }),
        })
    }

    // === Inspection ===

    async fn first_thread(&self) -> Result<i64> {
        let body: ThreadsResponseBody = self.request_as("threads", json!({})).await?;
        let thread = body
            .threads
            .first()
            .map(|t| t.id)
            .ok_or_else(|| Error::adapter_error("threads", "adapter reported no threads"))?;
        self.client.with_state(|c| c.session.adopt_thread(thread));
        Ok(thread)
    }

    /// Threads of the debuggee
    pub async fn threads(&self) -> Result<Vec<Thread>> {
        self.client
            .with_state(|c| c.session.require("list threads", EXECUTING))?;
        let body: ThreadsResponseBody = self.request_as("threads", json!({})).await?;
        Ok(body.threads)
    }

    /// Stack of the stopped thread, top frame first
    ///
    /// Cached for the current pause; the top frame becomes the current frame
    /// unless one was selected.
    pub async fn stack_trace(&self) -> Result<Vec<StackFrame>> {
        let (cached, generation, thread) = self.client.with_state(|c| -> Result<_> {
            c.session.require("get the stack trace", PAUSED)?;
            Ok((
                c.session.cached_frames(),
                c.session.cache_generation(),
                c.session.current_thread_id(),
            ))
        })?;
        if let Some(frames) = cached {
            return Ok(frames);
        }

        let thread_id = match thread {
            Some(id) => id,
            None => self.first_thread().await?,
        };
        let body: StackTraceResponseBody = self
            .request_as(
                "stackTrace",
                StackTraceArguments {
                    thread_id,
                    start_frame: Some(0),
                    levels: Some(MAX_FRAMES),
                },
            )
            .await?;

        self.client
            .with_state(|c| c.session.store_frames(generation, body.stack_frames.clone()));
        Ok(body.stack_frames)
    }

    /// Select a frame of the current stop for evaluation and locals
    pub fn change_frame(&self, frame_id: i64) -> Result<StackFrame> {
        self.client.with_state(|c| {
            c.session.select_frame(frame_id)?;
            c.session
                .frame(frame_id)
                .cloned()
                .ok_or(Error::FrameNotFound(frame_id))
        })
    }

    /// Scopes of a frame (the current frame by default)
    pub async fn scopes(&self, frame_id: Option<i64>) -> Result<Vec<Scope>> {
        let (frame_id, cached, generation) = self.client.with_state(|c| -> Result<_> {
            c.session.require("get scopes", PAUSED)?;
            let frame_id = frame_id
                .or(c.session.current_frame_id())
                .ok_or(Error::NoActiveFrame)?;
            if !c.session.knows_frame(frame_id) {
                return Err(Error::FrameNotFound(frame_id));
            }
            Ok((
                frame_id,
                c.session.cached_scopes(frame_id),
                c.session.cache_generation(),
            ))
        })?;
        if let Some(scopes) = cached {
            return Ok(scopes);
        }

        let body: ScopesResponseBody = self
            .request_as("scopes", ScopesArguments { frame_id })
            .await?;
        self.client
            .with_state(|c| c.session.store_scopes(generation, frame_id, body.scopes.clone()));
        Ok(body.scopes)
    }

    /// Children of a variables reference handed out during this pause
    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let (cached, generation) = self.client.with_state(|c| -> Result<_> {
            c.session.require("get variables", PAUSED)?;
            if !c.session.knows_reference(variables_reference) {
                return Err(Error::UnknownReference(variables_reference));
            }
            Ok((
                c.session.cached_variables(variables_reference),
                c.session.cache_generation(),
            ))
        })?;
        if let Some(variables) = cached {
            return Ok(variables);
        }

        let body: VariablesResponseBody = self
            .request_as("variables", VariablesArguments { variables_reference })
            .await?;
        self.client.with_state(|c| {
            c.session
                .store_variables(generation, variables_reference, body.variables.clone())
        });
        Ok(body.variables)
    }

    /// Local variables of the current frame
    pub async fn locals(&self) -> Result<Vec<Variable>> {
        let scopes = self.scopes(None).await?;
        let scope = scopes
            .iter()
            .find(|s| {
                let name = s.name.to_ascii_lowercase();
                name == "locals" || name == "local"
            })
            .or(scopes.first());

        match scope {
            Some(scope) => self.variables(scope.variables_reference).await,
            None => Ok(Vec::new()),
        }
    }

    /// Evaluate an expression in the current frame
    pub async fn evaluate(&self, expression: &str) -> Result<EvaluateResponseBody> {
        let (frame_id, generation) = self.client.with_state(|c| -> Result<_> {
            c.session.require("evaluate", PAUSED)?;
            let frame = c.session.current_frame_id().ok_or(Error::NoActiveFrame)?;
            Ok((frame, c.session.cache_generation()))
        })?;

        let body: EvaluateResponseBody = self
            .request_as(
                "evaluate",
                EvaluateArguments {
                    expression: expression.to_string(),
                    frame_id: Some(frame_id),
                    context: Some("repl".to_string()),
                },
            )
            .await?;
        self.client
            .with_state(|c| c.session.note_reference(generation, body.variables_reference));
        Ok(body)
    }

    /// Source lines around `line` (or the current frame's line)
    ///
    /// Without a path, the current frame's source is shown.
    pub fn view_source(
        &self,
        path: Option<&Path>,
        line: Option<u32>,
        context: u32,
    ) -> Result<SourceView> {
        let (path, line) = match path {
            Some(path) => (
                resolve_source(path, &self.config.source_dirs)?,
                line.ok_or_else(|| Error::InvalidLocation("a line is required".to_string()))?,
            ),
            None => {
                let frame = self.client.with_state(|c| {
                    c.session
                        .current_frame_id()
                        .and_then(|id| c.session.frame(id).cloned())
                });
                let frame = frame.ok_or(Error::NoActiveFrame)?;
                let source = frame.source_path().ok_or_else(|| {
                    Error::SourceNotFound(format!("frame {} has no source path", frame.id))
                })?;
                (
                    resolve_source(Path::new(source), &self.config.source_dirs)?,
                    line.unwrap_or(frame.line),
                )
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let total = content.lines().count() as u32;
        if line == 0 || line > total {
            return Err(Error::InvalidLocation(format!(
                "{}:{} (file has {} lines)",
                path.display(),
                line,
                total
            )));
        }

        let first = line.saturating_sub(context).max(1);
        let last = line.saturating_add(context).min(total);
        let lines = content
            .lines()
            .enumerate()
            .map(|(idx, text)| (idx as u32 + 1, text))
            .filter(|(number, _)| (first..=last).contains(number))
            .map(|(number, text)| SourceLine {
                number,
                text: text.to_string(),
                current: number == line,
            })
            .collect();

        Ok(SourceView { path, line, lines })
    }

    // === Reporting ===

    /// Program output collected so far (the last `tail` records if given)
    pub fn output(&self, tail: Option<usize>, clear: bool) -> Vec<OutputRecord> {
        self.client.with_state(|c| {
            let records = c.output.records(tail);
            if clear {
                c.output.drain();
            }
            records
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.client.with_state(|c| SessionStatus {
            state: c.session.state(),
            program: c.session.program().map(str::to_string),
            thread_id: c.session.current_thread_id(),
            frame_id: c.session.current_frame_id(),
            last_stop: c.session.last_stop().cloned(),
            pending_resume: c.session.pending_resume(),
            exit_code: c.session.exit_code(),
            terminated_reason: c.session.terminated_reason().map(str::to_string),
            breakpoints: c.breakpoints.len(),
        })
    }

    /// Effective adapter and launch settings
    pub fn launch_config(&self) -> Result<Value> {
        effective_launch_config(&self.config)
    }
}

async fn wait_snapshot(
    watch: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> Result<SessionSnapshot> {
    match watch.wait_for(predicate).await {
        Ok(snapshot) => Ok(snapshot.clone()),
        Err(_) => Err(Error::SessionTerminated(
            "session state is no longer published".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_launch_arguments_require_program() {
        let config = Config::default();
        assert!(matches!(launch_arguments(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_launch_arguments_resolve_program() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("demo.py");
        std::fs::File::create(&program)
            .unwrap()
            .write_all(b"a = 2\n")
            .unwrap();

        let mut config = Config::default();
        config.launch.program = Some(PathBuf::from("demo.py"));
        config.source_dirs = vec![dir.path().to_path_buf()];
        config.launch.stop_on_entry = true;

        let args = launch_arguments(&config).unwrap();
        assert!(args.program.ends_with("demo.py"));
        assert!(Path::new(&args.program).is_absolute());
        assert!(args.stop_on_entry);
    }

    #[test]
    fn test_source_view_rendering() {
        let view = SourceView {
            path: PathBuf::from("demo.py"),
            line: 10,
            lines: vec![
                SourceLine {
                    number: 9,
                    text: "a = 2".into(),
                    current: false,
                },
                SourceLine {
                    number: 10,
                    text: "b = 3".into(),
                    current: true,
                },
            ],
        };
        assert_eq!(view.to_string(), "    9 | a = 2\n-> 10 | b = 3\n");
    }
}
