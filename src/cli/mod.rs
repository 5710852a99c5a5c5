//! CLI command handling
//!
//! Runs prompt commands against a [`Debugger`] and formats the results.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{parse_line, ReplCommand};
use crate::common::config::Config;
use crate::common::{Error, ErrorReport, Result};
use crate::dap::{StackFrame, Variable};
use crate::facade::{Debugger, SessionStatus, StopOutcome};
use crate::session::{BreakpointEntry, OutputRecord, SessionState};

/// What the prompt loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// An interactive session: one debugger plus the config it came from
pub struct Repl {
    debugger: Debugger,
    config: Config,
}

impl Repl {
    /// Spawn and initialize the configured adapter
    pub async fn start(config: Config) -> Result<Self> {
        let debugger = Debugger::connect(&config).await?;
        Ok(Self { debugger, config })
    }

    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Parse and run one prompt line
    ///
    /// Command errors are returned, not printed; usage errors are printed
    /// by clap and only reported as an error when clap considers them one.
    pub async fn run_line(&mut self, line: &str) -> (Control, Option<Error>) {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return (Control::Continue, None),
            Err(e) => {
                // clap renders help and usage errors itself
                let _ = e.print();
                let failed = e.use_stderr();
                return (
                    Control::Continue,
                    failed.then(|| Error::Config(format!("invalid command: {}", line.trim()))),
                );
            }
        };

        match self.execute(command).await {
            Ok(control) => (control, None),
            Err(e) => (Control::Continue, Some(e)),
        }
    }

    /// Run one parsed command
    pub async fn execute(&mut self, command: ReplCommand) -> Result<Control> {
        match command {
            ReplCommand::Break {
                file,
                line,
                condition,
            } => {
                let condition = (!condition.is_empty()).then(|| condition.join(" "));
                let entry = self.debugger.set_breakpoint(&file, line, condition).await?;
                print_breakpoint_added(&entry, self.debugger.state());
            }

            ReplCommand::Clear { file, line } => {
                self.debugger.clear_breakpoint(&file, line).await?;
                println!("Breakpoint removed at {}:{}", file.display(), line);
            }

            ReplCommand::ClearAll => {
                let removed = self.debugger.clear_all_breakpoints().await?;
                println!("{} breakpoint(s) removed", removed);
            }

            ReplCommand::List => {
                let breakpoints = self.debugger.list_breakpoints()?;
                if breakpoints.is_empty() {
                    println!("No breakpoints set");
                } else {
                    println!("Breakpoints:");
                    for bp in &breakpoints {
                        print_breakpoint(bp);
                    }
                }
            }

            ReplCommand::Run => {
                if self.debugger.state() == SessionState::Terminated {
                    self.restart().await?;
                }
                self.debugger.launch().await?;
                match self.debugger.status().program {
                    Some(program) => println!("Launched {}", program),
                    None => println!("Launched"),
                }
                println!("Use 'wait' to wait for a stop.");
            }

            ReplCommand::Continue => {
                self.debugger.continue_execution().await?;
                println!("Continuing execution...");
            }

            ReplCommand::Next => {
                self.debugger.step_over().await?;
                println!("Stepping over...");
            }

            ReplCommand::StepIn => {
                self.debugger.step_in().await?;
                println!("Stepping into...");
            }

            ReplCommand::StepOut => {
                self.debugger.step_out().await?;
                println!("Stepping out...");
            }

            ReplCommand::Pause => {
                self.debugger.pause().await?;
                println!("Pausing execution...");
            }

            ReplCommand::Wait { secs } => {
                let outcome = self
                    .debugger
                    .wait_for_stop(secs.map(Duration::from_secs))
                    .await?;
                print_stop(&outcome);
                if let StopOutcome::Stopped(_) = outcome {
                    // Location comes from the top frame of the new stop
                    if let Ok(frames) = self.debugger.stack_trace().await {
                        if let Some(top) = frames.first() {
                            println!("  Location: {}", frame_location(top));
                        }
                    }
                }
            }

            ReplCommand::Stack => {
                let frames = self.debugger.stack_trace().await?;
                let current = self.debugger.status().frame_id;
                print_frames(&frames, current);
            }

            ReplCommand::Frame { id } => {
                self.ensure_frame().await?;
                let frame = self.debugger.change_frame(id)?;
                println!("#{} {} at {}", frame.id, frame.name, frame_location(&frame));
            }

            ReplCommand::Scopes => {
                self.ensure_frame().await?;
                let scopes = self.debugger.scopes(None).await?;
                if scopes.is_empty() {
                    println!("No scopes");
                }
                for scope in &scopes {
                    let expensive = if scope.expensive { " (expensive)" } else { "" };
                    println!("  {} [ref {}]{}", scope.name, scope.variables_reference, expensive);
                }
            }

            ReplCommand::Vars { reference } => {
                let variables = self.debugger.variables(reference).await?;
                print_variables(&variables);
            }

            ReplCommand::Locals => {
                self.ensure_frame().await?;
                let variables = self.debugger.locals().await?;
                print_variables(&variables);
            }

            ReplCommand::Eval { expression } => {
                self.ensure_frame().await?;
                let result = self.debugger.evaluate(&expression.join(" ")).await?;
                match (&result.type_name, result.variables_reference) {
                    (Some(ty), 0) => println!("{} ({})", result.result, ty),
                    (Some(ty), r) => println!("{} ({}) [ref {}]", result.result, ty, r),
                    (None, 0) => println!("{}", result.result),
                    (None, r) => println!("{} [ref {}]", result.result, r),
                }
            }

            ReplCommand::View { location, context } => {
                let (path, line) = match location.as_slice() {
                    [] => (None, None),
                    [line] => (None, Some(parse_line_number(line)?)),
                    [file, line] => (Some(Path::new(file)), Some(parse_line_number(line)?)),
                    _ => {
                        return Err(Error::InvalidLocation(
                            "expected: view [file] <line>".to_string(),
                        ))
                    }
                };
                if path.is_none() {
                    self.ensure_frame().await?;
                }
                let view = self.debugger.view_source(path, line, context)?;
                println!("{}:", view.path.display());
                print!("{}", view);
            }

            ReplCommand::Threads => {
                let threads = self.debugger.threads().await?;
                let current = self.debugger.status().thread_id;
                if threads.is_empty() {
                    println!("No threads");
                }
                for thread in &threads {
                    let marker = if Some(thread.id) == current { "*" } else { " " };
                    println!("{} {} {}", marker, thread.id, thread.name);
                }
            }

            ReplCommand::Output { tail, clear } => {
                let records = self.debugger.output(tail, clear);
                print_output(&records);
            }

            ReplCommand::Status => {
                print_status(&self.debugger.status());
            }

            ReplCommand::Quit => {
                if self.debugger.state() != SessionState::Terminated {
                    self.debugger.terminate().await?;
                }
                return Ok(Control::Quit);
            }
        }

        Ok(Control::Continue)
    }

    /// Fetch the stack once per stop so a current frame exists
    async fn ensure_frame(&self) -> Result<()> {
        let status = self.debugger.status();
        if status.state == SessionState::Paused && status.frame_id.is_none() {
            self.debugger.stack_trace().await?;
        }
        Ok(())
    }

    /// Replace a finished session with a fresh adapter, keeping breakpoints
    async fn restart(&mut self) -> Result<()> {
        let breakpoints = self.debugger.desired_breakpoints();
        let debugger = Debugger::connect(&self.config).await?;
        debugger.restore_breakpoints(&breakpoints).await?;
        self.debugger = debugger;
        tracing::info!(breakpoints = breakpoints.len(), "Started a new session");
        Ok(())
    }

    /// End the session if it is still live
    pub async fn shutdown(self) -> Result<()> {
        if self.debugger.state() != SessionState::Terminated {
            self.debugger.terminate().await?;
        }
        Ok(())
    }
}

/// Interactive prompt on stdin
pub async fn run_repl(config: Config) -> Result<()> {
    let mut repl = Repl::start(config).await?;
    println!("Connected to debug adapter. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("(dap) ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let (control, error) = repl.run_line(&line).await;
        if let Some(e) = error {
            print_error(&e);
        }
        if control == Control::Quit {
            return Ok(());
        }
    }

    repl.shutdown().await
}

/// Run prompt lines in order; stops at the first failing line
pub async fn run_exec(config: Config, lines: &[String]) -> Result<()> {
    let mut repl = Repl::start(config).await?;

    for line in lines {
        println!("(dap) {}", line);
        let (control, error) = repl.run_line(line).await;
        if let Some(e) = error {
            let _ = repl.shutdown().await;
            return Err(e);
        }
        if control == Control::Quit {
            return Ok(());
        }
    }

    repl.shutdown().await
}

fn parse_line_number(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::InvalidLocation(format!("invalid line number: {}", s)))
}

/// Print an error with its stable code
pub fn print_error(error: &Error) {
    let report = ErrorReport::from(error);
    eprintln!("Error [{}]: {}", report.code, report.message);
}

fn frame_location(frame: &StackFrame) -> String {
    format!("{}:{}", frame.source_path().unwrap_or("?"), frame.line)
}

fn entry_location(entry: &BreakpointEntry) -> String {
    format!("{}:{}", entry.source_path.display(), entry.line)
}

fn print_breakpoint_added(entry: &BreakpointEntry, state: SessionState) {
    if entry.verified {
        println!("Breakpoint set at {}", entry_location(entry));
    } else if matches!(state, SessionState::Uninitialized | SessionState::Initialized) {
        println!("Breakpoint staged at {} (sent at launch)", entry_location(entry));
    } else {
        println!(
            "Breakpoint pending at {}{}",
            entry_location(entry),
            entry
                .message
                .as_ref()
                .map(|m| format!(": {}", m))
                .unwrap_or_default()
        );
    }
}

fn print_breakpoint(entry: &BreakpointEntry) {
    let status = if entry.verified { "✓" } else { "?" };

    let extras = [
        entry.condition.as_ref().map(|c| format!("if {}", c)),
        entry
            .actual_line
            .filter(|l| *l != entry.line)
            .map(|l| format!("bound to line {}", l)),
        entry.message.clone(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(", ");

    if extras.is_empty() {
        println!("  {} {}", status, entry_location(entry));
    } else {
        println!("  {} {} ({})", status, entry_location(entry), extras);
    }
}

fn print_stop(outcome: &StopOutcome) {
    let stop = match outcome {
        StopOutcome::Terminated { exit_code } => {
            match exit_code {
                Some(code) => println!("Program exited with code {}", code),
                None => println!("Session ended"),
            }
            return;
        }
        StopOutcome::Stopped(stop) => stop,
    };

    match stop.reason.as_str() {
        "breakpoint" => {
            println!("Stopped at breakpoint");
            if !stop.hit_breakpoint_ids.is_empty() {
                println!("  Breakpoint IDs: {:?}", stop.hit_breakpoint_ids);
            }
        }
        "step" => println!("Step completed"),
        "exception" => println!(
            "Stopped: {}",
            stop.description.as_deref().unwrap_or(&stop.reason)
        ),
        "pause" => println!("Paused"),
        "entry" => println!("Stopped at entry point"),
        _ => println!("Stopped: {}", stop.reason),
    }
}

fn print_frames(frames: &[StackFrame], current: Option<i64>) {
    if frames.is_empty() {
        println!("No stack frames");
        return;
    }
    for frame in frames {
        let marker = if Some(frame.id) == current { "->" } else { "  " };
        println!("{} #{} {} at {}", marker, frame.id, frame.name, frame_location(frame));
    }
}

fn print_variables(variables: &[Variable]) {
    if variables.is_empty() {
        println!("No variables");
        return;
    }
    for var in variables {
        let type_str = var
            .type_name
            .as_ref()
            .map(|t| format!(" ({})", t))
            .unwrap_or_default();
        let expand = if var.variables_reference > 0 {
            format!(" [ref {}]", var.variables_reference)
        } else {
            String::new()
        };
        println!("  {}{} = {}{}", var.name, type_str, var.value, expand);
    }
}

fn print_output(records: &[OutputRecord]) {
    if records.is_empty() {
        println!("No output");
        return;
    }
    for record in records {
        print!("{}", record.output);
        if !record.output.ends_with('\n') {
            println!();
        }
    }
}

fn print_status(status: &SessionStatus) {
    println!("State: {}", status.state);
    if let Some(program) = &status.program {
        println!("Program: {}", program);
    }
    if let Some(thread) = status.thread_id {
        println!("Thread: {}", thread);
    }
    if let Some(frame) = status.frame_id {
        println!("Frame: {}", frame);
    }
    if let Some(stop) = &status.last_stop {
        println!("Last stop: {}", stop.reason);
    }
    if let Some(resume) = &status.pending_resume {
        println!("Resume pending: {:?}", resume.kind);
    }
    println!("Breakpoints: {}", status.breakpoints);
    if let Some(code) = status.exit_code {
        println!("Exit code: {}", code);
    }
    if let Some(reason) = &status.terminated_reason {
        println!("Ended: {}", reason);
    }
}
