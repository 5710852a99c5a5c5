//! CLI command definitions
//!
//! Defines the clap commands for the `dap-bridge` binary and for lines typed
//! at the interactive prompt.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive debugging session (default)
    Repl,

    /// Run prompt commands in order, then end the session
    ///
    /// Example: dap-bridge exec "break demo.py 5" run wait locals
    Exec {
        /// Prompt command lines
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Execute test scenarios defined in YAML files
    Test {
        /// Paths to YAML test scenario files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// Print the effective adapter and launch configuration as JSON
    Config,
}

/// One line typed at the prompt
#[derive(Parser, Debug)]
#[command(name = "dap", no_binary_name = true, disable_version_flag = true)]
pub struct ReplLine {
    #[command(subcommand)]
    pub command: ReplCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ReplCommand {
    /// Set a breakpoint, optionally with a condition
    #[command(alias = "b")]
    Break {
        /// Source file
        file: PathBuf,

        /// Line number (1-based)
        line: u32,

        /// Condition expression
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        condition: Vec<String>,
    },

    /// Remove a breakpoint
    Clear {
        /// Source file
        file: PathBuf,

        /// Line number (1-based)
        line: u32,
    },

    /// Remove all breakpoints
    ClearAll,

    /// List breakpoints
    #[command(alias = "breakpoints")]
    List,

    /// Launch the configured program
    #[command(alias = "launch", alias = "r")]
    Run,

    /// Continue execution
    #[command(alias = "c")]
    Continue,

    /// Step over the current line
    #[command(alias = "step", alias = "n", alias = "s")]
    Next,

    /// Step into the call on the current line
    #[command(name = "stepin", alias = "si")]
    StepIn,

    /// Run until the current function returns
    #[command(name = "stepout", alias = "so")]
    StepOut,

    /// Pause a running program
    Pause,

    /// Wait for the next stop (breakpoint, step completion, exit)
    #[command(alias = "await")]
    Wait {
        /// Timeout in seconds
        secs: Option<u64>,
    },

    /// Print the stack trace of the stopped thread
    #[command(name = "bt", alias = "stack", alias = "backtrace")]
    Stack,

    /// Select a stack frame by id
    #[command(alias = "f")]
    Frame {
        /// Frame id as shown by `bt`
        id: i64,
    },

    /// List the scopes of the current frame
    Scopes,

    /// Expand a variables reference
    Vars {
        /// Reference shown by `scopes`, `locals` or `eval`
        reference: i64,
    },

    /// Show local variables in the current frame
    Locals,

    /// Evaluate an expression in the current frame
    #[command(alias = "p", alias = "print")]
    Eval {
        /// Expression to evaluate
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        expression: Vec<String>,
    },

    /// Show source around a line: `view`, `view <line>` or `view <file> <line>`
    #[command(alias = "l")]
    View {
        #[arg(num_args = 0..=2)]
        location: Vec<String>,

        /// Lines of context around the line
        #[arg(long, short, default_value = "5")]
        context: u32,
    },

    /// List threads
    Threads,

    /// Show program output
    Output {
        /// Only the last N records
        #[arg(long)]
        tail: Option<usize>,

        /// Clear the output buffer
        #[arg(long)]
        clear: bool,
    },

    /// Show session status
    Status,

    /// End the session and leave
    #[command(alias = "exit", alias = "q")]
    Quit,
}

/// Parse a prompt line
///
/// Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ReplCommand>, clap::Error> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.first() {
        None => Ok(None),
        Some(first) if first.starts_with('#') => Ok(None),
        Some(_) => ReplLine::try_parse_from(tokens).map(|l| Some(l.command)),
    }
}
