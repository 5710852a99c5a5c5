//! Test runner implementation
//!
//! Executes test scenarios by driving a [`Debugger`] directly and asserting
//! on the structured values it returns rather than on printed output.

use std::fmt::Display;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use colored::Colorize;
use tokio::process::Command as TokioCommand;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::facade::{Debugger, StopOutcome};
use crate::session::SessionState;

use super::config::{
    EvaluateExpectation, FrameAssertion, SetupStep, StopExpectation, TestScenario, TestStep,
    VariableAssertion,
};

/// Default wait for an `await` step, in seconds
const DEFAULT_AWAIT_SECS: u64 = 30;

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

impl TestResult {
    fn failed(scenario: &TestScenario, steps_run: usize, error: String) -> Self {
        Self {
            name: scenario.name.clone(),
            passed: false,
            steps_run,
            steps_total: scenario.steps.len(),
            error: Some(error),
        }
    }
}

/// Build the session configuration for a scenario
///
/// The target program comes from the scenario; the scenario's directory is
/// searched first for relative source paths.
fn scenario_config(scenario: &TestScenario, scenario_dir: &Path, base: &Config) -> Config {
    let mut config = base.clone();

    let program = if scenario.target.program.is_relative() {
        scenario_dir.join(&scenario.target.program)
    } else {
        scenario.target.program.clone()
    };
    config.launch.program = Some(program);
    config.launch.args = scenario.target.args.clone();
    config.launch.stop_on_entry = scenario.target.stop_on_entry;
    config.source_dirs.insert(0, scenario_dir.to_path_buf());

    if let Some(adapter) = &scenario.adapter {
        // `mock` is looked up on PATH, `./bin/mock` next to the scenario
        config.adapter.path = if adapter.path.is_relative() && adapter.path.components().count() > 1
        {
            scenario_dir.join(&adapter.path)
        } else {
            adapter.path.clone()
        };
        config.adapter.args = adapter.args.clone();
        if let Some(id) = &adapter.adapter_id {
            config.adapter.adapter_id = id.clone();
        }
    }

    config
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, base: &Config, verbose: bool) -> Result<TestResult> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let scenario: TestScenario = serde_yaml::from_str(&content).map_err(|e| {
        Error::ConfigParse(format!("test scenario '{}': {}", path.display(), e))
    })?;

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let scenario_dir = path.parent().unwrap_or(Path::new("."));

    if let Some(setup) = &scenario.setup {
        println!("\n{}", "Setup:".cyan());
        for step in setup {
            if let Err(message) = run_setup(step, scenario_dir, verbose).await? {
                return Ok(TestResult::failed(&scenario, 0, message));
            }
        }
    }

    let config = scenario_config(&scenario, scenario_dir, base);
    println!("\n{}", "Starting debug session...".cyan());
    let debugger = Debugger::connect(&config).await?;
    if verbose {
        println!("  Adapter: {}", config.adapter.path.display().to_string().dimmed());
        if let Some(program) = &config.launch.program {
            println!("  Program: {}", program.display().to_string().dimmed());
        }
    }
    println!("  {} Adapter initialized", "✓".green());

    println!("\n{}", "Steps:".cyan());
    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        match run_step(&debugger, step, verbose).await {
            Ok(summary) => println!("  {} Step {}: {}", "✓".green(), step_num, summary.dimmed()),
            Err(e) => {
                println!("  {} Step {}: {}", "✗".red(), step_num, e);
                if let Err(cleanup_err) = cleanup(&debugger).await {
                    tracing::debug!(error = %cleanup_err, "Cleanup after failed step");
                }
                return Ok(TestResult::failed(&scenario, step_num, e.to_string()));
            }
        }
    }

    cleanup(&debugger).await?;
    println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());

    Ok(TestResult {
        name: scenario.name.clone(),
        passed: true,
        steps_run: scenario.steps.len(),
        steps_total: scenario.steps.len(),
        error: None,
    })
}

/// Run one setup command; the inner error describes a command that failed
async fn run_setup(
    step: &SetupStep,
    dir: &Path,
    verbose: bool,
) -> Result<std::result::Result<(), String>> {
    if verbose {
        println!("  $ {}", step.shell.dimmed());
    }
    let stdio = || if verbose { Stdio::inherit() } else { Stdio::null() };

    let status = TokioCommand::new("sh")
        .arg("-c")
        .arg(&step.shell)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(stdio())
        .stderr(stdio())
        .status()
        .await?;

    if !status.success() {
        return Ok(Err(format!(
            "Setup command '{}' failed with exit code {:?}",
            step.shell,
            status.code()
        )));
    }
    println!("  {} {}", "✓".green(), step.shell.dimmed());
    Ok(Ok(()))
}

async fn cleanup(debugger: &Debugger) -> Result<()> {
    if debugger.state() != SessionState::Terminated {
        debugger.terminate().await?;
    }
    Ok(())
}

/// Fail the step unless `ok`
fn check(ok: bool, message: impl FnOnce() -> String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::TestAssertion(message()))
    }
}

/// Compare an optional expectation with the actual value
fn expect_eq<E, A>(what: &str, expected: Option<&E>, actual: &A) -> Result<()>
where
    E: PartialEq<A> + Display + ?Sized,
    A: Display + ?Sized,
{
    match expected {
        Some(expected) => check(expected == actual, || {
            format!("{}: expected '{}', got '{}'", what, expected, actual)
        }),
        None => Ok(()),
    }
}

/// Substring expectation
fn expect_contains(what: &str, needle: Option<&String>, haystack: &str) -> Result<()> {
    match needle {
        Some(needle) => check(haystack.contains(needle.as_str()), || {
            format!("{}: expected '{}' to contain '{}'", what, haystack, needle)
        }),
        None => Ok(()),
    }
}

/// Check a result against an optional expected error code
fn expect_code<T>(result: Result<T>, code: Option<&str>) -> Result<()> {
    match (result, code) {
        (Ok(_), None) => Ok(()),
        (Err(e), None) => Err(e),
        (Ok(_), Some(code)) => Err(Error::TestAssertion(format!(
            "Expected failure with {}, but the command succeeded",
            code
        ))),
        (Err(e), Some(code)) if e.code() == code => Ok(()),
        (Err(e), Some(code)) => Err(Error::TestAssertion(format!(
            "Expected failure with {}, got {}: {}",
            code,
            e.code(),
            e
        ))),
    }
}

/// Fetch the stack once per stop so a current frame exists
async fn ensure_frame(debugger: &Debugger) -> Result<()> {
    let status = debugger.status();
    if status.state == SessionState::Paused && status.frame_id.is_none() {
        debugger.stack_trace().await?;
    }
    Ok(())
}

/// Execute a single step, returning a one-line summary
async fn run_step(debugger: &Debugger, step: &TestStep, verbose: bool) -> Result<String> {
    match step {
        TestStep::Break {
            file,
            line,
            condition,
            verified,
        } => {
            let entry = debugger
                .set_breakpoint(file, *line, condition.clone())
                .await?;
            let what = format!("breakpoint {}:{} verified", file.display(), line);
            expect_eq(&what, verified.as_ref(), &entry.verified)?;
            Ok(format!("break {}:{}", file.display(), line))
        }
        TestStep::Clear { file, line, error } => {
            expect_code(debugger.clear_breakpoint(file, *line).await, error.as_deref())?;
            Ok(format!("clear {}:{}", file.display(), line))
        }
        TestStep::Launch => {
            debugger.launch().await?;
            Ok("launch".to_string())
        }
        TestStep::Continue => {
            debugger.continue_execution().await?;
            Ok("continue".to_string())
        }
        TestStep::StepOver => {
            debugger.step_over().await?;
            Ok("step over".to_string())
        }
        TestStep::StepIn => {
            debugger.step_in().await?;
            Ok("step in".to_string())
        }
        TestStep::StepOut => {
            debugger.step_out().await?;
            Ok("step out".to_string())
        }
        TestStep::Await { timeout, expect } => {
            await_stop(debugger, *timeout, expect.as_ref(), verbose).await
        }
        TestStep::InspectLocals { asserts } => inspect_locals(debugger, asserts).await,
        TestStep::InspectStack { asserts } => inspect_stack(debugger, asserts).await,
        TestStep::CheckOutput { contains, equals } => {
            let output: String = debugger
                .output(None, false)
                .iter()
                .map(|r| r.output.as_str())
                .collect();
            expect_contains("output", contains.as_ref(), &output)?;
            if let Some(expected) = equals {
                expect_eq("output", Some(expected.trim()), output.trim())?;
            }
            Ok("check output".to_string())
        }
        TestStep::Evaluate { expression, expect } => {
            evaluate(debugger, expression, expect.as_ref()).await
        }
        TestStep::Terminate => {
            debugger.terminate().await?;
            Ok("terminate".to_string())
        }
    }
}

async fn await_stop(
    debugger: &Debugger,
    timeout: Option<u64>,
    expect: Option<&StopExpectation>,
    verbose: bool,
) -> Result<String> {
    let timeout = Duration::from_secs(timeout.unwrap_or(DEFAULT_AWAIT_SECS));
    let outcome = debugger.wait_for_stop(Some(timeout)).await?;

    // A finished session reads as an "exited" stop with no location
    let (reason, thread_id, exit_code, top) = match outcome {
        StopOutcome::Stopped(stop) => {
            let top = debugger.stack_trace().await?.into_iter().next();
            (stop.reason, stop.thread_id, None, top)
        }
        StopOutcome::Terminated { exit_code } => ("exited".to_string(), None, exit_code, None),
    };
    let source = top
        .as_ref()
        .and_then(|f| f.source_path())
        .unwrap_or("")
        .to_string();
    let line = top.as_ref().map(|f| f.line);

    if let Some(exp) = expect {
        expect_contains("stop reason", exp.reason.as_ref(), &reason)?;
        expect_contains("stop file", exp.file.as_ref(), &source)?;
        check(exp.line.is_none() || exp.line == line, || {
            format!("Expected line {:?}, got {:?}", exp.line, line)
        })?;
        check(exp.exit_code.is_none() || exp.exit_code == exit_code, || {
            format!("Expected exit code {:?}, got {:?}", exp.exit_code, exit_code)
        })?;
        check(exp.thread_id.is_none() || exp.thread_id == thread_id, || {
            format!("Expected thread {:?}, got {:?}", exp.thread_id, thread_id)
        })?;
    }

    let location = match (line, exit_code) {
        (Some(line), _) => format!("{}:{}", source, line),
        (None, Some(code)) if verbose => format!("exit code {}", code),
        _ => "no location".to_string(),
    };
    Ok(format!("await ({} at {})", reason, location))
}

async fn inspect_locals(debugger: &Debugger, asserts: &[VariableAssertion]) -> Result<String> {
    ensure_frame(debugger).await?;
    let vars = debugger.locals().await?;

    for assertion in asserts {
        let Some(var) = vars.iter().find(|v| v.name == assertion.name) else {
            let available: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
            return Err(Error::TestAssertion(format!(
                "Variable '{}' not found. Available: {:?}",
                assertion.name, available
            )));
        };
        let what = format!("variable '{}'", assertion.name);
        expect_eq(&what, assertion.value.as_ref(), &var.value)?;
        expect_contains(&what, assertion.value_contains.as_ref(), &var.value)?;
        expect_eq(
            &format!("type of {}", what),
            assertion.type_name.as_ref(),
            var.type_name.as_deref().unwrap_or(""),
        )?;
    }

    let checked: Vec<&str> = asserts.iter().map(|a| a.name.as_str()).collect();
    Ok(format!("inspect locals ({})", checked.join(", ")))
}

async fn inspect_stack(debugger: &Debugger, asserts: &[FrameAssertion]) -> Result<String> {
    let frames = debugger.stack_trace().await?;

    for assertion in asserts {
        let Some(frame) = frames.get(assertion.index) else {
            return Err(Error::TestAssertion(format!(
                "Frame {} does not exist (only {} frames)",
                assertion.index,
                frames.len()
            )));
        };
        let what = format!("frame {}", assertion.index);
        expect_contains(&what, assertion.function.as_ref(), &frame.name)?;
        expect_contains(&what, assertion.file.as_ref(), frame.source_path().unwrap_or(""))?;
        expect_eq(&format!("{} line", what), assertion.line.as_ref(), &frame.line)?;
    }

    Ok(format!("inspect stack ({} frames checked)", asserts.len()))
}

async fn evaluate(
    debugger: &Debugger,
    expression: &str,
    expect: Option<&EvaluateExpectation>,
) -> Result<String> {
    ensure_frame(debugger).await?;
    let result = debugger.evaluate(expression).await;

    if expect.and_then(|e| e.success) == Some(false) {
        return match result {
            Ok(value) => Err(Error::TestAssertion(format!(
                "Evaluate '{}': expected failure but got '{}'",
                expression, value.result
            ))),
            Err(e) => {
                match expect.and_then(|e| e.code.as_deref()) {
                    Some(code) => expect_code::<()>(Err(e), Some(code))?,
                    None => tracing::debug!(error = %e, "Evaluation failed as expected"),
                }
                Ok(format!("evaluate '{}' (expected failure)", expression))
            }
        };
    }

    let value = result?;
    if let Some(exp) = expect {
        let what = format!("evaluate '{}'", expression);
        expect_eq(&what, exp.result.as_ref(), &value.result)?;
        expect_contains(&what, exp.result_contains.as_ref(), &value.result)?;
        expect_eq(
            &format!("type of {}", what),
            exp.type_name.as_ref(),
            value.type_name.as_deref().unwrap_or(""),
        )?;
    }
    Ok(format!("evaluate '{}' = {}", expression, value.result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_scenario_config_resolves_against_scenario_dir() {
        let scenario: TestScenario = serde_yaml::from_str(
            r#"
name: demo
target:
  program: ../fixtures/demo.py
  stop_on_entry: true
adapter:
  path: ./bin/mock
  adapter_id: mock
steps: []
"#,
        )
        .unwrap();

        let dir = Path::new("/work/scenarios");
        let config = scenario_config(&scenario, dir, &Config::default());
        assert_eq!(
            config.launch.program,
            Some(PathBuf::from("/work/scenarios/../fixtures/demo.py"))
        );
        assert!(config.launch.stop_on_entry);
        assert_eq!(config.source_dirs[0], dir);
        assert_eq!(config.adapter.path, PathBuf::from("/work/scenarios/./bin/mock"));
        assert_eq!(config.adapter.adapter_id, "mock");
    }

    #[test]
    fn test_expect_code() {
        assert!(expect_code(Ok(()), None).is_ok());
        assert!(expect_code::<()>(Err(Error::NoActiveFrame), Some("NO_ACTIVE_FRAME")).is_ok());
        assert!(matches!(
            expect_code(Ok(()), Some("NO_ACTIVE_FRAME")),
            Err(Error::TestAssertion(_))
        ));
        assert!(matches!(
            expect_code::<()>(Err(Error::NoActiveFrame), None),
            Err(Error::NoActiveFrame)
        ));
    }

    #[test]
    fn test_expectations() {
        assert!(expect_eq::<String, String>("x", None, &"1".to_string()).is_ok());
        assert!(expect_eq("x", Some(&"1".to_string()), &"1".to_string()).is_ok());
        assert!(expect_eq("line", Some(&5u32), &6u32).is_err());
        assert!(expect_contains("out", Some(&"5".to_string()), "total 5\n").is_ok());
        assert!(matches!(
            expect_contains("out", Some(&"7".to_string()), "5\n"),
            Err(Error::TestAssertion(_))
        ));
    }
}
