//! YAML scenario schema
//!
//! A scenario names a target program, optionally overrides the adapter, and
//! lists steps run in order against one debug session.

use serde::Deserialize;
use std::path::PathBuf;

/// One scenario file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    pub name: String,
    pub description: Option<String>,
    /// Shell commands run in the scenario directory before connecting
    pub setup: Option<Vec<SetupStep>>,
    pub target: TargetConfig,
    /// Replaces the configured adapter for this scenario only
    pub adapter: Option<AdapterOverride>,
    pub steps: Vec<TestStep>,
}

#[derive(Deserialize, Debug)]
pub struct SetupStep {
    pub shell: String,
}

/// Program under test; relative paths are taken from the scenario directory
#[derive(Deserialize, Debug)]
pub struct TargetConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stop_on_entry: bool,
}

#[derive(Deserialize, Debug)]
pub struct AdapterOverride {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub adapter_id: Option<String>,
}

/// A step, tagged by `action`
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Add a breakpoint or change its condition
    Break {
        file: PathBuf,
        line: u32,
        condition: Option<String>,
        /// Expected adapter verification
        verified: Option<bool>,
    },
    Clear {
        file: PathBuf,
        line: u32,
        /// Error code the removal must fail with
        error: Option<String>,
    },
    Launch,
    Continue,
    StepOver,
    StepIn,
    StepOut,
    /// Wait for the next stop or the end of the session
    Await {
        /// Seconds; 30 when omitted
        timeout: Option<u64>,
        expect: Option<StopExpectation>,
    },
    /// Check variables of the current frame's local scope
    InspectLocals {
        asserts: Vec<VariableAssertion>,
    },
    InspectStack {
        asserts: Vec<FrameAssertion>,
    },
    /// Match the concatenated program output
    CheckOutput {
        contains: Option<String>,
        /// Compared after trimming surrounding whitespace
        equals: Option<String>,
    },
    /// Evaluate in the current frame
    Evaluate {
        expression: String,
        expect: Option<EvaluateExpectation>,
    },
    Terminate,
}

/// What an `await` step expects
#[derive(Deserialize, Debug)]
pub struct StopExpectation {
    /// Substring of the stop reason; a finished session reports "exited"
    pub reason: Option<String>,
    /// Substring of the top frame's source path
    pub file: Option<String>,
    pub line: Option<u32>,
    pub exit_code: Option<i64>,
    pub thread_id: Option<i64>,
}

#[derive(Deserialize, Debug)]
pub struct VariableAssertion {
    pub name: String,
    pub value: Option<String>,
    pub value_contains: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct FrameAssertion {
    /// 0 is the innermost frame
    pub index: usize,
    /// Substring of the frame name
    pub function: Option<String>,
    pub file: Option<String>,
    /// Expected line number
    pub line: Option<u32>,
}

/// What an `evaluate` step expects
#[derive(Deserialize, Debug)]
pub struct EvaluateExpectation {
    /// `false` expects the evaluation to fail
    pub success: Option<bool>,
    /// Error code of the expected failure, e.g. `ADAPTER_ERROR`
    pub code: Option<String>,
    /// Expected result value
    pub result: Option<String>,
    pub result_contains: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: demo
target:
  program: ../fixtures/demo.py
steps:
  - action: break
    file: demo.py
    line: 5
  - action: launch
  - action: await
    expect:
      reason: breakpoint
      line: 5
  - action: evaluate
    expression: a + b
    expect:
      result: "5"
  - action: step_over
  - action: terminate
"#;
        let scenario: TestScenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.name, "demo");
        assert!(scenario.adapter.is_none());
        assert_eq!(scenario.steps.len(), 6);
        assert!(matches!(scenario.steps[0], TestStep::Break { line: 5, .. }));
        assert!(matches!(scenario.steps[4], TestStep::StepOver));
    }
}
