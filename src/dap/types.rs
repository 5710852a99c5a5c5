//! DAP message types
//!
//! Only the subset of the Debug Adapter Protocol the bridge speaks is modeled.
//! See: https://microsoft.github.io/debug-adapter-protocol/specification

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// === Base Protocol Messages ===

/// One DAP frame, discriminated by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(RequestMessage),
    Response(ResponseMessage),
    Event(EventMessage),
}

impl ProtocolMessage {
    pub fn seq(&self) -> i64 {
        match self {
            ProtocolMessage::Request(r) => r.seq,
            ProtocolMessage::Response(r) => r.seq,
            ProtocolMessage::Event(e) => e.seq,
        }
    }
}

/// DAP request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub seq: i64,
    pub command: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub arguments: Option<Value>,
}

/// DAP response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub seq: i64,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

impl ResponseMessage {
    /// Human readable failure text of an unsuccessful response
    ///
    /// Adapters put the detail either in `message` or in a structured
    /// `body.error.format`; the latter is preferred when present because
    /// `message` is often only a short code like "cancelled".
    pub fn error_text(&self) -> String {
        let formatted = self
            .body
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(|e| e.get("format"))
            .and_then(|f| f.as_str());

        match (formatted, self.message.as_deref()) {
            (Some(f), _) => f.to_string(),
            (None, Some(m)) if !m.is_empty() => m.to_string(),
            _ => "unknown error".to_string(),
        }
    }
}

/// DAP event message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub seq: i64,
    pub event: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

/// An explicit `null` payload decodes as `Some(Null)`; only a missing field
/// is `None`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// === Request Arguments ===

/// Initialize request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_format: Option<String>,
    #[serde(default)]
    pub supports_variable_type: bool,
    #[serde(default)]
    pub supports_run_in_terminal_request: bool,
}

impl InitializeArguments {
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self {
            client_id: Some("dap-bridge".to_string()),
            client_name: Some("DAP Bridge".to_string()),
            adapter_id: adapter_id.into(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: Some("path".to_string()),
            supports_variable_type: true,
            supports_run_in_terminal_request: false,
        }
    }
}

/// Launch request arguments
///
/// Adapter-specific keys (`justMyCode`, `console`, ...) ride along in
/// `extra` and are flattened into the request object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_debug: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// SetBreakpoints request arguments
///
/// `breakpoints` is always sent: an empty list is how a file's breakpoints
/// are cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
    #[serde(default)]
    pub source_modified: bool,
}

/// Arguments shared by continue, next, stepIn, stepOut and pause
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: i64,
}

/// StackTrace request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

/// Scopes request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

/// Variables request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

/// Evaluate request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Disconnect request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(default)]
    pub restart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_debuggee: Option<bool>,
}

// === Response Bodies ===

/// Capabilities returned by initialize response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub supports_configuration_done_request: bool,
    #[serde(default)]
    pub supports_conditional_breakpoints: bool,
    #[serde(default)]
    pub supports_hit_conditional_breakpoints: bool,
    #[serde(default)]
    pub supports_evaluate_for_hovers: bool,
    #[serde(default)]
    pub supports_set_variable: bool,
    #[serde(default)]
    pub supports_terminate_request: bool,
}

/// SetBreakpoints response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

/// StackTrace response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// Threads response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

/// Scopes response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

/// Variables response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablesResponseBody {
    pub variables: Vec<Variable>,
}

/// Evaluate response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    pub result: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

// === Common Types ===

/// Source location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
}

impl Source {
    /// Source addressed by filesystem path, named after its file name
    pub fn from_path(path: &std::path::Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            path: Some(path.to_string_lossy().into_owned()),
            source_reference: None,
        }
    }
}

/// Breakpoint to set at a source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Breakpoint as reported by the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl StackFrame {
    pub fn source_path(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.path.as_deref())
    }
}

/// Thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

/// Scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    #[serde(default)]
    pub expensive: bool,
}

/// Variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

// === Event Bodies ===

/// Stopped event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub all_threads_stopped: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hit_breakpoint_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Output event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEventBody {
    #[serde(default)]
    pub category: Option<String>,
    pub output: String,
}

/// Breakpoint event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointEventBody {
    pub reason: String,
    pub breakpoint: Breakpoint,
}

/// Process event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_process_id: Option<i64>,
}

// === Parsed Events ===

/// Parsed DAP event
///
/// Events with an unrecognized name, or a body that does not match the
/// expected shape, become [`Event::Unknown`] and are ignored by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Continued { thread_id: Option<i64>, all_threads_continued: bool },
    Exited { exit_code: Option<i64> },
    Terminated,
    Output(OutputEventBody),
    Breakpoint(BreakpointEventBody),
    Process(ProcessEventBody),
    Unknown { event: String, body: Option<Value> },
}

impl Event {
    /// Parse an event from an EventMessage
    pub fn from_message(msg: &EventMessage) -> Self {
        let parsed = match msg.event.as_str() {
            "initialized" => Some(Event::Initialized),
            "terminated" => Some(Event::Terminated),
            "stopped" => body_as(msg).map(Event::Stopped),
            "output" => body_as(msg).map(Event::Output),
            "breakpoint" => body_as(msg).map(Event::Breakpoint),
            "process" => body_as(msg).map(Event::Process),
            "continued" => Some(Event::Continued {
                thread_id: field(msg, "threadId").and_then(Value::as_i64),
                all_threads_continued: field(msg, "allThreadsContinued")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            }),
            "exited" => Some(Event::Exited {
                exit_code: field(msg, "exitCode").and_then(Value::as_i64),
            }),
            _ => None,
        };

        parsed.unwrap_or_else(|| Event::Unknown {
            event: msg.event.clone(),
            body: msg.body.clone(),
        })
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &str {
        match self {
            Event::Initialized => "initialized",
            Event::Stopped(_) => "stopped",
            Event::Continued { .. } => "continued",
            Event::Exited { .. } => "exited",
            Event::Terminated => "terminated",
            Event::Output(_) => "output",
            Event::Breakpoint(_) => "breakpoint",
            Event::Process(_) => "process",
            Event::Unknown { event, .. } => event,
        }
    }
}

fn body_as<T: serde::de::DeserializeOwned>(msg: &EventMessage) -> Option<T> {
    msg.body
        .as_ref()
        .and_then(|b| serde_json::from_value(b.clone()).ok())
}

fn field<'a>(msg: &'a EventMessage, key: &str) -> Option<&'a Value> {
    msg.body.as_ref().and_then(|b| b.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_tagging() {
        let msg: ProtocolMessage = serde_json::from_value(json!({
            "seq": 4, "type": "response", "request_seq": 2, "success": true,
            "command": "threads", "body": {"threads": []}
        }))
        .unwrap();
        match msg {
            ProtocolMessage::Response(r) => {
                assert_eq!(r.request_seq, 2);
                assert!(r.success);
            }
            other => panic!("unexpected {:?}", other),
        }

        let encoded = serde_json::to_value(ProtocolMessage::Request(RequestMessage {
            seq: 1,
            command: "initialize".into(),
            arguments: None,
        }))
        .unwrap();
        assert_eq!(encoded, json!({"seq": 1, "type": "request", "command": "initialize"}));
    }

    #[test]
    fn test_error_text_prefers_formatted_body() {
        let mut resp = ResponseMessage {
            seq: 9,
            request_seq: 3,
            success: false,
            command: "evaluate".into(),
            message: Some("error".into()),
            body: Some(json!({"error": {"id": 1, "format": "name 'c' is not defined"}})),
        };
        assert_eq!(resp.error_text(), "name 'c' is not defined");

        resp.body = None;
        assert_eq!(resp.error_text(), "error");

        resp.message = None;
        assert_eq!(resp.error_text(), "unknown error");
    }

    #[test]
    fn test_launch_extra_is_flattened() {
        let mut args = LaunchArguments {
            program: "/tmp/demo.py".into(),
            ..Default::default()
        };
        args.extra.insert("justMyCode".into(), json!(false));

        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["program"], "/tmp/demo.py");
        assert_eq!(value["justMyCode"], false);
        assert_eq!(value["stopOnEntry"], false);
        assert!(value.get("noDebug").is_none());
    }

    #[test]
    fn test_clearing_sends_empty_breakpoint_list() {
        let args = SetBreakpointsArguments {
            source: Source::from_path(std::path::Path::new("/src/demo.py")),
            breakpoints: Vec::new(),
            source_modified: false,
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["breakpoints"], json!([]));
        assert_eq!(value["source"]["name"], "demo.py");
    }

    #[test]
    fn test_event_parsing() {
        let stopped = EventMessage {
            seq: 1,
            event: "stopped".into(),
            body: Some(json!({"reason": "breakpoint", "threadId": 1, "hitBreakpointIds": [7]})),
        };
        match Event::from_message(&stopped) {
            Event::Stopped(body) => {
                assert_eq!(body.thread_id, Some(1));
                assert_eq!(body.hit_breakpoint_ids, vec![7]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let exited = EventMessage {
            seq: 2,
            event: "exited".into(),
            body: Some(json!({"exitCode": 3})),
        };
        assert_eq!(Event::from_message(&exited), Event::Exited { exit_code: Some(3) });

        let malformed = EventMessage {
            seq: 3,
            event: "stopped".into(),
            body: None,
        };
        let event = Event::from_message(&malformed);
        assert!(matches!(event, Event::Unknown { .. }));
        assert_eq!(event.name(), "stopped");

        let custom = EventMessage {
            seq: 4,
            event: "debugpyWaitingForServer".into(),
            body: None,
        };
        assert_eq!(Event::from_message(&custom).name(), "debugpyWaitingForServer");
    }
}
