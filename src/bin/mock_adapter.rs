//! Mock DAP adapter binary for integration testing
//!
//! Implements a minimal Debug Adapter Protocol server that "runs" a tiny
//! line-oriented program: `name = expr` assignments and `print(expr)` calls
//! over integer expressions. Blank lines and `#` comments are not
//! executable. Used for testing without a real debugger.

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use dap_bridge::dap::codec::{read_message, write_message};
use dap_bridge::dap::{EventMessage, ProtocolMessage, RequestMessage, ResponseMessage};
use tokio::io::BufReader;

const THREAD_ID: i64 = 1;
const LOCALS_REF: i64 = 1;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    let mut state = MockState::default();

    loop {
        let request = match read_message(&mut reader).await {
            Ok(Some(ProtocolMessage::Request(request))) => request,
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                eprintln!("mock_adapter: {}", e);
                break;
            }
        };

        let done = request.command == "disconnect";
        for message in state.handle(&request) {
            if write_message(&mut writer, &message).await.is_err() {
                return;
            }
        }
        if done {
            break;
        }
    }
}

#[derive(Debug, Clone)]
struct MockBreakpoint {
    id: i64,
    line: u32,
    condition: Option<String>,
}

#[derive(Default)]
struct MockState {
    seq: i64,
    next_breakpoint_id: i64,
    program: Option<String>,
    lines: Vec<String>,
    /// Next line to execute (1-based)
    line: u32,
    variables: BTreeMap<String, i64>,
    breakpoints: HashMap<String, Vec<MockBreakpoint>>,
    stop_on_entry: bool,
    finished: bool,
    out: Vec<ProtocolMessage>,
}

impl MockState {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn respond(&mut self, request: &RequestMessage, result: Result<Value, String>) {
        let seq = self.next_seq();
        let response = match result {
            Ok(body) => ResponseMessage {
                seq,
                request_seq: request.seq,
                success: true,
                command: request.command.clone(),
                message: None,
                body: (!body.is_null()).then_some(body),
            },
            Err(message) => ResponseMessage {
                seq,
                request_seq: request.seq,
                success: false,
                command: request.command.clone(),
                message: Some(message.clone()),
                body: Some(json!({ "error": { "id": 1, "format": message } })),
            },
        };
        self.out.push(ProtocolMessage::Response(response));
    }

    fn event(&mut self, event: &str, body: Option<Value>) {
        let seq = self.next_seq();
        self.out.push(ProtocolMessage::Event(EventMessage {
            seq,
            event: event.to_string(),
            body,
        }));
    }

    fn handle(&mut self, request: &RequestMessage) -> Vec<ProtocolMessage> {
        let args = request.arguments.clone().unwrap_or_else(|| json!({}));

        match request.command.as_str() {
            "initialize" => {
                self.respond(
                    request,
                    Ok(json!({
                        "supportsConfigurationDoneRequest": true,
                        "supportsConditionalBreakpoints": true,
                        "supportsEvaluateForHovers": true,
                        "supportsTerminateRequest": true
                    })),
                );
                self.event("initialized", None);
            }
            "launch" => match self.launch(&args) {
                Ok(()) => {
                    self.respond(request, Ok(Value::Null));
                    let name = self.program.clone().unwrap_or_default();
                    self.event("process", Some(json!({ "name": name })));
                }
                Err(e) => self.respond(request, Err(e)),
            },
            "setBreakpoints" => {
                let body = self.set_breakpoints(&args);
                self.respond(request, Ok(body));
            }
            "configurationDone" => {
                self.respond(request, Ok(Value::Null));
                if self.program.is_some() {
                    if self.stop_on_entry {
                        self.stopped("entry", None);
                    } else {
                        self.run(false);
                    }
                }
            }
            "threads" => {
                self.respond(
                    request,
                    Ok(json!({ "threads": [{ "id": THREAD_ID, "name": "MainThread" }] })),
                );
            }
            "continue" => {
                if self.require_stopped(request) {
                    self.respond(request, Ok(json!({ "allThreadsContinued": true })));
                    self.event(
                        "continued",
                        Some(json!({ "threadId": THREAD_ID, "allThreadsContinued": true })),
                    );
                    self.run(true);
                }
            }
            "next" | "stepIn" | "stepOut" => {
                if self.require_stopped(request) {
                    self.respond(request, Ok(Value::Null));
                    self.step();
                }
            }
            "pause" => {
                self.respond(request, Ok(Value::Null));
                if !self.finished {
                    self.stopped("pause", None);
                }
            }
            "stackTrace" => {
                let path = self.program.clone().unwrap_or_default();
                let name = PathBuf::from(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.respond(
                    request,
                    Ok(json!({
                        "stackFrames": [{
                            "id": 1,
                            "name": "<module>",
                            "source": { "name": name, "path": path },
                            "line": self.line,
                            "column": 1
                        }],
                        "totalFrames": 1
                    })),
                );
            }
            "scopes" => {
                self.respond(
                    request,
                    Ok(json!({
                        "scopes": [{
                            "name": "Locals",
                            "variablesReference": LOCALS_REF,
                            "expensive": false
                        }]
                    })),
                );
            }
            "variables" => {
                let reference = args
                    .get("variablesReference")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let variables: Vec<Value> = if reference == LOCALS_REF {
                    self.variables
                        .iter()
                        .map(|(name, value)| {
                            json!({
                                "name": name,
                                "value": value.to_string(),
                                "type": "int",
                                "variablesReference": 0
                            })
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                self.respond(request, Ok(json!({ "variables": variables })));
            }
            "evaluate" => {
                let expression = args
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let result = eval(expression, &self.variables).map(|value| {
                    json!({
                        "result": value.to_string(),
                        "type": "int",
                        "variablesReference": 0
                    })
                });
                self.respond(request, result);
            }
            "terminate" => {
                self.respond(request, Ok(Value::Null));
                if !self.finished {
                    self.finished = true;
                    self.event("terminated", None);
                }
            }
            "disconnect" => {
                self.respond(request, Ok(Value::Null));
            }
            other => {
                let message = format!("Unknown command: {}", other);
                self.respond(request, Err(message));
            }
        }

        std::mem::take(&mut self.out)
    }

    fn launch(&mut self, args: &Value) -> Result<(), String> {
        let program = args
            .get("program")
            .and_then(Value::as_str)
            .ok_or_else(|| "launch requires 'program'".to_string())?;
        let source = std::fs::read_to_string(program)
            .map_err(|e| format!("cannot read program '{}': {}", program, e))?;

        self.lines = source.lines().map(str::to_string).collect();
        self.program = Some(program.to_string());
        self.stop_on_entry = args
            .get("stopOnEntry")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.line = self.next_executable(1);
        Ok(())
    }

    fn set_breakpoints(&mut self, args: &Value) -> Value {
        let path = args
            .get("source")
            .and_then(|s| s.get("path"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let requested = args
            .get("breakpoints")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // Verify against the file on disk; it may not be launched yet
        let lines: Vec<String> = std::fs::read_to_string(&path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default();

        let mut accepted = Vec::new();
        let mut results = Vec::new();
        for bp in &requested {
            let line = bp.get("line").and_then(Value::as_u64).unwrap_or(0) as u32;
            let condition = bp
                .get("condition")
                .and_then(Value::as_str)
                .map(str::to_string);

            if is_executable(lines.get((line as usize).wrapping_sub(1)).map(String::as_str)) {
                self.next_breakpoint_id += 1;
                let id = self.next_breakpoint_id;
                accepted.push(MockBreakpoint {
                    id,
                    line,
                    condition,
                });
                results.push(json!({
                    "id": id,
                    "verified": true,
                    "line": line,
                    "source": { "path": path }
                }));
            } else {
                results.push(json!({
                    "verified": false,
                    "line": line,
                    "message": "no executable code on this line"
                }));
            }
        }

        self.breakpoints.insert(path, accepted);
        json!({ "breakpoints": results })
    }

    fn require_stopped(&mut self, request: &RequestMessage) -> bool {
        if self.finished || self.program.is_none() {
            self.respond(request, Err("program is not running".to_string()));
            return false;
        }
        true
    }

    fn next_executable(&self, from: u32) -> u32 {
        let mut line = from;
        while (line as usize) <= self.lines.len()
            && !is_executable(self.lines.get(line as usize - 1).map(String::as_str))
        {
            line += 1;
        }
        line
    }

    /// Execute the current line and move to the next executable one
    fn execute_line(&mut self) {
        let Some(text) = self.lines.get(self.line as usize - 1).cloned() else {
            return;
        };
        let text = text.trim();

        if let Some(inner) = text
            .strip_prefix("print(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let output = match eval(inner, &self.variables) {
                Ok(value) => format!("{}\n", value),
                Err(e) => format!("{}\n", e),
            };
            self.event(
                "output",
                Some(json!({ "category": "stdout", "output": output })),
            );
        } else if let Some((name, expr)) = text.split_once('=') {
            if let Ok(value) = eval(expr, &self.variables) {
                self.variables.insert(name.trim().to_string(), value);
            }
        }

        self.line = self.next_executable(self.line + 1);
    }

    fn at_end(&self) -> bool {
        self.line as usize > self.lines.len()
    }

    fn breakpoint_at(&self, line: u32) -> Option<i64> {
        let program = self.program.as_ref()?;
        self.breakpoints
            .get(program)?
            .iter()
            .find(|bp| {
                bp.line == line
                    && bp
                        .condition
                        .as_deref()
                        .map_or(true, |c| eval(c, &self.variables).map(|v| v != 0).unwrap_or(false))
            })
            .map(|bp| bp.id)
    }

    /// Run until a breakpoint or the end of the program
    fn run(&mut self, resuming: bool) {
        let mut first = resuming;
        while !self.at_end() {
            if !first {
                if let Some(id) = self.breakpoint_at(self.line) {
                    self.stopped("breakpoint", Some(id));
                    return;
                }
            }
            first = false;
            self.execute_line();
        }
        self.finish();
    }

    fn step(&mut self) {
        self.execute_line();
        if self.at_end() {
            self.finish();
        } else {
            self.stopped("step", None);
        }
    }

    fn stopped(&mut self, reason: &str, breakpoint: Option<i64>) {
        let mut body = json!({
            "reason": reason,
            "threadId": THREAD_ID,
            "allThreadsStopped": true
        });
        if let Some(id) = breakpoint {
            body["hitBreakpointIds"] = json!([id]);
        }
        self.event("stopped", Some(body));
    }

    fn finish(&mut self) {
        self.finished = true;
        self.event("exited", Some(json!({ "exitCode": 0 })));
        self.event("terminated", None);
    }
}

fn is_executable(line: Option<&str>) -> bool {
    line.map(str::trim)
        .is_some_and(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Evaluate an integer expression: `+ - *`, comparisons, parentheses
fn eval(expression: &str, variables: &BTreeMap<String, i64>) -> Result<i64, String> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        variables,
    };
    let value = parser.comparison()?;
    if parser.pos != tokens.len() {
        return Err(format!("invalid syntax: {}", expression.trim()));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Name(String),
    Op(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse()
                .map_err(|_| format!("invalid number: {}", text))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            if ["==", "!=", "<=", ">="].contains(&two.as_str()) {
                tokens.push(Token::Op(two));
                i += 2;
            } else if "+-*()<>".contains(c) {
                tokens.push(Token::Op(c.to_string()));
                i += 1;
            } else {
                return Err(format!("invalid syntax: unexpected '{}'", c));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    variables: &'a BTreeMap<String, i64>,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op.as_str()),
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<i64, String> {
        let left = self.sum()?;
        let op = match self.peek_op() {
            Some(op @ ("==" | "!=" | "<" | ">" | "<=" | ">=")) => op.to_string(),
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        let result = match op.as_str() {
            "==" => left == right,
            "!=" => left != right,
            "<" => left < right,
            ">" => left > right,
            "<=" => left <= right,
            _ => left >= right,
        };
        Ok(result as i64)
    }

    fn sum(&mut self) -> Result<i64, String> {
        let mut value = self.product()?;
        while let Some(op @ ("+" | "-")) = self.peek_op() {
            let add = op == "+";
            self.pos += 1;
            let rhs = self.product()?;
            value = if add {
                value.wrapping_add(rhs)
            } else {
                value.wrapping_sub(rhs)
            };
        }
        Ok(value)
    }

    fn product(&mut self) -> Result<i64, String> {
        let mut value = self.atom()?;
        while self.peek_op() == Some("*") {
            self.pos += 1;
            value = value.wrapping_mul(self.atom()?);
        }
        Ok(value)
    }

    fn atom(&mut self) -> Result<i64, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "invalid syntax: unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(n),
            Token::Name(name) => self
                .variables
                .get(&name)
                .copied()
                .ok_or_else(|| format!("name '{}' is not defined", name)),
            Token::Op(op) if op == "-" => Ok(self.atom()?.wrapping_neg()),
            Token::Op(op) if op == "(" => {
                let value = self.comparison()?;
                if self.peek_op() != Some(")") {
                    return Err("invalid syntax: missing ')'".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Token::Op(op) => Err(format!("invalid syntax: unexpected '{}'", op)),
        }
    }
}
