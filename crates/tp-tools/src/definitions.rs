use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, Instrument};

use tp_telemetry::metrics::{global_metrics, TOOL_CALLS, TOOL_CALL_DURATION};
use tp_telemetry::tracing_setup::create_tool_span;

use crate::protocol::{ToolAnnotations, ToolCallRequest, ToolCallResult, ToolDefinition};
use crate::terminal::{
    ExecCommandRequest, KillSessionRequest, TerminalTools, ToolOutcome, WriteStdinRequest,
};

pub const EXEC_COMMAND: &str = "exec_command";
pub const WRITE_STDIN: &str = "write_stdin";
pub const KILL_SESSION: &str = "kill_session";
pub const LIST_SESSIONS: &str = "list_sessions";

/// Every terminal tool, in the order they are advertised.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        exec_command_tool(),
        write_stdin_tool(),
        kill_session_tool(),
        list_sessions_tool(),
    ]
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

fn output_cap_properties() -> serde_json::Value {
    json!({
        "max_output_lines": {
            "type": "integer",
            "minimum": 0,
            "description": "Keep at most this many lines (head and tail) of output"
        },
        "max_output_tokens": {
            "type": "integer",
            "minimum": 0,
            "description": "Approximate token budget for the returned output"
        }
    })
}

fn with_caps(mut properties: serde_json::Value) -> serde_json::Value {
    if let (Some(props), serde_json::Value::Object(caps)) =
        (properties.as_object_mut(), output_cap_properties())
    {
        props.extend(caps);
    }
    properties
}

fn exec_command_tool() -> ToolDefinition {
    ToolDefinition {
        name: EXEC_COMMAND.to_string(),
        description: "Run a shell command on a pseudo-terminal. Returns its output if it finishes \
                      within yield_time_ms; otherwise returns a session_id for write_stdin."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": with_caps(json!({
                "cmd": {
                    "type": "string",
                    "description": "Command line passed to the shell"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (default: the host's current directory)"
                },
                "shell": {
                    "type": "string",
                    "description": "Shell to run the command with (default: configured shell)"
                },
                "yield_time_ms": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "How long to wait for output before returning (default: 10000)"
                }
            })),
            "required": ["cmd"]
        }),
        annotations: Some(ToolAnnotations {
            read_only_hint: Some(false),
            destructive_hint: Some(true),
            idempotent_hint: Some(false),
        }),
    }
}

fn write_stdin_tool() -> ToolDefinition {
    ToolDefinition {
        name: WRITE_STDIN.to_string(),
        description: "Send characters to a running session and return new output. Send an \
                      empty string to poll."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": with_caps(json!({
                "session_id": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Session returned by exec_command"
                },
                "chars": {
                    "type": "string",
                    "description": "Bytes to write, including any trailing newline (default: empty)"
                },
                "yield_time_ms": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "How long to wait for output (default: 250)"
                }
            })),
            "required": ["session_id"]
        }),
        annotations: Some(ToolAnnotations {
            read_only_hint: Some(false),
            destructive_hint: Some(true),
            idempotent_hint: Some(false),
        }),
    }
}

fn kill_session_tool() -> ToolDefinition {
    ToolDefinition {
        name: KILL_SESSION.to_string(),
        description: "Terminate a session's process and remove the session.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Session to terminate"
                }
            },
            "required": ["session_id"]
        }),
        annotations: Some(ToolAnnotations {
            read_only_hint: Some(false),
            destructive_hint: Some(true),
            idempotent_hint: Some(true),
        }),
    }
}

fn list_sessions_tool() -> ToolDefinition {
    ToolDefinition {
        name: LIST_SESSIONS.to_string(),
        description: "List all terminal sessions with their command, status and idle time."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {}
        }),
        annotations: Some(ToolAnnotations {
            read_only_hint: Some(true),
            destructive_hint: Some(false),
            idempotent_hint: Some(true),
        }),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Route a named tool call to the terminal tools.
///
/// Unknown tools and malformed arguments come back as error results; this
/// never fails outright.
pub async fn dispatch(tools: &TerminalTools, request: &ToolCallRequest) -> ToolCallResult {
    let (span, trace_id) = create_tool_span(&request.name);
    let started = Instant::now();

    let result = async {
        match request.name.as_str() {
            EXEC_COMMAND => match parse::<ExecCommandRequest>(&request.arguments) {
                Ok(req) => to_result(tools.exec_command(req).await),
                Err(e) => e,
            },
            WRITE_STDIN => match parse::<WriteStdinRequest>(&request.arguments) {
                Ok(req) => to_result(tools.write_stdin(req).await),
                Err(e) => e,
            },
            KILL_SESSION => match parse::<KillSessionRequest>(&request.arguments) {
                Ok(req) => to_result(tools.kill_session(req).await),
                Err(e) => e,
            },
            LIST_SESSIONS => to_result(tools.list_sessions().await),
            other => ToolCallResult::error(format!("unknown tool: {other}")),
        }
    }
    .instrument(span)
    .await;

    let elapsed = started.elapsed();
    let status = if result.is_error { "error" } else { "ok" };
    let metrics = global_metrics();
    metrics.increment_counter(TOOL_CALLS, &[("tool", request.name.as_str()), ("status", status)]);
    metrics.record_duration(TOOL_CALL_DURATION, elapsed.as_secs_f64());
    info!(
        tool = %request.name,
        %trace_id,
        is_error = result.is_error,
        duration_ms = elapsed.as_millis() as u64,
        "executed tool"
    );
    result
}

fn parse<T: DeserializeOwned>(arguments: &serde_json::Value) -> Result<T, ToolCallResult> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolCallResult::error(format!("invalid arguments: {e}")))
}

fn to_result(outcome: ToolOutcome) -> ToolCallResult {
    let is_error = outcome.is_error();
    match serde_json::to_string(&outcome) {
        Ok(text) => ToolCallResult {
            is_error,
            ..ToolCallResult::text(text)
        },
        Err(e) => ToolCallResult::error(format!("failed to encode result: {e}")),
    }
}
