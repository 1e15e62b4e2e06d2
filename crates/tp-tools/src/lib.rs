//! Agent-facing terminal tools.
//!
//! [`terminal::TerminalTools`] implements `exec_command`, `write_stdin`,
//! `kill_session` and `list_sessions` on top of a shared
//! [`tp_session::SessionRegistry`]. [`definitions`] describes those tools
//! with JSON Schemas and routes named JSON calls onto them.

pub mod definitions;
pub mod protocol;
pub mod terminal;

pub use definitions::{dispatch, tool_definitions};
pub use protocol::{ToolAnnotations, ToolCallRequest, ToolCallResult, ToolDefinition};
pub use terminal::{
    ExecCommandRequest, KillSessionRequest, OutcomeStatus, TerminalTools, ToolOutcome, Truncation,
    WriteStdinRequest,
};
