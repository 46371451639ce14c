//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `HistoryError`: Rejected history appends
//! - `ToolError`: Tool registration and dispatch failures
//! - `SessionError`: Session lifecycle violations

use tickertalk_core::ConversationSessionId;
use std::fmt;

/// Errors from appending to a conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A tool message was appended without a tool call id.
    MissingToolCallId,
    /// A tool message references a tool call no earlier assistant message made.
    UnknownToolCall { tool_call_id: String },
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToolCallId => write!(f, "tool message has no tool_call_id"),
            Self::UnknownToolCall { tool_call_id } => {
                write!(
                    f,
                    "tool message references unknown tool call '{tool_call_id}'"
                )
            }
        }
    }
}

impl std::error::Error for HistoryError {}

/// Errors from tool registration and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The serialized argument string is not a JSON object.
    MalformedArguments { name: String, reason: String },
    /// The arguments parsed but do not fit the declared parameters.
    InvalidArguments { name: String, reason: String },
    /// The tool implementation failed.
    ExecutionFailed { name: String, reason: String },
    /// The tool implementation did not finish in time.
    Timeout { name: String, after_ms: u64 },
    /// A descriptor failed validation at registration.
    InvalidDescriptor { name: String, reason: String },
    /// A tool with this name is already registered.
    DuplicateTool { name: String },
}

impl ToolError {
    /// Returns the name of the tool the error concerns.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::MalformedArguments { name, .. }
            | Self::InvalidArguments { name, .. }
            | Self::ExecutionFailed { name, .. }
            | Self::Timeout { name, .. }
            | Self::InvalidDescriptor { name, .. }
            | Self::DuplicateTool { name } => name,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedArguments { name, reason } => {
                write!(f, "malformed arguments for tool '{name}': {reason}")
            }
            Self::InvalidArguments { name, reason } => {
                write!(f, "invalid arguments for tool '{name}': {reason}")
            }
            Self::ExecutionFailed { name, reason } => {
                write!(f, "tool '{name}' execution failed: {reason}")
            }
            Self::Timeout { name, after_ms } => {
                write!(f, "tool '{name}' timed out after {after_ms}ms")
            }
            Self::InvalidDescriptor { name, reason } => {
                write!(f, "invalid descriptor for tool '{name}': {reason}")
            }
            Self::DuplicateTool { name } => {
                write!(f, "tool '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors from session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session has ended and accepts no further turns.
    Ended { id: ConversationSessionId },
    /// Invalid turn state transition.
    InvalidStateTransition { from: String, to: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ended { id } => write!(f, "session ended: {id}"),
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid turn state transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for SessionError {}
