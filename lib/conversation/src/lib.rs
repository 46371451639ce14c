//! Conversation layer for tickertalk.
//!
//! This crate provides:
//!
//! - **Messages and history**: the append-only record of a conversation
//! - **Tool descriptors**: what the model is told about each tool
//! - **Tool registry**: name-to-handler dispatch for the model's tool calls
//! - **Session context**: per-session state handed to the orchestrator

pub mod error;
pub mod history;
pub mod message;
pub mod registry;
pub mod session;
pub mod tool;

pub use error::{HistoryError, SessionError, ToolError};
pub use history::{History, VisibleMessages};
pub use message::{Message, MessageRole, ToolCall};
pub use registry::{JsonMap, ToolHandler, ToolRegistry, TypedTool};
pub use session::{SessionContext, SessionState, TurnState};
pub use tool::{ParameterSchema, ParameterType, ToolDescriptor};
