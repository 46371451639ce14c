//! Completion and tool-calling orchestration for tickertalk.
//!
//! This crate provides:
//!
//! - **Backend**: the streaming chat-completion seam
//! - **Stream aggregation**: text and tool-call fragments folded into a response
//! - **Round controller**: the user-turn loop that alternates completions and tool calls
//!
//! Transport, authentication and provider choice stay behind
//! [`CompletionBackend`].

pub mod backend;
pub mod config;
pub mod error;
pub mod retry;
pub mod stream;
pub mod turn;

pub use backend::{CompletionBackend, CompletionRequest, DeltaStream};
pub use config::{EmptyAssistantContent, OrchestratorConfig};
pub use error::{LlmError, TurnError};
pub use retry::RetryPolicy;
pub use stream::{AggregatedResponse, DeltaAggregator, ResponseStream, StreamDelta, ToolCallFragment};
pub use turn::{NoopObserver, Orchestrator, TurnObserver, TurnOutcome};
