//! Completion backend abstraction.
//!
//! The backend is the streaming chat-completion endpoint. Which provider sits
//! behind it, and how it talks HTTP, is the implementor's business.

use crate::error::LlmError;
use crate::stream::StreamDelta;
use async_trait::async_trait;
use futures::stream::BoxStream;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tickertalk_conversation::{Message, ToolDescriptor};

/// Stream of deltas returned by a backend.
pub type DeltaStream = BoxStream<'static, Result<StreamDelta, Report<LlmError>>>;

/// A streaming completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Full conversation, system prompt first.
    pub messages: Vec<Message>,
    /// Tool schemas the model may call, in registration order.
    pub tools: Vec<ToolDescriptor>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether the response is streamed. Always true for requests built here.
    pub stream: bool,
}

impl CompletionRequest {
    /// Creates a deterministic streaming request.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: 0.0,
            stream: true,
        }
    }

    /// Sets the tool schemas.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builds the chat-completion request body.
    ///
    /// `tools` and `tool_choice` are left out when no tools are registered;
    /// several providers reject an empty tool list.
    #[must_use]
    pub fn to_wire(&self) -> JsonValue {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": self.messages.iter().map(Message::to_wire).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "stream": self.stream,
        });
        if !self.tools.is_empty() {
            body["tools"] = self.tools.iter().map(ToolDescriptor::to_wire).collect();
            body["tool_choice"] = "auto".into();
        }
        body
    }
}

/// Trait for completion backends.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Opens a response stream for `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or is refused. Errors
    /// after the stream is open arrive as stream items.
    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, Report<LlmError>>;

    /// Returns a short name for logs.
    fn name(&self) -> &str;
}
