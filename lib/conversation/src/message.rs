//! Message types for conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tickertalk_core::MessageId;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions.
    System,
    /// User/human message.
    User,
    /// Assistant/AI message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl MessageRole {
    /// Returns the role name used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message role.
    pub role: MessageRole,
    /// Text content. Tool messages carry their serialized result here.
    pub content: Option<String>,
    /// Tool calls requested by an assistant message, in arrival order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: the tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: the name of the tool that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: Option<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, Some(content.into()))
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, Some(content.into()))
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, Some(content.into()))
    }

    /// Creates an assistant message that carries only tool calls.
    #[must_use]
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, None);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Creates a tool result message answering `tool_call_id`.
    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(MessageRole::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// Adds a tool call.
    #[must_use]
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    /// Returns true if this message has tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Returns the text content if it is present and non-empty.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Returns true for assistant messages that requested tools but said nothing.
    #[must_use]
    pub fn is_tool_call_only(&self) -> bool {
        self.has_tool_calls() && self.text().is_none()
    }

    /// Returns true if a presentation layer should show this message.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        matches!(self.role, MessageRole::User | MessageRole::Assistant)
            && !self.is_tool_call_only()
            && self.text().is_some()
    }

    /// Converts the message to the chat-completion wire format.
    #[must_use]
    pub fn to_wire(&self) -> JsonValue {
        let mut wire = serde_json::Map::new();
        wire.insert("role".to_string(), self.role.as_str().into());
        wire.insert(
            "content".to_string(),
            self.content.clone().map_or(JsonValue::Null, JsonValue::String),
        );
        if self.has_tool_calls() {
            wire.insert(
                "tool_calls".to_string(),
                self.tool_calls.iter().map(ToolCall::to_wire).collect(),
            );
        }
        if let Some(ref id) = self.tool_call_id {
            wire.insert("tool_call_id".to_string(), id.clone().into());
        }
        if let Some(ref name) = self.name {
            wire.insert("name".to_string(), name.clone().into());
        }
        JsonValue::Object(wire)
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier for this tool call.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// Arguments as the serialized JSON string the model produced.
    pub arguments: String,
}

impl ToolCall {
    /// Creates a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Converts the call to the chat-completion wire format.
    #[must_use]
    pub fn to_wire(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments,
            }
        })
    }
}
