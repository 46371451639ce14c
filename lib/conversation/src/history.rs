//! Append-only conversation history.

use crate::error::HistoryError;
use crate::message::{Message, MessageRole};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// The ordered messages of one session.
///
/// Messages can only be appended. A tool message must answer a tool call made
/// by an earlier assistant message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    messages: Vec<Message>,
    #[serde(skip)]
    issued_calls: HashSet<String>,
}

impl History {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message and returns its position.
    ///
    /// # Errors
    ///
    /// Returns an error if a tool message lacks a `tool_call_id` or
    /// references a call no preceding assistant message made.
    pub fn append(&mut self, message: Message) -> Result<usize, Report<HistoryError>> {
        if message.role == MessageRole::Tool {
            let Some(ref call_id) = message.tool_call_id else {
                return Err(HistoryError::MissingToolCallId.into());
            };
            if !self.has_issued(call_id) {
                return Err(HistoryError::UnknownToolCall {
                    tool_call_id: call_id.clone(),
                }
                .into());
            }
        }

        if message.role == MessageRole::Assistant {
            self.issued_calls
                .extend(message.tool_calls.iter().map(|c| c.id.clone()));
        }
        self.messages.push(message);
        Ok(self.messages.len() - 1)
    }

    fn has_issued(&self, call_id: &str) -> bool {
        if self.issued_calls.contains(call_id) {
            return true;
        }
        // The index is not serialized, so a deserialized history falls back to a scan.
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .any(|c| c.id == call_id)
    }

    /// Returns every message in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the messages appended at or after `mark`.
    #[must_use]
    pub fn since(&self, mark: usize) -> &[Message] {
        self.messages.get(mark..).unwrap_or(&[])
    }

    /// Returns the message at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Returns the last message, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the messages a presentation layer should replay.
    ///
    /// Skips system and tool messages, tool-call-only assistant messages and
    /// anything without text. Calling this again starts over from the
    /// beginning.
    #[must_use]
    pub fn visible_messages(&self) -> VisibleMessages<'_> {
        VisibleMessages {
            inner: self.messages.iter(),
        }
    }

    /// Converts the history to the chat-completion wire format.
    #[must_use]
    pub fn to_wire(&self) -> Vec<JsonValue> {
        self.messages.iter().map(Message::to_wire).collect()
    }
}

/// Iterator over displayable messages. See [`History::visible_messages`].
#[derive(Debug, Clone)]
pub struct VisibleMessages<'a> {
    inner: std::slice::Iter<'a, Message>,
}

impl<'a> Iterator for VisibleMessages<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().find(|m| m.is_visible())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    fn tool_round(history: &mut History) {
        history
            .append(Message::assistant_tool_calls(vec![ToolCall::new(
                "call_1",
                "get_stock_symbol",
                r#"{"exchange":"US"}"#,
            )]))
            .expect("assistant");
        history
            .append(Message::tool_result("call_1", "get_stock_symbol", "[]"))
            .expect("tool");
    }

    #[test]
    fn append_returns_positions_in_order() {
        let mut history = History::new();
        assert_eq!(history.append(Message::user("hi")).expect("append"), 0);
        assert_eq!(history.append(Message::assistant("hello")).expect("append"), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn append_never_touches_earlier_messages() {
        let mut history = History::new();
        history.append(Message::user("first")).expect("append");
        let before = history.messages()[0].clone();

        tool_round(&mut history);
        history.append(Message::assistant("done")).expect("append");

        assert_eq!(history.messages()[0], before);
    }

    #[test]
    fn tool_message_must_reference_a_prior_call() {
        let mut history = History::new();
        history.append(Message::user("hi")).expect("append");

        let err = history
            .append(Message::tool_result("call_404", "get_stock_symbol", "[]"))
            .expect_err("orphan tool message");
        assert_eq!(
            err.current_context(),
            &HistoryError::UnknownToolCall {
                tool_call_id: "call_404".to_string()
            }
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn tool_message_without_call_id_is_rejected() {
        let mut history = History::new();
        let mut msg = Message::tool_result("call_1", "x", "{}");
        msg.tool_call_id = None;

        let err = history.append(msg).expect_err("missing id");
        assert_eq!(err.current_context(), &HistoryError::MissingToolCallId);
    }

    #[test]
    fn visible_messages_filters_tool_traffic_and_empty_text() {
        let mut history = History::new();
        history.append(Message::system("You answer market questions.")).expect("append");
        history.append(Message::user("Find Apple")).expect("append");
        tool_round(&mut history);
        history.append(Message::assistant("")).expect("append");
        history.append(Message::assistant("Apple trades as AAPL.")).expect("append");

        let visible: Vec<_> = history.visible_messages().collect();

        assert!(visible.len() <= history.len());
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|m| m.role != MessageRole::Tool));
        assert!(visible.iter().all(|m| m.text().is_some()));
    }

    #[test]
    fn visible_messages_is_restartable() {
        let mut history = History::new();
        history.append(Message::user("one")).expect("append");
        history.append(Message::assistant("two")).expect("append");

        let first: Vec<_> = history.visible_messages().map(|m| m.id).collect();
        let second: Vec<_> = history.visible_messages().map(|m| m.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn deserialized_history_still_validates_tool_messages() {
        let mut history = History::new();
        history.append(Message::user("hi")).expect("append");
        history
            .append(Message::assistant_tool_calls(vec![ToolCall::new("call_2", "t", "{}")]))
            .expect("append");

        let json = serde_json::to_string(&history).expect("serialize");
        let mut restored: History = serde_json::from_str(&json).expect("deserialize");

        restored
            .append(Message::tool_result("call_2", "t", "{}"))
            .expect("call_2 was issued before serialization");
    }

    #[test]
    fn since_returns_tail() {
        let mut history = History::new();
        history.append(Message::user("a")).expect("append");
        let mark = history.len();
        history.append(Message::assistant("b")).expect("append");

        assert_eq!(history.since(mark).len(), 1);
        assert!(history.since(10).is_empty());
    }
}
