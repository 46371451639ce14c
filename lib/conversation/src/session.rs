//! Conversation session context.
//!
//! A [`SessionContext`] holds everything one conversation needs between
//! turns: its history, the selected model and the turn state. Callers create
//! one per session and pass it explicitly to the orchestrator.

use crate::error::{HistoryError, SessionError};
use crate::history::History;
use crate::message::Message;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use tickertalk_core::ConversationSessionId;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session is active and accepting turns.
    Active,
    /// Session has ended.
    Ended,
}

/// Where a session is within the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for the next user message.
    #[default]
    AwaitingUserInput,
    /// A completion request is in flight.
    StreamingResponse,
    /// The model's tool calls are being dispatched.
    ExecutingTools,
    /// The turn finished; the session goes back to waiting.
    TurnComplete,
}

impl TurnState {
    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (AwaitingUserInput, StreamingResponse)
                | (StreamingResponse, ExecutingTools)
                | (StreamingResponse, TurnComplete)
                | (ExecutingTools, StreamingResponse)
                | (ExecutingTools, TurnComplete)
                | (TurnComplete, AwaitingUserInput)
        )
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::StreamingResponse => "streaming_response",
            Self::ExecutingTools => "executing_tools",
            Self::TurnComplete => "turn_complete",
        };
        f.write_str(name)
    }
}

/// Per-session state passed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Unique session identifier.
    pub id: ConversationSessionId,
    /// Model used for completion requests.
    model: String,
    /// Instructions sent ahead of the history on every request.
    system_prompt: Option<String>,
    history: History,
    state: SessionState,
    turn_state: TurnState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last active.
    pub last_active_at: DateTime<Utc>,
}

impl SessionContext {
    /// Starts a session that talks to `model`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationSessionId::new(),
            model: model.into(),
            system_prompt: None,
            history: History::new(),
            state: SessionState::Active,
            turn_state: TurnState::AwaitingUserInput,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Returns the selected model.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switches the model used for subsequent turns.
    pub fn select_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Returns the system prompt, if any.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Returns the conversation history.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the turn state.
    #[must_use]
    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    /// Appends a message to the history.
    ///
    /// # Errors
    ///
    /// Returns an error if the history rejects the message.
    pub fn append(&mut self, message: Message) -> Result<usize, Report<HistoryError>> {
        let index = self.history.append(message)?;
        self.last_active_at = Utc::now();
        Ok(index)
    }

    /// Moves the turn state machine to `next`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has ended or the transition is illegal.
    pub fn transition(&mut self, next: TurnState) -> Result<(), Report<SessionError>> {
        if self.state == SessionState::Ended {
            return Err(SessionError::Ended { id: self.id }.into());
        }
        if !self.turn_state.can_transition_to(next) {
            return Err(SessionError::InvalidStateTransition {
                from: self.turn_state.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        self.turn_state = next;
        Ok(())
    }

    /// Puts the turn state back to waiting for input, whatever it was.
    ///
    /// Used after a failed turn so the session stays usable.
    pub fn reset_turn(&mut self) {
        self.turn_state = TurnState::AwaitingUserInput;
    }

    /// Returns the request messages: system prompt first, then the history.
    #[must_use]
    pub fn request_messages(&self) -> Vec<Message> {
        self.system_prompt
            .iter()
            .map(Message::system)
            .chain(self.history.messages().iter().cloned())
            .collect()
    }

    /// Ends the session. Further turns are rejected.
    pub fn end(&mut self) {
        self.state = SessionState::Ended;
        self.turn_state = TurnState::AwaitingUserInput;
    }
}
