//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `LlmError`: Completion endpoint failures
//! - `TurnError`: Turn-level failures (wraps lower errors via context)

use std::fmt;
use tickertalk_core::ConversationSessionId;

/// Errors from the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Provider is unavailable.
    ProviderUnavailable { provider: String, reason: String },
    /// Request failed.
    RequestFailed { reason: String },
    /// The response stream broke or carried an unreadable chunk.
    StreamFailed { reason: String },
    /// Timeout waiting for the stream to open or for the next delta.
    Timeout { after_ms: u64 },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl LlmError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. }
                | Self::RequestFailed { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
        )
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "LLM provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::StreamFailed { reason } => {
                write!(f, "LLM response stream failed: {reason}")
            }
            Self::Timeout { after_ms } => write!(f, "LLM request timed out after {after_ms}ms"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors that end a user turn.
///
/// Tool failures never appear here; they are written into the conversation
/// for the model to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// The session has ended.
    SessionEnded { session_id: ConversationSessionId },
    /// The session is already inside a turn.
    TurnInProgress { session_id: ConversationSessionId },
    /// The completion endpoint failed (use as context wrapper).
    Completion {
        session_id: ConversationSessionId,
        round: u32,
    },
    /// The turn was cancelled by the caller.
    Cancelled { session_id: ConversationSessionId },
    /// The history rejected a message (use as context wrapper).
    History { session_id: ConversationSessionId },
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionEnded { session_id } => write!(f, "session {session_id} has ended"),
            Self::TurnInProgress { session_id } => {
                write!(f, "session {session_id} is already processing a turn")
            }
            Self::Completion { session_id, round } => {
                write!(f, "completion round {round} failed for session {session_id}")
            }
            Self::Cancelled { session_id } => {
                write!(f, "turn cancelled for session {session_id}")
            }
            Self::History { session_id } => {
                write!(f, "history update failed for session {session_id}")
            }
        }
    }
}

impl std::error::Error for TurnError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_display() {
        let err = LlmError::ProviderUnavailable {
            provider: "groq".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("groq"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Timeout { after_ms: 10 }.is_retryable());
        assert!(LlmError::RateLimited { retry_after_secs: None }.is_retryable());
        assert!(!LlmError::StreamFailed { reason: "eof".to_string() }.is_retryable());
        assert!(!LlmError::InvalidConfig { reason: "x".to_string() }.is_retryable());
    }

    #[test]
    fn turn_error_display() {
        let session_id = ConversationSessionId::new();
        let err = TurnError::Completion {
            session_id,
            round: 3,
        };
        assert!(err.to_string().contains("round 3"));
        assert!(err.to_string().contains(&session_id.to_string()));
    }
}
