//! Core types shared by the tickertalk crates.
//!
//! This crate provides the strongly-typed identifiers used across the
//! conversation and AI layers, plus the `Result` alias built on rootcause.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConversationSessionId, MessageId, ParseIdError, TurnId};
