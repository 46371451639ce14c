//! Error handling foundation for tickertalk.
//!
//! Each crate defines its own domain-specific error enums in its own `error`
//! module and carries them in a rootcause [`Report`], adding layer-appropriate
//! context with `.context()` as errors propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
