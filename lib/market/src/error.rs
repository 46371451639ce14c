//! Error types for the market crate.

use std::fmt;

/// Errors from a market data provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Connection to the provider failed.
    ConnectionFailed { reason: String },
    /// The provider rejected the API token.
    AuthenticationFailed { reason: String },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// The provider does not know the symbol.
    UnknownSymbol { symbol: String },
    /// The provider does not know the exchange.
    UnknownExchange { exchange: String },
    /// The response could not be decoded.
    InvalidResponse { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "market data connection failed: {reason}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "market data authentication failed: {reason}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::UnknownSymbol { symbol } => write!(f, "unknown symbol: {symbol}"),
            Self::UnknownExchange { exchange } => write!(f, "unknown exchange: {exchange}"),
            Self::InvalidResponse { reason } => {
                write!(f, "invalid market data response: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}
