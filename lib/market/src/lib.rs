//! Market data tools for tickertalk.
//!
//! Two tools are exposed to the model: end-of-day price history and ticker
//! symbol lookup. Both delegate to a [`MarketDataProvider`]; the HTTP client
//! behind it is supplied by the embedding application.

pub mod error;
pub mod provider;
pub mod tools;

pub use error::ProviderError;
pub use provider::{EodPrice, EodQuery, MarketDataProvider, Order, Period, SymbolRecord};
pub use tools::{GetEodHistoricalData, GetStockSymbol, register_market_tools};
