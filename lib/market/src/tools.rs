//! Model-facing market data tools.

use crate::error::ProviderError;
use crate::provider::{EodPrice, EodQuery, MarketDataProvider, Order, Period, SymbolRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::sync::Arc;
use tickertalk_conversation::{ParameterSchema, ToolDescriptor, ToolError, ToolRegistry, TypedTool};
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Registers both market tools against `provider`.
///
/// # Errors
///
/// Returns an error if either tool name is already registered.
pub fn register_market_tools(
    registry: &mut ToolRegistry,
    provider: Arc<dyn MarketDataProvider>,
) -> Result<(), Report<ToolError>> {
    registry.register(GetEodHistoricalData::new(Arc::clone(&provider)))?;
    registry.register(GetStockSymbol::new(provider))
}

fn provider_failure(tool: &str, err: &Report<ProviderError>) -> Report<ToolError> {
    ToolError::ExecutionFailed {
        name: tool.to_string(),
        reason: err.current_context().to_string(),
    }
    .into()
}

/// Arguments of [`GetEodHistoricalData`].
#[derive(Debug, Deserialize)]
pub struct EodArgs {
    /// Ticker with exchange suffix.
    pub symbol: String,
    /// First day, `YYYY-MM-DD`.
    pub from_date: String,
    /// Last day, `YYYY-MM-DD`.
    pub to_date: String,
    /// Sort order; oldest first when omitted.
    #[serde(default)]
    pub order: Order,
    /// Sampling period; monthly when omitted.
    #[serde(default)]
    pub period: Period,
}

/// End-of-day price history for one symbol.
pub struct GetEodHistoricalData {
    provider: Arc<dyn MarketDataProvider>,
}

impl GetEodHistoricalData {
    pub const NAME: &'static str = "get_eod_historical_stock_market_data";

    #[must_use]
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }

    fn parse_date(field: &str, value: &str) -> Result<NaiveDate, Report<ToolError>> {
        NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
            ToolError::InvalidArguments {
                name: Self::NAME.to_string(),
                reason: format!("{field} must be a YYYY-MM-DD date, got '{value}': {e}"),
            }
            .into()
        })
    }
}

#[async_trait]
impl TypedTool for GetEodHistoricalData {
    type Args = EodArgs;
    type Output = Vec<EodPrice>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "Fetch end-of-day historical prices for a stock, ETF or crypto pair. \
             Symbols carry an exchange suffix, e.g. AAPL.US or BTC-USD.CC.",
        )
        .with_required_parameter(
            "symbol",
            ParameterSchema::string().with_description("Ticker with exchange suffix"),
        )
        .with_required_parameter(
            "from_date",
            ParameterSchema::string().with_description("First day, YYYY-MM-DD"),
        )
        .with_required_parameter(
            "to_date",
            ParameterSchema::string().with_description("Last day, YYYY-MM-DD"),
        )
        .with_optional_parameter(
            "order",
            ParameterSchema::string()
                .with_description("a for oldest first, d for newest first")
                .with_allowed_values(["a", "d"])
                .with_default("a"),
        )
        .with_optional_parameter(
            "period",
            ParameterSchema::string()
                .with_description("d daily, w weekly, m monthly, q quarterly, y yearly")
                .with_allowed_values(["d", "w", "m", "q", "y"])
                .with_default("m"),
        )
    }

    async fn invoke(&self, args: EodArgs) -> Result<Vec<EodPrice>, Report<ToolError>> {
        let from = Self::parse_date("from_date", &args.from_date)?;
        let to = Self::parse_date("to_date", &args.to_date)?;
        if from > to {
            return Err(ToolError::InvalidArguments {
                name: Self::NAME.to_string(),
                reason: format!("from_date {from} is after to_date {to}"),
            }
            .into());
        }

        let query = EodQuery::new(args.symbol, from, to)
            .with_order(args.order)
            .with_period(args.period);
        debug!(
            symbol = %query.symbol,
            %from,
            %to,
            period = query.period.as_str(),
            "fetching eod prices"
        );
        self.provider
            .eod_prices(&query)
            .await
            .map_err(|e| provider_failure(Self::NAME, &e))
    }
}

/// Arguments of [`GetStockSymbol`].
#[derive(Debug, Deserialize)]
pub struct SymbolArgs {
    /// Exchange code, e.g. `US` or `CC`.
    pub exchange: String,
    /// Name fragment to match. Absent or `null` matches every ticker.
    #[serde(default)]
    pub search_term: Option<String>,
}

/// Ticker lookup on one exchange, filtered by instrument name.
pub struct GetStockSymbol {
    provider: Arc<dyn MarketDataProvider>,
}

impl GetStockSymbol {
    pub const NAME: &'static str = "get_stock_symbol";

    #[must_use]
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

/// Keeps records whose name contains `term`, ignoring case. An empty term keeps all.
fn filter_by_name(records: Vec<SymbolRecord>, term: &str) -> Vec<SymbolRecord> {
    let term = term.to_lowercase();
    if term.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| record.name.to_lowercase().contains(&term))
        .collect()
}

#[async_trait]
impl TypedTool for GetStockSymbol {
    type Args = SymbolArgs;
    type Output = Vec<SymbolRecord>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "Look up ticker symbols listed on an exchange, optionally filtered by \
             company or instrument name.",
        )
        .with_required_parameter(
            "exchange",
            ParameterSchema::string().with_description("Exchange code, e.g. US, LSE or CC"),
        )
        .with_optional_parameter(
            "search_term",
            ParameterSchema::string()
                .with_description("Case-insensitive part of the name to match")
                .with_default(""),
        )
    }

    async fn invoke(&self, args: SymbolArgs) -> Result<Vec<SymbolRecord>, Report<ToolError>> {
        let records = self
            .provider
            .exchange_symbols(&args.exchange)
            .await
            .map_err(|e| provider_failure(Self::NAME, &e))?;
        let total = records.len();
        let matched = filter_by_name(records, args.search_term.as_deref().unwrap_or_default());
        debug!(exchange = %args.exchange, total, matched = matched.len(), "symbol lookup");
        Ok(matched)
    }
}
