//! Market data provider trait and record types.
//!
//! Field names follow the EODHD API so provider implementations can
//! deserialize responses directly into these types.

use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::NaiveDate;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};

/// Sort order of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    /// Oldest first.
    #[default]
    #[serde(rename = "a")]
    Ascending,
    /// Newest first.
    #[serde(rename = "d")]
    Descending,
}

impl Order {
    /// Returns the provider's code for this order.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "a",
            Self::Descending => "d",
        }
    }
}

/// Sampling period of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Period {
    /// One bar per trading day.
    #[serde(rename = "d")]
    Daily,
    /// One bar per week.
    #[serde(rename = "w")]
    Weekly,
    /// One bar per month.
    #[default]
    #[serde(rename = "m")]
    Monthly,
    /// One bar per quarter.
    #[serde(rename = "q")]
    Quarterly,
    /// One bar per year.
    #[serde(rename = "y")]
    Yearly,
}

impl Period {
    /// Returns the provider's code for this period.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "d",
            Self::Weekly => "w",
            Self::Monthly => "m",
            Self::Quarterly => "q",
            Self::Yearly => "y",
        }
    }
}

/// A request for end-of-day prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EodQuery {
    /// Ticker with exchange suffix, e.g. `AAPL.US` or `BTC-USD.CC`.
    pub symbol: String,
    /// First day, inclusive.
    pub from: NaiveDate,
    /// Last day, inclusive.
    pub to: NaiveDate,
    /// Sort order of the returned bars.
    pub order: Order,
    /// Width of each bar.
    pub period: Period,
}

impl EodQuery {
    /// Creates a monthly, oldest-first query.
    #[must_use]
    pub fn new(symbol: impl Into<String>, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            from,
            to,
            order: Order::default(),
            period: Period::default(),
        }
    }

    /// Sets the sort order.
    #[must_use]
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Sets the sampling period.
    #[must_use]
    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }
}

/// One bar of an end-of-day price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EodPrice {
    /// Trading day the bar closes on.
    pub date: NaiveDate,
    /// First traded price.
    pub open: f64,
    /// Highest traded price.
    pub high: f64,
    /// Lowest traded price.
    pub low: f64,
    /// Last traded price.
    pub close: f64,
    /// Close adjusted for splits and dividends.
    pub adjusted_close: f64,
    /// Units traded.
    pub volume: u64,
}

/// A ticker listed on an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SymbolRecord {
    /// Ticker without the exchange suffix.
    pub code: String,
    /// Company or instrument name.
    pub name: String,
    #[serde(default)]
    pub country: String,
    pub exchange: String,
    #[serde(default)]
    pub currency: String,
    /// Instrument type, e.g. `Common Stock` or `ETF`.
    #[serde(rename = "Type", default)]
    pub instrument_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
}

/// Source of market data.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetches the end-of-day price series described by `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or does not know
    /// the symbol.
    async fn eod_prices(&self, query: &EodQuery) -> Result<Vec<EodPrice>, Report<ProviderError>>;

    /// Lists every ticker on `exchange`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or does not know
    /// the exchange.
    async fn exchange_symbols(&self, exchange: &str) -> Result<Vec<SymbolRecord>, Report<ProviderError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_to_monthly_ascending() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let to = NaiveDate::from_ymd_opt(2024, 1, 31).expect("date");
        let query = EodQuery::new("BTC-USD.CC", from, to);

        assert_eq!(query.order, Order::Ascending);
        assert_eq!(query.period, Period::Monthly);
        assert_eq!(query.period.as_str(), "m");
    }

    #[test]
    fn order_and_period_use_provider_codes() {
        assert_eq!(serde_json::to_value(Order::Descending).expect("serialize"), "d");
        let period: Period = serde_json::from_value(serde_json::json!("q")).expect("deserialize");
        assert_eq!(period, Period::Quarterly);
        assert!(serde_json::from_value::<Period>(serde_json::json!("x")).is_err());
    }

    #[test]
    fn symbol_record_reads_provider_fields() {
        let record: SymbolRecord = serde_json::from_value(serde_json::json!({
            "Code": "AAPL",
            "Name": "Apple Inc",
            "Country": "USA",
            "Exchange": "NASDAQ",
            "Currency": "USD",
            "Type": "Common Stock",
            "Isin": "US0378331005"
        }))
        .expect("deserialize");

        assert_eq!(record.code, "AAPL");
        assert_eq!(record.instrument_type, "Common Stock");
        assert_eq!(record.isin.as_deref(), Some("US0378331005"));
    }

    #[test]
    fn eod_price_reads_provider_fields() {
        let price: EodPrice = serde_json::from_value(serde_json::json!({
            "date": "2024-01-31",
            "open": 42_000.0,
            "high": 43_500.5,
            "low": 41_800.0,
            "close": 42_580.1,
            "adjusted_close": 42_580.1,
            "volume": 25_000_000_u64
        }))
        .expect("deserialize");

        assert_eq!(price.date, NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"));
        assert_eq!(price.volume, 25_000_000);
    }
}
