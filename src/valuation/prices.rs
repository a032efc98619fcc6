//! Price sources.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use super::ValuationError;
use crate::storage::LeagueStore;

/// Anything that can quote a current price for a ticker.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn quote(&self, ticker: &str) -> Result<Decimal, ValuationError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Reads the last price written to the store's instrument table by the
/// external market-data refresher.
pub struct StoredPrices {
    store: Arc<dyn LeagueStore>,
}

impl StoredPrices {
    pub fn new(store: Arc<dyn LeagueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PriceSource for StoredPrices {
    async fn quote(&self, ticker: &str) -> Result<Decimal, ValuationError> {
        self.store
            .instrument_price(ticker)
            .await?
            .ok_or_else(|| ValuationError::NoPrice(ticker.to_string()))
    }

    fn name(&self) -> &str {
        "instrument-table"
    }
}

/// A fixed quote sheet.
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    quotes: HashMap<String, Decimal>,
}

impl StaticPrices {
    pub fn new<I, S>(quotes: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            quotes: quotes.into_iter().map(|(t, p)| (t.into(), p)).collect(),
        }
    }
}

#[async_trait]
impl PriceSource for StaticPrices {
    async fn quote(&self, ticker: &str) -> Result<Decimal, ValuationError> {
        self.quotes
            .get(ticker)
            .copied()
            .ok_or_else(|| ValuationError::NoPrice(ticker.to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}
