//! Quote cache.
//!
//! Wraps a `PriceSource` with a TTL cache and an optional upstream call
//! budget. Freshness is judged against the injected clock. When the source
//! can't be reached (budget spent or fetch failed) a stale quote is served
//! if one exists; with nothing cached the failure propagates.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::prices::PriceSource;
use super::rate_limit::ApiCallTracker;
use super::ValuationError;
use crate::clock::Clock;

/// Default quote freshness.
pub const DEFAULT_TTL_SECS: i64 = 30 * 60;

struct CacheEntry {
    price: Decimal,
    fetched_at: DateTime<Utc>,
}

/// One ticker's quote. Locked across a refresh so concurrent misses on the
/// same ticker wait for a single upstream call.
type Slot = Arc<Mutex<Option<CacheEntry>>>;

pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    budget: Option<ApiCallTracker>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            budget: None,
            clock,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Meter upstream fetches through `tracker`.
    pub fn with_budget(mut self, tracker: ApiCallTracker) -> Self {
        self.budget = Some(tracker);
        self
    }

    pub async fn price(&self, ticker: &str) -> Result<Decimal, ValuationError> {
        let slot = self.slot(ticker).await;
        let mut entry = slot.lock().await;

        let now = self.clock.now();
        if let Some(fresh) = entry.as_ref().filter(|e| now - e.fetched_at < self.ttl) {
            debug!(ticker, price = %fresh.price, "Quote cache hit");
            return Ok(fresh.price);
        }

        let fetched = match &self.budget {
            Some(budget) => match budget.try_acquire().await {
                Ok(()) => self.source.quote(ticker).await,
                Err(e) => Err(e),
            },
            None => self.source.quote(ticker).await,
        };

        let price = match fetched {
            Ok(price) => price,
            Err(e) => {
                return match entry.as_ref() {
                    Some(stale) => {
                        warn!(ticker, price = %stale.price, error = %e, "Quote refresh failed, serving stale price");
                        Ok(stale.price)
                    }
                    None => Err(e),
                };
            }
        };

        debug!(ticker, %price, source = self.source.name(), "Quote fetched");
        *entry = Some(CacheEntry {
            price,
            fetched_at: self.clock.now(),
        });
        Ok(price)
    }

    async fn slot(&self, ticker: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry(ticker.to_string())
            .or_default()
            .clone()
    }
}
