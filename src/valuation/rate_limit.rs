//! Upstream call budget.
//!
//! Fixed-window counter: at most `max_calls` within `window`, measured from
//! the first call of the window. Time comes from the injected clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use super::ValuationError;
use crate::clock::Clock;

#[derive(Debug, Default)]
struct Window {
    started_at: Option<DateTime<Utc>>,
    calls: u32,
}

pub struct ApiCallTracker {
    max_calls: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<Window>,
}

impl ApiCallTracker {
    pub fn new(max_calls: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_calls,
            window,
            clock,
            state: Mutex::new(Window::default()),
        }
    }

    /// Take one call from the budget, or report how long until it refills.
    pub async fn try_acquire(&self) -> Result<(), ValuationError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let expired = match state.started_at {
            Some(start) => now - start >= self.window,
            None => true,
        };
        if expired {
            state.started_at = Some(now);
            state.calls = 0;
        }

        if state.calls >= self.max_calls {
            let refill_at = state.started_at.unwrap_or(now) + self.window;
            let retry_after_secs = (refill_at - now).num_seconds().max(1);
            warn!(
                calls = state.calls,
                max_calls = self.max_calls,
                retry_after_secs,
                "Market data call budget exhausted"
            );
            return Err(ValuationError::RateLimited { retry_after_secs });
        }

        state.calls += 1;
        Ok(())
    }
}
