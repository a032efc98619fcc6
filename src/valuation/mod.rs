//! Portfolio valuation.
//!
//! Defines the `ValuationProvider` seam the season engine consumes and the
//! concrete provider built on stored positions and cached market prices:
//! - `prices`: where quotes come from
//! - `cache`: TTL cache over a price source with an injected clock
//! - `rate_limit`: fixed-window budget for calls to the upstream feed
//! - `portfolio`: positions × prices + cash

pub mod cache;
pub mod portfolio;
pub mod prices;
pub mod rate_limit;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

use crate::types::{LeagueError, LeagueId, ParticipantId, Position};

/// Why a valuation could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValuationError {
    #[error("No price available for {0}")]
    NoPrice(String),

    #[error("Market data rate limit reached, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("Market data source error: {0}")]
    Source(String),

    #[error("Unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LeagueError> for ValuationError {
    fn from(e: LeagueError) -> Self {
        ValuationError::Storage(e.to_string())
    }
}

/// A held position priced at the current quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    pub position: Position,
    pub price: Decimal,
}

impl Holding {
    pub fn market_value(&self) -> Decimal {
        self.position.market_value(self.price)
    }
}

/// Current net-worth inputs for a participant.
///
/// Implementations may be slow or fail (they sit in front of a market-data
/// feed); callers must propagate failures rather than default to zero.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValuationProvider: Send + Sync {
    /// Sum of shares × current price over every position held in `league`.
    async fn total_position_value(
        &self,
        league: LeagueId,
        participant: ParticipantId,
    ) -> Result<Decimal, ValuationError>;

    async fn cash_balance(&self, participant: ParticipantId) -> Result<Decimal, ValuationError>;

    /// Every position held in `league`, priced, ordered by ticker.
    async fn holdings(
        &self,
        league: LeagueId,
        participant: ParticipantId,
    ) -> Result<Vec<Holding>, ValuationError>;
}

/// Map a provider failure onto the core error, logging it on the way.
pub(crate) fn unavailable(
    league: LeagueId,
    participant: ParticipantId,
    e: ValuationError,
) -> LeagueError {
    warn!(%league, %participant, error = %e, "Valuation failed");
    LeagueError::ValuationUnavailable {
        participant,
        reason: e.to_string(),
    }
}

/// `total_position_value + cash_balance`, with failures mapped to
/// `LeagueError::ValuationUnavailable`.
pub async fn net_worth(
    provider: &dyn ValuationProvider,
    league: LeagueId,
    participant: ParticipantId,
) -> Result<Decimal, LeagueError> {
    let positions = provider
        .total_position_value(league, participant)
        .await
        .map_err(|e| unavailable(league, participant, e))?;
    let cash = provider
        .cash_balance(participant)
        .await
        .map_err(|e| unavailable(league, participant, e))?;
    Ok(positions + cash)
}

/// Net worths for one pass over a league.
///
/// Each participant is valued at most once however many matchups ask for
/// it, and concurrent requests for the same participant share that one
/// valuation. A failed valuation is not remembered.
pub struct NetWorths<'a> {
    provider: &'a dyn ValuationProvider,
    league: LeagueId,
    cells: Mutex<HashMap<ParticipantId, Arc<OnceCell<Decimal>>>>,
}

impl<'a> NetWorths<'a> {
    pub fn new(provider: &'a dyn ValuationProvider, league: LeagueId) -> Self {
        Self {
            provider,
            league,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, participant: ParticipantId) -> Result<Decimal, LeagueError> {
        let cell = self
            .cells
            .lock()
            .await
            .entry(participant)
            .or_default()
            .clone();
        let worth = cell
            .get_or_try_init(|| net_worth(self.provider, self.league, participant))
            .await?;
        Ok(*worth)
    }
}
