//! Portfolio valuator, the production `ValuationProvider`.
//!
//! Reads positions and balances from the league store and prices each
//! holding through the shared quote cache.

use async_trait::async_trait;
use futures::future::try_join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::cache::PriceCache;
use super::{Holding, ValuationError, ValuationProvider};
use crate::storage::LeagueStore;
use crate::types::{LeagueId, Participant, ParticipantId};

pub struct PortfolioValuator {
    store: Arc<dyn LeagueStore>,
    prices: Arc<PriceCache>,
}

impl PortfolioValuator {
    pub fn new(store: Arc<dyn LeagueStore>, prices: Arc<PriceCache>) -> Self {
        Self { store, prices }
    }

    async fn load(&self, participant: ParticipantId) -> Result<Participant, ValuationError> {
        self.store
            .participant(participant)
            .await?
            .ok_or(ValuationError::UnknownParticipant(participant))
    }
}

#[async_trait]
impl ValuationProvider for PortfolioValuator {
    async fn total_position_value(
        &self,
        league: LeagueId,
        participant: ParticipantId,
    ) -> Result<Decimal, ValuationError> {
        let holdings = self.holdings(league, participant).await?;
        let total: Decimal = holdings.iter().map(Holding::market_value).sum();
        debug!(%participant, positions = holdings.len(), %total, "Positions valued");
        Ok(total)
    }

    async fn cash_balance(&self, participant: ParticipantId) -> Result<Decimal, ValuationError> {
        Ok(self.load(participant).await?.cash_balance)
    }

    async fn holdings(
        &self,
        league: LeagueId,
        participant: ParticipantId,
    ) -> Result<Vec<Holding>, ValuationError> {
        let member = self.load(participant).await?;
        if member.league_id != league {
            return Err(ValuationError::UnknownParticipant(participant));
        }

        let positions = self.store.positions(participant).await?;
        try_join_all(positions.into_iter().map(|position| async move {
            let price = self.prices.price(&position.ticker).await?;
            Ok::<_, ValuationError>(Holding { position, price })
        }))
        .await
    }
}
