//! Scripted valuation provider for integration testing.
//!
//! Net worths are set directly per participant and reported entirely as
//! cash, with no holdings. Calls are counted so tests can tell whether a resolution actually
//! consulted valuations.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use stockleague::types::{LeagueId, ParticipantId};
use stockleague::valuation::{Holding, ValuationError, ValuationProvider};

#[derive(Default)]
pub struct ScriptedValuations {
    worths: Mutex<HashMap<ParticipantId, Decimal>>,
    /// If set, every lookup fails with this message.
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedValuations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, participant: ParticipantId, net_worth: Decimal) {
        self.worths.lock().unwrap().insert(participant, net_worth);
    }

    pub fn set_all<I>(&self, worths: I)
    where
        I: IntoIterator<Item = (ParticipantId, Decimal)>,
    {
        self.worths.lock().unwrap().extend(worths);
    }

    pub fn fail_with(&self, msg: &str) {
        *self.failure.lock().unwrap() = Some(msg.to_string());
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Total lookups served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ValuationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().as_ref() {
            Some(msg) => Err(ValuationError::Source(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ValuationProvider for ScriptedValuations {
    async fn total_position_value(
        &self,
        _league: LeagueId,
        _participant: ParticipantId,
    ) -> Result<Decimal, ValuationError> {
        self.check()?;
        Ok(Decimal::ZERO)
    }

    async fn cash_balance(&self, participant: ParticipantId) -> Result<Decimal, ValuationError> {
        self.check()?;
        self.worths
            .lock()
            .unwrap()
            .get(&participant)
            .copied()
            .ok_or(ValuationError::UnknownParticipant(participant))
    }

    async fn holdings(
        &self,
        _league: LeagueId,
        _participant: ParticipantId,
    ) -> Result<Vec<Holding>, ValuationError> {
        self.check()?;
        Ok(Vec::new())
    }
}
