//! In-process store.
//!
//! Every operation takes the single state lock for its whole duration, so
//! schedule swaps and winner writes are atomic with respect to readers.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{validate_schedule, LeagueStore};
use crate::types::{
    League, LeagueError, LeagueId, Matchup, MatchupId, NewMatchup, Participant, ParticipantId,
    Position, Settlement, UserId, WeekOpen,
};

#[derive(Default)]
struct State {
    leagues: HashMap<LeagueId, League>,
    /// Kept in join order.
    participants: Vec<Participant>,
    positions: HashMap<(ParticipantId, String), Position>,
    instruments: HashMap<String, Decimal>,
    matchups: Vec<Matchup>,
    next_matchup_id: i64,
}

impl State {
    fn league_mut(&mut self, id: LeagueId) -> Result<&mut League, LeagueError> {
        self.leagues.get_mut(&id).ok_or(LeagueError::LeagueNotFound(id))
    }

    fn roster_ids(&self, league: LeagueId) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.league_id == league)
            .map(|p| p.id)
            .collect()
    }

    fn swap_schedule(&mut self, league: LeagueId, schedule: &[NewMatchup]) -> Vec<Matchup> {
        self.matchups.retain(|m| m.league_id != league);
        let mut created = Vec::with_capacity(schedule.len());
        for new in schedule {
            self.next_matchup_id += 1;
            let matchup = Matchup {
                id: MatchupId(self.next_matchup_id),
                league_id: league,
                week_number: new.week_number,
                participant1: new.participant1,
                participant2: new.participant2,
                winner: None,
                settlement: None,
            };
            self.matchups.push(matchup.clone());
            created.push(matchup);
        }
        created
    }
}

/// A `LeagueStore` held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeagueStore for MemoryStore {
    async fn insert_league(&self, league: &League) -> Result<(), LeagueError> {
        let mut state = self.state.lock().await;
        state.leagues.insert(league.id, league.clone());
        Ok(())
    }

    async fn league(&self, id: LeagueId) -> Result<League, LeagueError> {
        let state = self.state.lock().await;
        state
            .leagues
            .get(&id)
            .cloned()
            .ok_or(LeagueError::LeagueNotFound(id))
    }

    async fn leagues(&self) -> Result<Vec<League>, LeagueError> {
        let state = self.state.lock().await;
        let mut leagues: Vec<League> = state.leagues.values().cloned().collect();
        leagues.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(leagues)
    }

    async fn add_participant(
        &self,
        participant: &Participant,
        capacity: usize,
    ) -> Result<(), LeagueError> {
        let mut state = self.state.lock().await;
        state.league_mut(participant.league_id)?;

        let members: Vec<&Participant> = state
            .participants
            .iter()
            .filter(|p| p.league_id == participant.league_id)
            .collect();
        if members.iter().any(|p| p.user_id == participant.user_id) {
            return Err(LeagueError::AlreadyMember(participant.user_id.clone()));
        }
        if members.len() >= capacity {
            return Err(LeagueError::LeagueFull(members.len()));
        }

        state.participants.push(participant.clone());
        Ok(())
    }

    async fn roster(&self, league: LeagueId) -> Result<Vec<Participant>, LeagueError> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .filter(|p| p.league_id == league)
            .cloned()
            .collect())
    }

    async fn find_participant(
        &self,
        league: LeagueId,
        user: &UserId,
    ) -> Result<Option<Participant>, LeagueError> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .find(|p| p.league_id == league && &p.user_id == user)
            .cloned())
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, LeagueError> {
        let state = self.state.lock().await;
        Ok(state.participants.iter().find(|p| p.id == id).cloned())
    }

    async fn set_cash_balance(
        &self,
        participant: ParticipantId,
        balance: Decimal,
    ) -> Result<(), LeagueError> {
        let mut state = self.state.lock().await;
        let p = state
            .participants
            .iter_mut()
            .find(|p| p.id == participant)
            .ok_or_else(|| LeagueError::Storage(format!("unknown participant {participant}")))?;
        p.cash_balance = balance;
        Ok(())
    }

    async fn start_season(
        &self,
        league: LeagueId,
        start: NaiveDate,
        end: NaiveDate,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError> {
        let mut state = self.state.lock().await;
        state.league_mut(league)?;
        if end <= start {
            return Err(LeagueError::InvalidStartDate(format!(
                "end date {end} must be after start date {start}"
            )));
        }
        validate_schedule(&state.roster_ids(league), schedule)?;

        let record = state.league_mut(league)?;
        record.start_date = Some(start);
        record.end_date = Some(end);
        let created = state.swap_schedule(league, schedule);
        debug!(%league, %start, matchups = created.len(), "Season stored");
        Ok(created)
    }

    async fn replace_schedule(
        &self,
        league: LeagueId,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError> {
        let mut state = self.state.lock().await;
        state.league_mut(league)?;
        validate_schedule(&state.roster_ids(league), schedule)?;
        Ok(state.swap_schedule(league, schedule))
    }

    async fn matchups(&self, league: LeagueId) -> Result<Vec<Matchup>, LeagueError> {
        let state = self.state.lock().await;
        let mut matchups: Vec<Matchup> = state
            .matchups
            .iter()
            .filter(|m| m.league_id == league)
            .cloned()
            .collect();
        matchups.sort_by_key(|m| (m.week_number, m.id));
        Ok(matchups)
    }

    async fn record_winner(
        &self,
        matchup: MatchupId,
        winner: ParticipantId,
        settlement: Settlement,
    ) -> Result<Option<ParticipantId>, LeagueError> {
        let mut state = self.state.lock().await;
        let m = state
            .matchups
            .iter_mut()
            .find(|m| m.id == matchup)
            .ok_or_else(|| LeagueError::Storage(format!("unknown matchup {matchup}")))?;

        if m.winner.is_none() {
            if !m.involves(winner) {
                return Err(LeagueError::Storage(format!(
                    "{winner} is not a side of {matchup}"
                )));
            }
            m.winner = Some(winner);
            m.settlement = Some(settlement);
        }
        Ok(m.winner)
    }

    async fn positions(&self, participant: ParticipantId) -> Result<Vec<Position>, LeagueError> {
        let state = self.state.lock().await;
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.participant_id == participant)
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(positions)
    }

    async fn set_position(&self, position: &Position) -> Result<(), LeagueError> {
        let mut state = self.state.lock().await;
        let key = (position.participant_id, position.ticker.clone());
        if position.shares <= Decimal::ZERO {
            state.positions.remove(&key);
            return Ok(());
        }
        state
            .positions
            .entry(key)
            .and_modify(|held| {
                held.shares = position.shares;
                held.cost_basis = position.cost_basis;
            })
            .or_insert_with(|| position.clone());
        Ok(())
    }

    async fn mark_week_open(
        &self,
        participant: ParticipantId,
        ticker: &str,
        open: WeekOpen,
    ) -> Result<bool, LeagueError> {
        let mut state = self.state.lock().await;
        match state.positions.get_mut(&(participant, ticker.to_string())) {
            Some(held) if !held.is_marked_for(open.week) => {
                held.week_open = Some(open);
                debug!(%participant, ticker, week = open.week, price = %open.price, "Week open marked");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn instrument_price(&self, ticker: &str) -> Result<Option<Decimal>, LeagueError> {
        let state = self.state.lock().await;
        Ok(state.instruments.get(ticker).copied())
    }

    async fn set_instrument_price(&self, ticker: &str, price: Decimal) -> Result<(), LeagueError> {
        let mut state = self.state.lock().await;
        state.instruments.insert(ticker.to_string(), price);
        Ok(())
    }
}
