//! Persistence layer.
//!
//! `LeagueStore` is the entity store the season engine and the portfolio
//! valuator work against. Two implementations:
//! - [`memory::MemoryStore`] keeps everything behind one async mutex.
//! - [`sqlite::SqliteStore`] persists to SQLite through `sqlx`.
//!
//! Both guarantee that a schedule is swapped in one atomic step and that a
//! matchup winner is written at most once.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::types::{
    League, LeagueError, LeagueId, Matchup, MatchupId, NewMatchup, Participant, ParticipantId,
    Position, Settlement, UserId, WeekOpen,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait LeagueStore: Send + Sync {
    async fn insert_league(&self, league: &League) -> Result<(), LeagueError>;

    /// Fails with `LeagueNotFound` for unknown ids.
    async fn league(&self, id: LeagueId) -> Result<League, LeagueError>;

    async fn leagues(&self) -> Result<Vec<League>, LeagueError>;

    /// Insert a participant unless the league already holds `capacity`
    /// members (`LeagueFull`) or the user is already in it (`AlreadyMember`).
    async fn add_participant(
        &self,
        participant: &Participant,
        capacity: usize,
    ) -> Result<(), LeagueError>;

    /// League members in join order.
    async fn roster(&self, league: LeagueId) -> Result<Vec<Participant>, LeagueError>;

    async fn find_participant(
        &self,
        league: LeagueId,
        user: &UserId,
    ) -> Result<Option<Participant>, LeagueError>;

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, LeagueError>;

    async fn set_cash_balance(
        &self,
        participant: ParticipantId,
        balance: Decimal,
    ) -> Result<(), LeagueError>;

    /// Set the season dates and swap in a fresh schedule, all or nothing.
    async fn start_season(
        &self,
        league: LeagueId,
        start: NaiveDate,
        end: NaiveDate,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError>;

    /// Discard any existing matchups and insert `schedule`, all or nothing.
    async fn replace_schedule(
        &self,
        league: LeagueId,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError>;

    /// All matchups of a league ordered by week, then insertion.
    async fn matchups(&self, league: LeagueId) -> Result<Vec<Matchup>, LeagueError>;

    /// Record `winner` only if no winner is stored yet. Returns whatever
    /// winner is stored afterwards, which may come from a concurrent writer.
    async fn record_winner(
        &self,
        matchup: MatchupId,
        winner: ParticipantId,
        settlement: Settlement,
    ) -> Result<Option<ParticipantId>, LeagueError>;

    async fn positions(&self, participant: ParticipantId) -> Result<Vec<Position>, LeagueError>;

    /// Upsert shares and cost basis; zero or negative shares delete the
    /// position. An existing week-open mark is kept.
    async fn set_position(&self, position: &Position) -> Result<(), LeagueError>;

    /// Mark the opening price of `open.week` on a held position, unless it
    /// already carries a mark for that week. Returns whether a mark was
    /// written; a missing position writes nothing.
    async fn mark_week_open(
        &self,
        participant: ParticipantId,
        ticker: &str,
        open: WeekOpen,
    ) -> Result<bool, LeagueError>;

    /// Last known price for an instrument, as refreshed by the market-data feed.
    async fn instrument_price(&self, ticker: &str) -> Result<Option<Decimal>, LeagueError>;

    async fn set_instrument_price(&self, ticker: &str, price: Decimal) -> Result<(), LeagueError>;
}

/// Structural checks on a schedule before it replaces the stored one:
/// distinct sides, weeks in range, no duplicate rows, both sides on `roster`.
pub(crate) fn validate_schedule(
    roster: &[ParticipantId],
    schedule: &[NewMatchup],
) -> Result<(), LeagueError> {
    let mut seen = std::collections::HashSet::new();
    for m in schedule {
        if m.participant1 == m.participant2 {
            return Err(LeagueError::Storage(format!(
                "week {}: participant {} paired with itself",
                m.week_number, m.participant1
            )));
        }
        if !(1..=crate::types::SEASON_WEEKS).contains(&m.week_number) {
            return Err(LeagueError::Storage(format!(
                "week number {} out of range",
                m.week_number
            )));
        }
        for side in [m.participant1, m.participant2] {
            if !roster.contains(&side) {
                return Err(LeagueError::Storage(format!(
                    "participant {side} does not belong to this league"
                )));
            }
        }
        if !seen.insert((m.week_number, m.participant1, m.participant2)) {
            return Err(LeagueError::Storage(format!(
                "duplicate matchup in week {}",
                m.week_number
            )));
        }
    }
    Ok(())
}
