//! Shared types for the league engine.
//!
//! Identifiers, the persisted entities (league, participant, position,
//! matchup), the read-side views handed to the API layer, and the error
//! taxonomy. Season, storage and valuation modules all depend on these
//! without depending on each other.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Season constants
// ---------------------------------------------------------------------------

/// Every league plays with exactly this many participants.
pub const ROSTER_SIZE: usize = 8;

/// Number of weeks (rounds) in a season.
pub const SEASON_WEEKS: u32 = 7;

/// Head-to-head matchups played each week.
pub const MATCHUPS_PER_WEEK: usize = ROSTER_SIZE / 2;

/// Cash every participant starts the season with.
pub const DEFAULT_STARTING_BALANCE: Decimal = dec!(10000.00);

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque league identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeagueId(pub Uuid);

impl LeagueId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeagueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeagueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LeagueId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A user's membership in one league.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External user identity (owned by the auth layer, opaque here).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned matchup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchupId(pub i64);

impl fmt::Display for MatchupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matchup#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// League & participants
// ---------------------------------------------------------------------------

/// One season's competition instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    pub id: LeagueId,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    /// Always `start_date + 7 weeks` when set.
    pub end_date: Option<NaiveDate>,
}

impl League {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LeagueId::new(),
            name: name.into(),
            start_date: None,
            end_date: None,
        }
    }

    /// Whether a season start date has been fixed (and so a schedule exists).
    pub fn is_scheduled(&self) -> bool {
        self.start_date.is_some()
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_date {
            Some(start) => write!(f, "{} ({}) from {start}", self.name, self.id),
            None => write!(f, "{} ({}) unscheduled", self.name, self.id),
        }
    }
}

/// A user's membership and cash state within one league.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub league_id: LeagueId,
    pub user_id: UserId,
    pub cash_balance: Decimal,
    pub is_admin: bool,
}

impl Participant {
    pub fn new(league_id: LeagueId, user_id: UserId, cash_balance: Decimal, is_admin: bool) -> Self {
        Self {
            id: ParticipantId::new(),
            league_id,
            user_id,
            cash_balance,
            is_admin,
        }
    }
}

/// Shares of one instrument held by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub participant_id: ParticipantId,
    pub ticker: String,
    /// Strictly positive while the position exists.
    pub shares: Decimal,
    /// Weighted-average price paid per share (profit reporting only).
    pub cost_basis: Decimal,
    /// Price marked when the position was first seen in a season week.
    #[serde(default)]
    pub week_open: Option<WeekOpen>,
}

/// Opening price of one season week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekOpen {
    pub week: u32,
    pub price: Decimal,
}

impl Position {
    pub fn new(
        participant_id: ParticipantId,
        ticker: impl Into<String>,
        shares: Decimal,
        cost_basis: Decimal,
    ) -> Self {
        Self {
            participant_id,
            ticker: ticker.into(),
            shares,
            cost_basis,
            week_open: None,
        }
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.shares * price
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.cost_basis) * self.shares
    }

    /// Change in value since `week` opened. Zero until the week is marked.
    pub fn weekly_profit(&self, price: Decimal, week: u32) -> Decimal {
        match self.week_open {
            Some(open) if open.week == week => (price - open.price) * self.shares,
            _ => Decimal::ZERO,
        }
    }

    pub fn is_marked_for(&self, week: u32) -> bool {
        self.week_open.is_some_and(|open| open.week == week)
    }
}

// ---------------------------------------------------------------------------
// Matchups
// ---------------------------------------------------------------------------

/// Net worths compared when a matchup was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub net_worth1: Decimal,
    pub net_worth2: Decimal,
}

/// One head-to-head pairing for one week of a league's season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matchup {
    pub id: MatchupId,
    pub league_id: LeagueId,
    /// 1..=7
    pub week_number: u32,
    pub participant1: ParticipantId,
    pub participant2: ParticipantId,
    /// Written at most once; `None` means undetermined.
    pub winner: Option<ParticipantId>,
    pub settlement: Option<Settlement>,
}

impl Matchup {
    pub fn involves(&self, participant: ParticipantId) -> bool {
        self.participant1 == participant || self.participant2 == participant
    }

    /// The other side of the pairing, or `None` if `participant` isn't in it.
    pub fn opponent_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        if self.participant1 == participant {
            Some(self.participant2)
        } else if self.participant2 == participant {
            Some(self.participant1)
        } else {
            None
        }
    }
}

impl fmt::Display for Matchup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Week {}: {} vs {}",
            self.week_number, self.participant1, self.participant2
        )?;
        if let Some(winner) = self.winner {
            write!(f, " (winner {winner})")?;
        }
        Ok(())
    }
}

/// A pairing not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewMatchup {
    pub week_number: u32,
    pub participant1: ParticipantId,
    pub participant2: ParticipantId,
}

/// What the resolver concluded about a matchup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchupOutcome {
    /// League not started, or the week hasn't fully elapsed.
    Pending,
    /// Both net worths were equal; nothing is recorded.
    Tied,
    Won(ParticipantId),
}

// ---------------------------------------------------------------------------
// Records & views
// ---------------------------------------------------------------------------

/// Win/loss tally. Ties and unresolved weeks count toward neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
}

impl Record {
    /// Fold one matchup outcome into the record of `participant`.
    pub fn apply(&mut self, outcome: MatchupOutcome, participant: ParticipantId) {
        if let MatchupOutcome::Won(winner) = outcome {
            if winner == participant {
                self.wins += 1;
            } else {
                self.losses += 1;
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.wins, self.losses)
    }
}

/// One row of a participant's season schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchupView {
    pub matchup_id: MatchupId,
    pub week_number: u32,
    pub opponent_id: ParticipantId,
    pub opponent_user: UserId,
    pub is_current_week: bool,
    pub winner: Option<ParticipantId>,
    /// `None` while no winner is stored.
    pub is_winner: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleView {
    pub current_week: u32,
    pub league_start_date: Option<NaiveDate>,
    pub league_end_date: Option<NaiveDate>,
    /// Ordered by week number.
    pub schedule: Vec<MatchupView>,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub wins: u32,
    pub losses: u32,
    pub net_worth: Decimal,
}

impl Standing {
    pub fn record(&self) -> Record {
        Record {
            wins: self.wins,
            losses: self.losses,
        }
    }
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} {:>5} ${:.2}",
            self.user_id.as_str(),
            self.record().to_string(),
            self.net_worth
        )
    }
}

/// Profit on one holding, as shown on the matchup card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockProfit {
    pub ticker: String,
    pub shares: Decimal,
    pub price: Decimal,
    /// Since the current week opened.
    pub weekly_profit: Decimal,
    /// Against cost basis.
    pub total_profit: Decimal,
}

/// One side of the current-week matchup card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchupSide {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub net_worth: Decimal,
    pub record: Record,
    /// Sum of `stocks[..].weekly_profit`.
    pub weekly_profit: Decimal,
    /// Ordered by ticker.
    pub stocks: Vec<StockProfit>,
}

/// The requesting user's matchup for the week in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentMatchup {
    pub matchup_id: MatchupId,
    pub week_number: u32,
    /// First and last calendar day of the week.
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    /// Always the requesting user.
    pub player: MatchupSide,
    pub opponent: MatchupSide,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures surfaced by the scheduling and resolution core.
#[derive(Debug, thiserror::Error)]
pub enum LeagueError {
    #[error("League must have exactly {expected} participants, has {actual}")]
    InvalidRosterSize { expected: usize, actual: usize },

    #[error("League has not started yet")]
    LeagueNotStarted,

    #[error("League not found: {0}")]
    LeagueNotFound(LeagueId),

    /// Deliberately indistinguishable from a missing league for API callers.
    #[error("Not a participant in league {0}")]
    NotAParticipant(LeagueId),

    #[error("No matchup found for week {0}")]
    NoMatchupThisWeek(u32),

    #[error("{0} not found")]
    MatchupNotFound(MatchupId),

    #[error("Valuation unavailable for participant {participant}: {reason}")]
    ValuationUnavailable {
        participant: ParticipantId,
        reason: String,
    },

    #[error("League is full ({0} participants)")]
    LeagueFull(usize),

    #[error("User {0} is already a member of this league")]
    AlreadyMember(UserId),

    #[error("League season has already been scheduled")]
    SeasonAlreadyStarted,

    #[error("Only the league admin can do that")]
    NotLeagueAdmin,

    #[error("Invalid start date: {0}")]
    InvalidStartDate(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LeagueError {
    /// Errors the API layer should report as a plain "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LeagueError::LeagueNotFound(_)
                | LeagueError::NotAParticipant(_)
                | LeagueError::NoMatchupThisWeek(_)
                | LeagueError::MatchupNotFound(_)
        )
    }
}

impl From<sqlx::Error> for LeagueError {
    fn from(e: sqlx::Error) -> Self {
        LeagueError::Storage(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
