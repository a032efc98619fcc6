//! Season engine: league lifecycle, scheduling and matchup results.
//!
//! - `round_robin`: fixed 8-player pairing table
//! - `calendar`: week index and season dates from the injected clock
//! - `resolver`: lazy, write-once winner resolution
//! - `standings`: win/loss tallies and leaderboard order
//!
//! `SeasonEngine` ties these to a `LeagueStore` and a `ValuationProvider`.
//! Nothing here runs in the background: every read re-derives the week from
//! the clock and resolves whatever matchups have become eligible.

pub mod calendar;
pub mod resolver;
pub mod round_robin;
pub mod standings;

use chrono::NaiveDate;
use futures::future::try_join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::storage::LeagueStore;
use crate::types::{
    CurrentMatchup, League, LeagueError, LeagueId, Matchup, MatchupId, MatchupOutcome,
    MatchupSide, MatchupView, Participant, ParticipantId, ScheduleView, Standing, StockProfit,
    UserId, WeekOpen, DEFAULT_STARTING_BALANCE, ROSTER_SIZE,
};
use crate::valuation::{unavailable, Holding, NetWorths, ValuationProvider};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// League rules the engine enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonRules {
    /// Cash credited to every new participant.
    pub starting_balance: Decimal,
    /// When set, seasons must start on a Monday no earlier than next week.
    /// When cleared, any date from today on is accepted.
    pub require_monday_start: bool,
}

impl Default for SeasonRules {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_STARTING_BALANCE,
            require_monday_start: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SeasonEngine {
    store: Arc<dyn LeagueStore>,
    valuations: Arc<dyn ValuationProvider>,
    clock: Arc<dyn Clock>,
    rules: SeasonRules,
}

impl SeasonEngine {
    pub fn new(
        store: Arc<dyn LeagueStore>,
        valuations: Arc<dyn ValuationProvider>,
        clock: Arc<dyn Clock>,
        rules: SeasonRules,
    ) -> Self {
        Self {
            store,
            valuations,
            clock,
            rules,
        }
    }

    // -- League lifecycle ------------------------------------------------

    /// Create a league with `creator` as its only member and admin.
    pub async fn create_league(
        &self,
        name: &str,
        creator: &UserId,
    ) -> Result<(League, Participant), LeagueError> {
        let league = League::new(name);
        self.store.insert_league(&league).await?;

        let admin = Participant::new(
            league.id,
            creator.clone(),
            self.rules.starting_balance,
            true,
        );
        self.store.add_participant(&admin, ROSTER_SIZE).await?;

        info!(league = %league.id, name, admin = %creator, "League created");
        Ok((league, admin))
    }

    /// Add `user` to a league that has no season scheduled yet.
    pub async fn join_league(
        &self,
        league_id: LeagueId,
        user: &UserId,
    ) -> Result<Participant, LeagueError> {
        let league = self.store.league(league_id).await?;
        if league.is_scheduled() {
            return Err(LeagueError::SeasonAlreadyStarted);
        }

        let participant = Participant::new(
            league_id,
            user.clone(),
            self.rules.starting_balance,
            false,
        );
        self.store.add_participant(&participant, ROSTER_SIZE).await?;

        info!(league = %league_id, user = %user, participant = %participant.id, "Participant joined");
        Ok(participant)
    }

    /// Fix the season start, derive the end date, and generate the schedule,
    /// all in one store operation.
    ///
    /// Only the league admin may do this, only with a full roster, and not
    /// once the current season has begun. The roster is checked before the
    /// date.
    pub async fn set_start_date(
        &self,
        league_id: LeagueId,
        user: &UserId,
        start: NaiveDate,
    ) -> Result<(League, Vec<Matchup>), LeagueError> {
        let league = self.store.league(league_id).await?;
        let member = self.member(league_id, user).await?;
        if !member.is_admin {
            return Err(LeagueError::NotLeagueAdmin);
        }

        let today = self.clock.today();
        if calendar::current_week(&league, today) != calendar::NOT_STARTED {
            return Err(LeagueError::SeasonAlreadyStarted);
        }

        let roster = self.roster_ids(league_id).await?;
        let schedule = round_robin::generate(&roster)?;
        self.check_start_date(start, today)?;

        let end = calendar::season_end(start);
        let matchups = self
            .store
            .start_season(league_id, start, end, &schedule)
            .await?;

        info!(
            league = %league_id,
            %start,
            %end,
            matchups = matchups.len(),
            "Season scheduled"
        );
        let league = League {
            start_date: Some(start),
            end_date: Some(end),
            ..league
        };
        Ok((league, matchups))
    }

    fn check_start_date(
        &self,
        start: NaiveDate,
        today: NaiveDate,
    ) -> Result<(), LeagueError> {
        if !self.rules.require_monday_start {
            if start < today {
                return Err(LeagueError::InvalidStartDate(format!(
                    "{start} is in the past"
                )));
            }
            return Ok(());
        }

        if !calendar::is_monday(start) {
            return Err(LeagueError::InvalidStartDate(format!(
                "{start} is not a Monday"
            )));
        }
        let earliest = calendar::next_monday(today);
        if start < earliest {
            return Err(LeagueError::InvalidStartDate(format!(
                "{start} is before the earliest allowed start {earliest}"
            )));
        }
        Ok(())
    }

    /// Regenerate the 28-matchup schedule from the current roster.
    ///
    /// Replaces any existing schedule atomically; a roster of the wrong size
    /// fails before anything is touched.
    pub async fn create_schedule(&self, league_id: LeagueId) -> Result<Vec<Matchup>, LeagueError> {
        let league = self.store.league(league_id).await?;
        let roster = self.roster_ids(league_id).await?;
        let schedule = round_robin::generate(&roster)?;
        if !league.is_scheduled() {
            return Err(LeagueError::LeagueNotStarted);
        }

        let matchups = self.store.replace_schedule(league_id, &schedule).await?;
        info!(league = %league_id, matchups = matchups.len(), "Schedule created");
        Ok(matchups)
    }

    // -- Queries ---------------------------------------------------------

    pub async fn current_week(&self, league_id: LeagueId) -> Result<u32, LeagueError> {
        let league = self.store.league(league_id).await?;
        Ok(calendar::current_week(&league, self.clock.today()))
    }

    /// The user's full season schedule, ordered by week.
    ///
    /// Reports stored winners only; nothing is resolved or valued here.
    pub async fn participant_schedule(
        &self,
        league_id: LeagueId,
        user: &UserId,
    ) -> Result<ScheduleView, LeagueError> {
        let league = self.store.league(league_id).await?;
        let member = self.member(league_id, user).await?;
        let week = calendar::current_week(&league, self.clock.today());

        let users: HashMap<_, _> = self
            .store
            .roster(league_id)
            .await?
            .into_iter()
            .map(|p| (p.id, p.user_id))
            .collect();

        let mut schedule = Vec::new();
        for m in self.store.matchups(league_id).await? {
            let Some(opponent) = m.opponent_of(member.id) else {
                continue;
            };
            let opponent_user = users.get(&opponent).cloned().ok_or_else(|| {
                LeagueError::Storage(format!("{} references unknown participant {opponent}", m.id))
            })?;
            schedule.push(MatchupView {
                matchup_id: m.id,
                week_number: m.week_number,
                opponent_id: opponent,
                opponent_user,
                is_current_week: m.week_number == week,
                winner: m.winner,
                is_winner: m.winner.map(|w| w == member.id),
            });
        }
        schedule.sort_by_key(|v| v.week_number);

        debug!(league = %league_id, user = %user, week, entries = schedule.len(), "Schedule read");
        Ok(ScheduleView {
            current_week: week,
            league_start_date: league.start_date,
            league_end_date: league.end_date,
            schedule,
        })
    }

    /// Ranked standings: wins desc, then current net worth desc.
    ///
    /// Every elapsed matchup is resolved on the way, so this may record
    /// winners.
    pub async fn leaderboard(&self, league_id: LeagueId) -> Result<Vec<Standing>, LeagueError> {
        let league = self.store.league(league_id).await?;
        let week = calendar::current_week(&league, self.clock.today());
        let roster = self.store.roster(league_id).await?;

        // Resolution and ranking share one valuation per participant.
        let net_worths = NetWorths::new(self.valuations.as_ref(), league_id);
        let matchups = self.store.matchups(league_id).await?;
        let outcomes = self.resolve_all(&net_worths, &league, week, matchups).await?;
        let ids: Vec<_> = roster.iter().map(|p| p.id).collect();
        let records = standings::tally(&ids, &outcomes);

        let worths = try_join_all(roster.iter().map(|p| net_worths.get(p.id))).await?;

        let mut rows: Vec<Standing> = roster
            .into_iter()
            .zip(worths)
            .map(|(p, net_worth)| {
                let record = records.get(&p.id).copied().unwrap_or_default();
                Standing {
                    participant_id: p.id,
                    user_id: p.user_id,
                    wins: record.wins,
                    losses: record.losses,
                    net_worth,
                }
            })
            .collect();
        standings::rank(&mut rows);

        debug!(league = %league_id, week, rows = rows.len(), "Leaderboard computed");
        Ok(rows)
    }

    /// The user's pairing for the week in progress, with both sides' net
    /// worth, season record and profit since the week opened.
    pub async fn current_matchup(
        &self,
        league_id: LeagueId,
        user: &UserId,
    ) -> Result<CurrentMatchup, LeagueError> {
        let league = self.store.league(league_id).await?;
        let member = self.member(league_id, user).await?;
        let week = calendar::current_week(&league, self.clock.today());
        let Some(start) = league.start_date.filter(|_| week != calendar::NOT_STARTED) else {
            return Err(LeagueError::LeagueNotStarted);
        };

        let matchups = self.store.matchups(league_id).await?;
        let current = matchups
            .iter()
            .find(|m| m.week_number == week && m.involves(member.id))
            .cloned()
            .ok_or(LeagueError::NoMatchupThisWeek(week))?;
        let opponent_id = current
            .opponent_of(member.id)
            .ok_or(LeagueError::NoMatchupThisWeek(week))?;
        let opponent = self.store.participant(opponent_id).await?.ok_or_else(|| {
            LeagueError::Storage(format!("{} references unknown participant {opponent_id}", current.id))
        })?;

        let relevant: Vec<Matchup> = matchups
            .into_iter()
            .filter(|m| m.involves(member.id) || m.involves(opponent_id))
            .collect();
        let worths = NetWorths::new(self.valuations.as_ref(), league_id);
        let outcomes = self.resolve_all(&worths, &league, week, relevant).await?;

        let (player_worth, opponent_worth, (player_stocks, _), (opponent_stocks, _)) =
            tokio::try_join!(
                worths.get(member.id),
                worths.get(opponent_id),
                self.week_profits(league_id, week, member.id),
                self.week_profits(league_id, week, opponent_id),
            )?;
        let (week_start, week_end) = calendar::week_bounds(start, week);

        Ok(CurrentMatchup {
            matchup_id: current.id,
            week_number: week,
            week_start,
            week_end,
            player: MatchupSide {
                participant_id: member.id,
                record: standings::record_of(member.id, &outcomes),
                user_id: member.user_id,
                net_worth: player_worth,
                weekly_profit: player_stocks.iter().map(|s| s.weekly_profit).sum(),
                stocks: player_stocks,
            },
            opponent: MatchupSide {
                participant_id: opponent_id,
                record: standings::record_of(opponent_id, &outcomes),
                user_id: opponent.user_id,
                net_worth: opponent_worth,
                weekly_profit: opponent_stocks.iter().map(|s| s.weekly_profit).sum(),
                stocks: opponent_stocks,
            },
        })
    }

    /// Mark the current week's opening price on every holding in the league
    /// that has none yet, returning how many were marked.
    ///
    /// Intended to run as each week opens. The matchup card marks anything
    /// this missed the first time it prices the holding.
    pub async fn open_week(&self, league_id: LeagueId) -> Result<usize, LeagueError> {
        let league = self.store.league(league_id).await?;
        let week = calendar::current_week(&league, self.clock.today());
        if week == calendar::NOT_STARTED {
            return Err(LeagueError::LeagueNotStarted);
        }

        let roster = self.store.roster(league_id).await?;
        let priced = try_join_all(
            roster
                .iter()
                .map(|p| self.week_profits(league_id, week, p.id)),
        )
        .await?;
        let marked: usize = priced.into_iter().map(|(_, marked)| marked).sum();

        info!(league = %league_id, week, marked, "Week opened");
        Ok(marked)
    }

    /// Resolve a single matchup as of today.
    pub async fn resolve_matchup(
        &self,
        league_id: LeagueId,
        matchup_id: MatchupId,
    ) -> Result<MatchupOutcome, LeagueError> {
        let league = self.store.league(league_id).await?;
        let week = calendar::current_week(&league, self.clock.today());
        let matchup = self
            .store
            .matchups(league_id)
            .await?
            .into_iter()
            .find(|m| m.id == matchup_id)
            .ok_or(LeagueError::MatchupNotFound(matchup_id))?;

        let worths = NetWorths::new(self.valuations.as_ref(), league_id);
        resolver::resolve_winner(self.store.as_ref(), &worths, &league, &matchup, week).await
    }

    // -- Helpers ---------------------------------------------------------

    async fn member(&self, league_id: LeagueId, user: &UserId) -> Result<Participant, LeagueError> {
        self.store
            .find_participant(league_id, user)
            .await?
            .ok_or(LeagueError::NotAParticipant(league_id))
    }

    async fn roster_ids(
        &self,
        league_id: LeagueId,
    ) -> Result<Vec<ParticipantId>, LeagueError> {
        Ok(self
            .store
            .roster(league_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect())
    }

    async fn resolve_all(
        &self,
        worths: &NetWorths<'_>,
        league: &League,
        week: u32,
        matchups: Vec<Matchup>,
    ) -> Result<Vec<(Matchup, MatchupOutcome)>, LeagueError> {
        let outcomes = try_join_all(
            matchups
                .iter()
                .map(|m| resolver::resolve_winner(self.store.as_ref(), worths, league, m, week)),
        )
        .await?;
        Ok(matchups.into_iter().zip(outcomes).collect())
    }

    /// Price a participant's holdings for `week`, marking the opening price
    /// on any holding that has none for it yet. Also returns how many were
    /// marked.
    async fn week_profits(
        &self,
        league_id: LeagueId,
        week: u32,
        participant: ParticipantId,
    ) -> Result<(Vec<StockProfit>, usize), LeagueError> {
        let holdings = self
            .valuations
            .holdings(league_id, participant)
            .await
            .map_err(|e| unavailable(league_id, participant, e))?;

        let mut marked = 0;
        let mut stocks = Vec::with_capacity(holdings.len());
        for Holding { mut position, price } in holdings {
            if !position.is_marked_for(week) {
                let open = WeekOpen { week, price };
                if self
                    .store
                    .mark_week_open(participant, &position.ticker, open)
                    .await?
                {
                    marked += 1;
                }
                position.week_open = Some(open);
            }
            stocks.push(StockProfit {
                weekly_profit: position.weekly_profit(price, week),
                total_profit: position.unrealized_pnl(price),
                ticker: position.ticker,
                shares: position.shares,
                price,
            });
        }
        Ok((stocks, marked))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
