//! Season flows end to end: scheduling, week progression, lazy resolution,
//! standings. Each scenario runs against both store backends.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

use stockleague::clock::ManualClock;
use stockleague::season::round_robin::PAIRINGS;
use stockleague::season::{SeasonEngine, SeasonRules};
use stockleague::storage::{LeagueStore, MemoryStore, SqliteStore};
use stockleague::types::{
    LeagueError, LeagueId, Matchup, MatchupOutcome, NewMatchup, Participant, ParticipantId,
    Record, Settlement, UserId, ROSTER_SIZE,
};

use crate::mock_valuation::ScriptedValuations;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn user(slot: usize) -> UserId {
    UserId::new(format!("p{slot}"))
}

struct Harness {
    engine: SeasonEngine,
    store: Arc<dyn LeagueStore>,
    values: Arc<ScriptedValuations>,
    clock: Arc<ManualClock>,
    league: LeagueId,
    /// Join order; slot `i` is user `p{i}`.
    roster: Vec<Participant>,
}

impl Harness {
    fn slot(&self, i: usize) -> ParticipantId {
        self.roster[i].id
    }

    /// Net worth `10000 + slot`, so the higher slot wins every pairing.
    fn ascending_worths(&self) {
        self.values.set_all(
            self.roster
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id, dec!(10000) + Decimal::from(i))),
        );
    }

    /// Net worth `20000 - slot`, so the lower slot wins every pairing.
    fn descending_worths(&self) {
        self.values.set_all(
            self.roster
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id, dec!(20000) - Decimal::from(i))),
        );
    }

    async fn matchups(&self) -> Vec<Matchup> {
        self.store.matchups(self.league).await.unwrap()
    }

    async fn matchup_between(&self, a: usize, b: usize) -> Matchup {
        let (a, b) = (self.slot(a), self.slot(b));
        self.matchups()
            .await
            .into_iter()
            .find(|m| m.involves(a) && m.involves(b))
            .unwrap()
    }

    async fn winners(&self) -> usize {
        self.matchups().await.iter().filter(|m| m.winner.is_some()).count()
    }

    async fn records(&self) -> HashMap<UserId, Record> {
        self.engine
            .leaderboard(self.league)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.user_id.clone(), s.record()))
            .collect()
    }
}

/// Eight members joined as p0..p7 on Wednesday 2023-12-27, season set to
/// start Monday 2024-01-01.
async fn harness(store: Arc<dyn LeagueStore>) -> Harness {
    let clock = Arc::new(ManualClock::at_date(d("2023-12-27")));
    let values = Arc::new(ScriptedValuations::new());
    let engine = SeasonEngine::new(
        store.clone(),
        values.clone(),
        clock.clone(),
        SeasonRules::default(),
    );

    let (league, _) = engine.create_league("Integration", &user(0)).await.unwrap();
    for i in 1..ROSTER_SIZE {
        engine.join_league(league.id, &user(i)).await.unwrap();
    }
    let roster = store.roster(league.id).await.unwrap();
    engine
        .set_start_date(league.id, &user(0), d("2024-01-01"))
        .await
        .unwrap();

    let h = Harness {
        engine,
        store,
        values,
        clock,
        league: league.id,
        roster,
    };
    h.ascending_worths();
    h
}

async fn memory_store() -> Arc<dyn LeagueStore> {
    Arc::new(MemoryStore::new())
}

async fn sqlite_store() -> Arc<dyn LeagueStore> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

/// Expected records when the higher slot wins each of the first `weeks`.
fn expected_records(weeks: usize) -> HashMap<UserId, Record> {
    let mut records: HashMap<UserId, Record> =
        (0..ROSTER_SIZE).map(|i| (user(i), Record::default())).collect();
    for week in &PAIRINGS[..weeks] {
        for &(a, b) in week {
            let (lo, hi) = (a.min(b), a.max(b));
            records.get_mut(&user(hi)).unwrap().wins += 1;
            records.get_mut(&user(lo)).unwrap().losses += 1;
        }
    }
    records
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

async fn fourth_week_counts_first_three(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-22"));
    assert_eq!(h.engine.current_week(h.league).await.unwrap(), 4);

    let board = h.engine.leaderboard(h.league).await.unwrap();
    let order: Vec<_> = board.iter().map(|s| s.user_id.to_string()).collect();
    assert_eq!(order, ["p7", "p6", "p5", "p4", "p3", "p2", "p1", "p0"]);
    assert_eq!(board[0].net_worth, dec!(10007));

    let records: HashMap<_, _> = board.iter().map(|s| (s.user_id.clone(), s.record())).collect();
    assert_eq!(records, expected_records(3));
    assert_eq!(records[&user(7)].to_string(), "3-0");
    assert_eq!(records[&user(5)].to_string(), "2-1");

    // Only weeks 1-3 have stored winners.
    let matchups = h.matchups().await;
    assert_eq!(matchups.len(), 28);
    for m in &matchups {
        assert_eq!(m.winner.is_some(), m.week_number <= 3, "{m}");
    }
}

async fn results_stick_when_prices_move(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-22"));
    let before = h.records().await;
    assert_eq!(h.winners().await, 12);

    h.descending_worths();
    assert_eq!(h.records().await, before);
    assert_eq!(h.winners().await, 12);

    // Week 4 now elapses under the new prices: the lower slot wins it.
    h.clock.set_date(d("2024-01-29"));
    let after = h.records().await;
    assert_eq!(h.winners().await, 16);
    let mut expected = before;
    for &(a, b) in &PAIRINGS[3] {
        expected.get_mut(&user(a.min(b))).unwrap().wins += 1;
        expected.get_mut(&user(a.max(b))).unwrap().losses += 1;
    }
    assert_eq!(after, expected);
}

async fn one_cent_decides_once(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.values.set(h.slot(0), dec!(10500.00));
    h.values.set(h.slot(7), dec!(10499.99));
    h.clock.set_date(d("2024-01-08"));

    let m = h.matchup_between(0, 7).await;
    assert_eq!(m.week_number, 1);
    let first = h.engine.resolve_matchup(h.league, m.id).await.unwrap();
    assert_eq!(first, MatchupOutcome::Won(h.slot(0)));
    let calls = h.values.calls();

    let again = h.engine.resolve_matchup(h.league, m.id).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(h.values.calls(), calls, "stored winner must not re-value");

    let stored = h.matchup_between(0, 7).await;
    assert_eq!(stored.winner, Some(h.slot(0)));
    assert_eq!(
        stored.settlement,
        Some(Settlement {
            net_worth1: dec!(10500.00),
            net_worth2: dec!(10499.99),
        })
    );
}

async fn tie_stays_open(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.values.set(h.slot(1), dec!(12345.67));
    h.values.set(h.slot(6), dec!(12345.67));
    h.clock.set_date(d("2024-01-08"));

    let m = h.matchup_between(1, 6).await;
    assert_eq!(
        h.engine.resolve_matchup(h.league, m.id).await.unwrap(),
        MatchupOutcome::Tied
    );
    assert_eq!(h.matchup_between(1, 6).await.winner, None);

    let records = h.records().await;
    assert_eq!(records[&user(1)], Record::default());
    assert_eq!(records[&user(6)], Record::default());

    h.values.set(h.slot(6), dec!(12345.68));
    assert_eq!(
        h.engine.resolve_matchup(h.league, m.id).await.unwrap(),
        MatchupOutcome::Won(h.slot(6))
    );
}

async fn current_week_never_resolves(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-07"));
    assert_eq!(h.engine.current_week(h.league).await.unwrap(), 1);

    let m = h.matchup_between(0, 7).await;
    assert_eq!(
        h.engine.resolve_matchup(h.league, m.id).await.unwrap(),
        MatchupOutcome::Pending
    );
    h.engine.leaderboard(h.league).await.unwrap();
    assert_eq!(h.winners().await, 0);
}

async fn concurrent_readers_agree(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-15"));

    let (a, b) = tokio::join!(
        h.engine.leaderboard(h.league),
        h.engine.leaderboard(h.league)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(h.winners().await, 8);
}

async fn valuation_failure_surfaces(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-15"));
    h.values.fail_with("quote feed timed out");

    let err = h.engine.leaderboard(h.league).await.unwrap_err();
    match err {
        LeagueError::ValuationUnavailable { reason, .. } => {
            assert!(reason.contains("quote feed timed out"))
        }
        other => panic!("expected ValuationUnavailable, got {other:?}"),
    }
    assert_eq!(h.winners().await, 0);

    h.values.recover();
    assert_eq!(h.records().await, expected_records(2));
}

async fn current_matchup_card(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-24"));

    let card = h.engine.current_matchup(h.league, &user(0)).await.unwrap();
    assert_eq!(card.week_number, 4);
    assert_eq!(card.week_start, d("2024-01-22"));
    assert_eq!(card.week_end, d("2024-01-28"));
    assert_eq!(card.opponent.user_id, user(4));
    assert_eq!(card.player.record.to_string(), "0-3");
    assert_eq!(card.opponent.record.to_string(), "2-1");
    assert_eq!(card.player.net_worth, dec!(10000));
    assert_eq!(card.opponent.net_worth, dec!(10004));

    let err = h
        .engine
        .current_matchup(h.league, &UserId::new("outsider"))
        .await
        .unwrap_err();
    assert!(matches!(err, LeagueError::NotAParticipant(_)));
}

async fn schedule_view_after_results(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-15"));
    h.engine.leaderboard(h.league).await.unwrap();

    let view = h.engine.participant_schedule(h.league, &user(7)).await.unwrap();
    assert_eq!(view.current_week, 3);
    assert_eq!(view.league_end_date, Some(d("2024-02-19")));

    let opponents: Vec<_> = view.schedule.iter().map(|v| v.opponent_user.to_string()).collect();
    assert_eq!(opponents, ["p0", "p5", "p3", "p1", "p6", "p4", "p2"]);
    let flags: Vec<_> = view.schedule.iter().map(|v| v.is_winner).collect();
    assert_eq!(
        flags,
        [Some(true), Some(true), None, None, None, None, None]
    );
    assert!(view.schedule[2].is_current_week);
}

async fn final_week_stays_open_after_season(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-03-30"));
    assert_eq!(h.engine.current_week(h.league).await.unwrap(), 7);

    assert_eq!(h.records().await, expected_records(6));
    for m in h.matchups().await {
        assert_eq!(m.winner.is_some(), m.week_number < 7);
    }
}

async fn regenerate_replaces_whole_schedule(store: Arc<dyn LeagueStore>) {
    let h = harness(store).await;
    h.clock.set_date(d("2024-01-08"));
    h.engine.leaderboard(h.league).await.unwrap();
    assert_eq!(h.winners().await, 4);

    let fresh = h.engine.create_schedule(h.league).await.unwrap();
    assert_eq!(fresh.len(), 28);
    assert_eq!(h.winners().await, 0);
    assert_eq!(h.matchups().await.len(), 28);

    // A broken schedule is rejected without touching the stored one.
    let before = h.matchups().await;
    let outsider = ParticipantId::new();
    let bad: Vec<NewMatchup> = before
        .iter()
        .map(|m| NewMatchup {
            week_number: m.week_number,
            participant1: m.participant1,
            participant2: outsider,
        })
        .collect();
    assert!(h.store.replace_schedule(h.league, &bad).await.is_err());
    assert_eq!(h.matchups().await, before);
}

async fn unstarted_league_is_week_zero(store: Arc<dyn LeagueStore>) {
    let clock = Arc::new(ManualClock::at_date(d("2024-01-03")));
    let engine = SeasonEngine::new(
        store,
        Arc::new(ScriptedValuations::new()),
        clock,
        SeasonRules::default(),
    );
    let (league, _) = engine.create_league("Idle", &user(0)).await.unwrap();

    assert_eq!(engine.current_week(league.id).await.unwrap(), 0);
    let err = engine.current_matchup(league.id, &user(0)).await.unwrap_err();
    assert!(matches!(err, LeagueError::LeagueNotStarted));
    let err = engine.create_schedule(league.id).await.unwrap_err();
    assert!(matches!(
        err,
        LeagueError::InvalidRosterSize { expected: 8, actual: 1 }
    ));
    let view = engine.participant_schedule(league.id, &user(0)).await.unwrap();
    assert!(view.schedule.is_empty());
    assert_eq!(view.league_start_date, None);
}

// ---------------------------------------------------------------------------
// Backend matrix
// ---------------------------------------------------------------------------

macro_rules! on_both_backends {
    ($($scenario:ident),* $(,)?) => {
        mod memory_backend {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::memory_store().await).await;
                }
            )*
        }

        mod sqlite_backend {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::sqlite_store().await).await;
                }
            )*
        }
    };
}

on_both_backends!(
    fourth_week_counts_first_three,
    results_stick_when_prices_move,
    one_cent_decides_once,
    tie_stays_open,
    current_week_never_resolves,
    concurrent_readers_agree,
    valuation_failure_surfaces,
    current_matchup_card,
    schedule_view_after_results,
    final_week_stays_open_after_season,
    regenerate_replaces_whole_schedule,
    unstarted_league_is_week_zero,
);
