//! Real valuation stack (stored positions, instrument prices, quote cache,
//! call budget) driving season resolution on SQLite.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use stockleague::clock::ManualClock;
use stockleague::season::{SeasonEngine, SeasonRules};
use stockleague::storage::{LeagueStore, SqliteStore};
use stockleague::types::{
    LeagueError, LeagueId, MatchupOutcome, Participant, Position, StockProfit, UserId,
};
use stockleague::valuation::cache::PriceCache;
use stockleague::valuation::portfolio::PortfolioValuator;
use stockleague::valuation::prices::StoredPrices;
use stockleague::valuation::rate_limit::ApiCallTracker;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct Stack {
    engine: SeasonEngine,
    store: Arc<SqliteStore>,
    clock: Arc<ManualClock>,
    league: LeagueId,
    roster: Vec<Participant>,
}

async fn stack(max_api_calls: u32) -> Stack {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let clock = Arc::new(ManualClock::at_date(d("2023-12-27")));

    let budget = ApiCallTracker::new(max_api_calls, Duration::minutes(30), clock.clone());
    let prices = PriceCache::new(
        Arc::new(StoredPrices::new(store.clone())),
        clock.clone(),
        Duration::hours(4),
    )
    .with_budget(budget);
    let valuator = PortfolioValuator::new(store.clone(), Arc::new(prices));
    let engine = SeasonEngine::new(
        store.clone(),
        Arc::new(valuator),
        clock.clone(),
        SeasonRules::default(),
    );

    let admin = UserId::new("u0");
    let (league, _) = engine.create_league("Priced", &admin).await.unwrap();
    for i in 1..8 {
        engine
            .join_league(league.id, &UserId::new(format!("u{i}")))
            .await
            .unwrap();
    }
    engine
        .set_start_date(league.id, &admin, d("2024-01-01"))
        .await
        .unwrap();
    let roster = store.roster(league.id).await.unwrap();

    Stack {
        engine,
        store,
        clock,
        league: league.id,
        roster,
    }
}

async fn hold(store: &SqliteStore, participant: &Participant, ticker: &str, shares: Decimal) {
    store
        .set_position(&Position::new(participant.id, ticker, shares, dec!(100)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_positions_decide_the_week() {
    let s = stack(25).await;
    s.store.set_instrument_price("AAPL", dec!(190.00)).await.unwrap();
    // Slot 0 plays slot 7 in week one; only slot 0 holds stock.
    hold(&s.store, &s.roster[0], "AAPL", dec!(2)).await;
    s.store.set_cash_balance(s.roster[0].id, dec!(9700.00)).await.unwrap();

    s.clock.set_date(d("2024-01-08"));
    let board = s.engine.leaderboard(s.league).await.unwrap();
    let top = &board[0];
    assert_eq!(top.user_id, s.roster[0].user_id);
    assert_eq!(top.net_worth, dec!(10080.00));

    let week_one = s
        .store
        .matchups(s.league)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.week_number == 1 && m.involves(s.roster[0].id))
        .unwrap();
    assert_eq!(week_one.winner, Some(s.roster[0].id));
}

#[tokio::test]
async fn test_call_budget_exhaustion_fails_resolution() {
    let s = stack(1).await;
    s.store.set_instrument_price("AAPL", dec!(190)).await.unwrap();
    s.store.set_instrument_price("MSFT", dec!(400)).await.unwrap();
    hold(&s.store, &s.roster[0], "AAPL", dec!(1)).await;
    hold(&s.store, &s.roster[7], "MSFT", dec!(1)).await;

    s.clock.set_date(d("2024-01-08"));
    let week_one = s
        .store
        .matchups(s.league)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.week_number == 1 && m.involves(s.roster[0].id))
        .unwrap();

    // Two tickers, budget of one: the second quote is refused.
    let err = s
        .engine
        .resolve_matchup(s.league, week_one.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LeagueError::ValuationUnavailable { .. }));

    let stored = s.store.matchups(s.league).await.unwrap();
    assert!(stored.iter().all(|m| m.winner.is_none()));

    // Next window, one ticker left to price: fits the budget.
    hold(&s.store, &s.roster[7], "MSFT", dec!(0)).await;
    s.clock.advance(Duration::minutes(31));
    let outcome = s.engine.resolve_matchup(s.league, week_one.id).await.unwrap();
    assert_eq!(outcome, MatchupOutcome::Won(s.roster[0].id));
}

#[tokio::test]
async fn test_cold_cache_leaderboard_prices_each_ticker_once() {
    // Default budget, and a budget with room for exactly one quote.
    for budget in [25, 1] {
        let s = stack(budget).await;
        s.store.set_instrument_price("AAPL", dec!(190.00)).await.unwrap();
        for member in &s.roster {
            hold(&s.store, member, "AAPL", dec!(1)).await;
        }

        // Week 7: six elapsed weeks to resolve, every side valued cold.
        s.clock.set_date(d("2024-03-01"));
        let board = s.engine.leaderboard(s.league).await.unwrap();
        assert_eq!(board.len(), 8, "budget {budget}");
        assert!(board.iter().all(|row| row.net_worth == dec!(10190.00)));
        assert!(board.iter().all(|row| row.wins == 0 && row.losses == 0));

        let admin = &s.roster[0].user_id;
        let card = s.engine.current_matchup(s.league, admin).await.unwrap();
        assert_eq!(card.player.net_worth, dec!(10190.00));
    }
}

#[tokio::test]
async fn test_matchup_card_reports_weekly_profit() {
    let s = stack(25).await;
    s.store.set_instrument_price("AAPL", dec!(190)).await.unwrap();
    hold(&s.store, &s.roster[0], "AAPL", dec!(2)).await;
    let me = &s.roster[0].user_id;

    s.clock.set_date(d("2024-01-08"));
    assert_eq!(s.engine.open_week(s.league).await.unwrap(), 1);
    assert_eq!(s.engine.open_week(s.league).await.unwrap(), 0);

    s.store.set_instrument_price("AAPL", dec!(200)).await.unwrap();
    s.clock.advance(Duration::hours(5));
    let card = s.engine.current_matchup(s.league, me).await.unwrap();
    assert_eq!(card.week_number, 2);
    assert_eq!(
        card.player.stocks,
        vec![StockProfit {
            ticker: "AAPL".into(),
            shares: dec!(2),
            price: dec!(200),
            weekly_profit: dec!(20),
            total_profit: dec!(200),
        }]
    );
    assert_eq!(card.player.weekly_profit, dec!(20));
    assert!(card.opponent.stocks.is_empty());
    assert_eq!(card.opponent.weekly_profit, Decimal::ZERO);

    // A new week opens at the price first seen in it.
    s.clock.set_date(d("2024-01-15"));
    let card = s.engine.current_matchup(s.league, me).await.unwrap();
    assert_eq!(card.week_number, 3);
    assert_eq!(card.player.weekly_profit, Decimal::ZERO);
    assert_eq!(card.player.stocks[0].total_profit, dec!(200));
    assert_eq!(s.engine.open_week(s.league).await.unwrap(), 0);
}

#[tokio::test]
async fn test_open_week_before_start() {
    let s = stack(25).await;
    let err = s.engine.open_week(s.league).await.unwrap_err();
    assert!(matches!(err, LeagueError::LeagueNotStarted));
}

#[tokio::test]
async fn test_missing_price_is_not_zero() {
    let s = stack(25).await;
    hold(&s.store, &s.roster[7], "NOPE", dec!(5)).await;
    s.clock.set_date(d("2024-01-08"));

    let err = s.engine.leaderboard(s.league).await.unwrap_err();
    match err {
        LeagueError::ValuationUnavailable { participant, reason } => {
            assert_eq!(participant, s.roster[7].id);
            assert!(reason.contains("NOPE"));
        }
        other => panic!("expected ValuationUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_selling_out_deletes_position() {
    let s = stack(25).await;
    s.store.set_instrument_price("AAPL", dec!(190)).await.unwrap();
    hold(&s.store, &s.roster[3], "AAPL", dec!(4)).await;
    assert_eq!(s.store.positions(s.roster[3].id).await.unwrap().len(), 1);

    hold(&s.store, &s.roster[3], "AAPL", dec!(0)).await;
    assert!(s.store.positions(s.roster[3].id).await.unwrap().is_empty());
}
