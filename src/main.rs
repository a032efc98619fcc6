//! stockleague season report.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the league store, and prints the current week and leaderboard of one
//! league (or all of them). Elapsed matchups are resolved on the way, and
//! holdings get their opening price for the current week, so running this
//! at the start of each week settles the week that just finished.
//!
//! Usage: `stockleague [LEAGUE_ID] [--json]`

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use stockleague::clock::{Clock, SystemClock};
use stockleague::config::AppConfig;
use stockleague::season::{calendar, SeasonEngine};
use stockleague::storage::{LeagueStore, SqliteStore};
use stockleague::types::{League, LeagueId, Standing};
use stockleague::valuation::cache::PriceCache;
use stockleague::valuation::portfolio::PortfolioValuator;
use stockleague::valuation::prices::StoredPrices;
use stockleague::valuation::rate_limit::ApiCallTracker;

const BANNER: &str = r#"
 ___ _           _    _
/ __| |_ ___  __| |__| |   ___ __ _ __ _ _  _ ___
\__ \  _/ _ \/ _| / /| |__/ -_) _` / _` | || / -_)
|___/\__\___/\__|_\_\|____\___\__,_\__, |\_,_\___|
                                   |___/
  Head-to-head fantasy stock seasons
  v0.1.0
"#;

#[derive(Debug, Default)]
struct Args {
    league: Option<LeagueId>,
    json: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--json" => args.json = true,
                flag if flag.starts_with("--") => bail!("Unknown flag: {flag}"),
                id if args.league.is_none() => {
                    args.league = Some(
                        id.parse()
                            .with_context(|| format!("Invalid league id: {id}"))?,
                    );
                }
                extra => bail!("Unexpected argument: {extra}"),
            }
        }
        Ok(args)
    }
}

#[derive(Debug, Serialize)]
struct LeagueReport {
    league: League,
    current_week: u32,
    standings: Vec<Standing>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args = Args::parse()?;
    let cfg = AppConfig::load_from_env()?;

    init_logging();

    if !args.json {
        println!("{BANNER}");
    }
    info!(
        database_url = %cfg.storage.database_url,
        starting_balance = %cfg.league.starting_balance,
        cache_ttl_secs = cfg.prices.cache_ttl_secs,
        max_api_calls = cfg.prices.max_api_calls,
        "stockleague starting up"
    );

    // -- Initialise components -------------------------------------------

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn LeagueStore> = Arc::new(
        SqliteStore::connect(&cfg.storage.database_url)
            .await
            .with_context(|| format!("Failed to open store at {}", cfg.storage.database_url))?,
    );

    let budget = ApiCallTracker::new(
        cfg.prices.max_api_calls,
        cfg.prices.api_window(),
        clock.clone(),
    );
    let prices = PriceCache::new(
        Arc::new(StoredPrices::new(store.clone())),
        clock.clone(),
        cfg.prices.cache_ttl(),
    )
    .with_budget(budget);
    let valuator = PortfolioValuator::new(store.clone(), Arc::new(prices));

    let engine = SeasonEngine::new(
        store.clone(),
        Arc::new(valuator),
        clock.clone(),
        cfg.league.season_rules(),
    );

    // -- Report ----------------------------------------------------------

    let leagues = match args.league {
        Some(id) => vec![store
            .league(id)
            .await
            .with_context(|| format!("Failed to load league {id}"))?],
        None => store.leagues().await.context("Failed to list leagues")?,
    };
    info!(leagues = leagues.len(), today = %clock.today(), "Building reports");

    let mut reports = Vec::with_capacity(leagues.len());
    let mut failures = 0usize;
    for league in leagues {
        match report(&engine, league.clone()).await {
            Ok(r) => reports.push(r),
            Err(e) => {
                failures += 1;
                error!(league = %league.id, error = %e, "Failed to build league report");
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            print_report(r);
        }
    }

    if failures > 0 {
        bail!("{failures} league report(s) failed");
    }
    Ok(())
}

async fn report(engine: &SeasonEngine, league: League) -> Result<LeagueReport> {
    let current_week = engine.current_week(league.id).await?;
    if current_week != calendar::NOT_STARTED {
        engine.open_week(league.id).await?;
    }
    let standings = if league.is_scheduled() {
        engine.leaderboard(league.id).await?
    } else {
        Vec::new()
    };
    Ok(LeagueReport {
        league,
        current_week,
        standings,
    })
}

fn print_report(r: &LeagueReport) {
    println!("{}", r.league);
    match (r.current_week, r.league.start_date) {
        (calendar::NOT_STARTED, _) | (_, None) => println!("  Season not started"),
        (week, Some(start)) => {
            let (first, last) = calendar::week_bounds(start, week);
            println!("  Week {week} of 7 ({first} to {last})");
        }
    }
    for (rank, row) in r.standings.iter().enumerate() {
        println!("  {:>2}. {row}", rank + 1);
    }
    println!();
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stockleague=info"));

    let json_logging = std::env::var("STOCKLEAGUE_LOG_JSON").is_ok();

    // Logs go to stderr; stdout carries the report.
    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    }
}
