//! SQLite persistence via `sqlx`.
//!
//! Ids, dates and decimals are stored as TEXT. Schedule swaps run inside a
//! single transaction; the matchups table carries composite foreign keys
//! so both sides of a pairing must belong to the owning league.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::LeagueStore;
use crate::types::{
    League, LeagueError, LeagueId, Matchup, MatchupId, NewMatchup, Participant, ParticipantId,
    Position, Settlement, UserId, WeekOpen,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS leagues (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        start_date  TEXT,
        end_date    TEXT,
        CHECK (start_date IS NULL OR end_date IS NULL OR end_date > start_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS participants (
        seq           INTEGER PRIMARY KEY AUTOINCREMENT,
        id            TEXT NOT NULL UNIQUE,
        league_id     TEXT NOT NULL REFERENCES leagues(id) ON DELETE CASCADE,
        user_id       TEXT NOT NULL,
        cash_balance  TEXT NOT NULL,
        is_admin      INTEGER NOT NULL DEFAULT 0,
        UNIQUE (league_id, user_id),
        UNIQUE (league_id, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        participant_id  TEXT NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
        ticker          TEXT NOT NULL,
        shares          TEXT NOT NULL CHECK (CAST(shares AS REAL) > 0),
        cost_basis      TEXT NOT NULL,
        open_week       INTEGER CHECK (open_week BETWEEN 1 AND 7),
        open_price      TEXT,
        CHECK ((open_week IS NULL) = (open_price IS NULL)),
        PRIMARY KEY (participant_id, ticker)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        ticker         TEXT PRIMARY KEY,
        current_price  TEXT NOT NULL,
        updated_at     TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS matchups (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id           TEXT NOT NULL REFERENCES leagues(id) ON DELETE CASCADE,
        week_number         INTEGER NOT NULL CHECK (week_number BETWEEN 1 AND 7),
        participant1_id     TEXT NOT NULL,
        participant2_id     TEXT NOT NULL,
        winner_id           TEXT,
        settled_net_worth1  TEXT,
        settled_net_worth2  TEXT,
        CHECK (participant1_id <> participant2_id),
        CHECK (winner_id IS NULL OR winner_id IN (participant1_id, participant2_id)),
        UNIQUE (league_id, week_number, participant1_id, participant2_id),
        FOREIGN KEY (league_id, participant1_id)
            REFERENCES participants(league_id, id) ON DELETE CASCADE,
        FOREIGN KEY (league_id, participant2_id)
            REFERENCES participants(league_id, id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_matchups_league_week ON matchups(league_id, week_number)",
];

const MATCHUP_COLUMNS: &str = "id, league_id, week_number, participant1_id, participant2_id, \
     winner_id, settled_net_worth1, settled_net_worth2";

const POSITION_COLUMNS: &str = "participant_id, ticker, shares, cost_basis, open_week, open_price";

const PARTICIPANT_COLUMNS: &str = "id, league_id, user_id, cash_balance, is_admin";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, LeagueError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` is its own database, so an
        // in-memory store must pin exactly one connection.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "League store opened");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, LeagueError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), LeagueError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn swap_schedule(
        tx: &mut Transaction<'_, Sqlite>,
        league: LeagueId,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError> {
        let deleted = sqlx::query("DELETE FROM matchups WHERE league_id = ?")
            .bind(league.to_string())
            .execute(&mut **tx)
            .await?
            .rows_affected();

        let mut created = Vec::with_capacity(schedule.len());
        for new in schedule {
            let id = sqlx::query(
                "INSERT INTO matchups (league_id, week_number, participant1_id, participant2_id) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(league.to_string())
            .bind(new.week_number as i64)
            .bind(new.participant1.to_string())
            .bind(new.participant2.to_string())
            .execute(&mut **tx)
            .await?
            .last_insert_rowid();

            created.push(Matchup {
                id: MatchupId(id),
                league_id: league,
                week_number: new.week_number,
                participant1: new.participant1,
                participant2: new.participant2,
                winner: None,
                settlement: None,
            });
        }

        debug!(%league, deleted, inserted = created.len(), "Schedule swapped");
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn corrupt(column: &str, value: &str) -> LeagueError {
    LeagueError::Storage(format!("corrupt value in column {column}: {value:?}"))
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, LeagueError> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|_| corrupt(column, &raw))
}

fn parse_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, LeagueError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|_| corrupt(column, &s)))
        .transpose()
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, LeagueError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|_| corrupt(column, &raw))
}

fn parse_opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, LeagueError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|_| corrupt(column, &s)))
        .transpose()
}

fn parse_opt_date(row: &SqliteRow, column: &str) -> Result<Option<NaiveDate>, LeagueError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| corrupt(column, &s)))
        .transpose()
}

fn league_from_row(row: &SqliteRow) -> Result<League, LeagueError> {
    Ok(League {
        id: LeagueId(parse_uuid(row, "id")?),
        name: row.try_get("name")?,
        start_date: parse_opt_date(row, "start_date")?,
        end_date: parse_opt_date(row, "end_date")?,
    })
}

fn participant_from_row(row: &SqliteRow) -> Result<Participant, LeagueError> {
    Ok(Participant {
        id: ParticipantId(parse_uuid(row, "id")?),
        league_id: LeagueId(parse_uuid(row, "league_id")?),
        user_id: UserId(row.try_get("user_id")?),
        cash_balance: parse_decimal(row, "cash_balance")?,
        is_admin: row.try_get("is_admin")?,
    })
}

fn matchup_from_row(row: &SqliteRow) -> Result<Matchup, LeagueError> {
    let week: i64 = row.try_get("week_number")?;
    let settlement = match (
        parse_opt_decimal(row, "settled_net_worth1")?,
        parse_opt_decimal(row, "settled_net_worth2")?,
    ) {
        (Some(net_worth1), Some(net_worth2)) => Some(Settlement {
            net_worth1,
            net_worth2,
        }),
        _ => None,
    };

    Ok(Matchup {
        id: MatchupId(row.try_get("id")?),
        league_id: LeagueId(parse_uuid(row, "league_id")?),
        week_number: u32::try_from(week).map_err(|_| corrupt("week_number", &week.to_string()))?,
        participant1: ParticipantId(parse_uuid(row, "participant1_id")?),
        participant2: ParticipantId(parse_uuid(row, "participant2_id")?),
        winner: parse_opt_uuid(row, "winner_id")?.map(ParticipantId),
        settlement,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position, LeagueError> {
    let open_week: Option<i64> = row.try_get("open_week")?;
    let week_open = match (open_week, parse_opt_decimal(row, "open_price")?) {
        (Some(week), Some(price)) => Some(WeekOpen {
            week: u32::try_from(week).map_err(|_| corrupt("open_week", &week.to_string()))?,
            price,
        }),
        _ => None,
    };

    Ok(Position {
        participant_id: ParticipantId(parse_uuid(row, "participant_id")?),
        ticker: row.try_get("ticker")?,
        shares: parse_decimal(row, "shares")?,
        cost_basis: parse_decimal(row, "cost_basis")?,
        week_open,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// LeagueStore
// ---------------------------------------------------------------------------

#[async_trait]
impl LeagueStore for SqliteStore {
    async fn insert_league(&self, league: &League) -> Result<(), LeagueError> {
        sqlx::query("INSERT INTO leagues (id, name, start_date, end_date) VALUES (?, ?, ?, ?)")
            .bind(league.id.to_string())
            .bind(&league.name)
            .bind(league.start_date.map(|d| d.to_string()))
            .bind(league.end_date.map(|d| d.to_string()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn league(&self, id: LeagueId) -> Result<League, LeagueError> {
        let row = sqlx::query("SELECT id, name, start_date, end_date FROM leagues WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => league_from_row(&row),
            None => Err(LeagueError::LeagueNotFound(id)),
        }
    }

    async fn leagues(&self) -> Result<Vec<League>, LeagueError> {
        let rows = sqlx::query("SELECT id, name, start_date, end_date FROM leagues ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(league_from_row).collect()
    }

    async fn add_participant(
        &self,
        participant: &Participant,
        capacity: usize,
    ) -> Result<(), LeagueError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM leagues WHERE id = ?")
            .bind(participant.league_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(LeagueError::LeagueNotFound(participant.league_id));
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM participants WHERE league_id = ?")
            .bind(participant.league_id.to_string())
            .fetch_one(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT INTO participants (id, league_id, user_id, cash_balance, is_admin) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(participant.id.to_string())
        .bind(participant.league_id.to_string())
        .bind(participant.user_id.as_str())
        .bind(participant.cash_balance.to_string())
        .bind(participant.is_admin)
        .execute(&mut *tx)
        .await;

        match inserted {
            Err(e) if is_unique_violation(&e) => {
                return Err(LeagueError::AlreadyMember(participant.user_id.clone()))
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        // Checked after the insert so a duplicate join reports AlreadyMember
        // even when the league is full.
        if count as usize >= capacity {
            return Err(LeagueError::LeagueFull(count as usize));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn roster(&self, league: LeagueId) -> Result<Vec<Participant>, LeagueError> {
        let rows = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE league_id = ? ORDER BY seq"
        ))
        .bind(league.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(participant_from_row).collect()
    }

    async fn find_participant(
        &self,
        league: LeagueId,
        user: &UserId,
    ) -> Result<Option<Participant>, LeagueError> {
        let row = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE league_id = ? AND user_id = ?"
        ))
        .bind(league.to_string())
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(participant_from_row).transpose()
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, LeagueError> {
        let row = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(participant_from_row).transpose()
    }

    async fn set_cash_balance(
        &self,
        participant: ParticipantId,
        balance: Decimal,
    ) -> Result<(), LeagueError> {
        let updated = sqlx::query("UPDATE participants SET cash_balance = ? WHERE id = ?")
            .bind(balance.to_string())
            .bind(participant.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(LeagueError::Storage(format!("unknown participant {participant}")));
        }
        Ok(())
    }

    async fn start_season(
        &self,
        league: LeagueId,
        start: NaiveDate,
        end: NaiveDate,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE leagues SET start_date = ?, end_date = ? WHERE id = ?")
            .bind(start.to_string())
            .bind(end.to_string())
            .bind(league.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(LeagueError::LeagueNotFound(league));
        }

        let created = Self::swap_schedule(&mut tx, league, schedule).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn replace_schedule(
        &self,
        league: LeagueId,
        schedule: &[NewMatchup],
    ) -> Result<Vec<Matchup>, LeagueError> {
        let mut tx = self.pool.begin().await?;
        let created = Self::swap_schedule(&mut tx, league, schedule).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn matchups(&self, league: LeagueId) -> Result<Vec<Matchup>, LeagueError> {
        let rows = sqlx::query(&format!(
            "SELECT {MATCHUP_COLUMNS} FROM matchups WHERE league_id = ? ORDER BY week_number, id"
        ))
        .bind(league.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(matchup_from_row).collect()
    }

    async fn record_winner(
        &self,
        matchup: MatchupId,
        winner: ParticipantId,
        settlement: Settlement,
    ) -> Result<Option<ParticipantId>, LeagueError> {
        let winner_text = winner.to_string();
        let written = sqlx::query(
            "UPDATE matchups SET winner_id = ?, settled_net_worth1 = ?, settled_net_worth2 = ? \
             WHERE id = ? AND winner_id IS NULL AND ? IN (participant1_id, participant2_id)",
        )
        .bind(&winner_text)
        .bind(settlement.net_worth1.to_string())
        .bind(settlement.net_worth2.to_string())
        .bind(matchup.0)
        .bind(&winner_text)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let stored: Option<Option<String>> =
            sqlx::query_scalar("SELECT winner_id FROM matchups WHERE id = ?")
                .bind(matchup.0)
                .fetch_optional(&self.pool)
                .await?;

        let stored = match stored {
            Some(value) => value,
            None => return Err(LeagueError::Storage(format!("unknown matchup {matchup}"))),
        };
        let stored = stored
            .map(|s| Uuid::parse_str(&s).map(ParticipantId).map_err(|_| corrupt("winner_id", &s)))
            .transpose()?;

        if written == 0 && stored.is_none() {
            return Err(LeagueError::Storage(format!(
                "{winner} is not a side of {matchup}"
            )));
        }
        Ok(stored)
    }

    async fn positions(&self, participant: ParticipantId) -> Result<Vec<Position>, LeagueError> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE participant_id = ? ORDER BY ticker"
        ))
        .bind(participant.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn set_position(&self, position: &Position) -> Result<(), LeagueError> {
        if position.shares <= Decimal::ZERO {
            sqlx::query("DELETE FROM positions WHERE participant_id = ? AND ticker = ?")
                .bind(position.participant_id.to_string())
                .bind(&position.ticker)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        sqlx::query(&format!(
            "INSERT INTO positions ({POSITION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (participant_id, ticker) \
             DO UPDATE SET shares = excluded.shares, cost_basis = excluded.cost_basis"
        ))
        .bind(position.participant_id.to_string())
        .bind(&position.ticker)
        .bind(position.shares.to_string())
        .bind(position.cost_basis.to_string())
        .bind(position.week_open.map(|open| open.week as i64))
        .bind(position.week_open.map(|open| open.price.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_week_open(
        &self,
        participant: ParticipantId,
        ticker: &str,
        open: WeekOpen,
    ) -> Result<bool, LeagueError> {
        let written = sqlx::query(
            "UPDATE positions SET open_week = ?, open_price = ? \
             WHERE participant_id = ? AND ticker = ? \
               AND (open_week IS NULL OR open_week <> ?)",
        )
        .bind(open.week as i64)
        .bind(open.price.to_string())
        .bind(participant.to_string())
        .bind(ticker)
        .bind(open.week as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if written > 0 {
            debug!(%participant, ticker, week = open.week, price = %open.price, "Week open marked");
        }
        Ok(written > 0)
    }

    async fn instrument_price(&self, ticker: &str) -> Result<Option<Decimal>, LeagueError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT current_price FROM instruments WHERE ticker = ?")
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;
        raw.map(|s| Decimal::from_str(&s).map_err(|_| corrupt("current_price", &s)))
            .transpose()
    }

    async fn set_instrument_price(&self, ticker: &str, price: Decimal) -> Result<(), LeagueError> {
        sqlx::query(
            "INSERT INTO instruments (ticker, current_price, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (ticker) \
             DO UPDATE SET current_price = excluded.current_price, updated_at = excluded.updated_at",
        )
        .bind(ticker)
        .bind(price.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
