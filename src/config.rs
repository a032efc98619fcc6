//! Configuration loading from TOML with environment overrides.
//!
//! Reads `stockleague.toml` (or the file named by `STOCKLEAGUE_CONFIG`)
//! into strongly-typed structs. Every key has a default, so a missing
//! section or an empty file is valid. `DATABASE_URL`, when set, takes
//! precedence over `[storage] database_url`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

use crate::season::SeasonRules;
use crate::types::DEFAULT_STARTING_BALANCE;
use crate::valuation::cache::DEFAULT_TTL_SECS;

pub const DEFAULT_CONFIG_PATH: &str = "stockleague.toml";
pub const CONFIG_PATH_ENV: &str = "STOCKLEAGUE_CONFIG";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub league: LeagueConfig,
    pub storage: StorageConfig,
    pub prices: PricesConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LeagueConfig {
    pub starting_balance: Decimal,
    pub require_monday_start: bool,
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_STARTING_BALANCE,
            require_monday_start: true,
        }
    }
}

impl LeagueConfig {
    pub fn season_rules(&self) -> SeasonRules {
        SeasonRules {
            starting_balance: self.starting_balance,
            require_monday_start: self.require_monday_start,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://stockleague.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PricesConfig {
    /// How long a fetched quote is served from cache.
    pub cache_ttl_secs: i64,
    /// Upstream fetches allowed per window.
    pub max_api_calls: u32,
    pub api_window_secs: i64,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_TTL_SECS,
            max_api_calls: 25,
            api_window_secs: 30 * 60,
        }
    }
}

impl PricesConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs)
    }

    pub fn api_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.api_window_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `STOCKLEAGUE_CONFIG` or the default path, falling back to
    /// defaults when the default file doesn't exist. Environment overrides
    /// are applied last.
    pub fn load_from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(&path)?,
            Err(_) if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => Self::default(),
        };
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.storage.database_url = url;
        }
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.league.starting_balance < Decimal::ZERO {
            bail!("league.starting_balance must not be negative");
        }
        if self.prices.cache_ttl_secs <= 0 || self.prices.api_window_secs <= 0 {
            bail!("prices.cache_ttl_secs and prices.api_window_secs must be positive");
        }
        if self.prices.max_api_calls == 0 {
            bail!("prices.max_api_calls must be at least 1");
        }
        Ok(())
    }
}
