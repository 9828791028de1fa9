//! Key-value configuration storage backed by SQLite, and the typed
//! [`Settings`] read from it.
//!
//! Shares a database with [`SqliteStore`](crate::store::sqlite::SqliteStore).
//! Pass the same path to both.

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::coach::RetryConfig;
use crate::consts::MAX_RATE_WINDOW_SECS;
use crate::limiter::RateLimitConfig;

pub const RATE_WINDOW_SECS: &str = "rate.window_secs";
pub const RATE_ANONYMOUS_LIMIT: &str = "rate.anonymous_limit";
pub const RATE_AUTHENTICATED_LIMIT: &str = "rate.authenticated_limit";
pub const RATE_SWEEP_INTERVAL_SECS: &str = "rate.sweep_interval_secs";
pub const PROVIDER_ATTEMPT_TIMEOUT_SECS: &str = "provider.attempt_timeout_secs";
pub const PROVIDER_MAX_RETRIES: &str = "provider.max_retries";
pub const PROVIDER_BACKOFF_BASE_MS: &str = "provider.backoff_base_ms";

/// Every key [`Settings::load`] understands.
pub const KNOWN_KEYS: &[&str] = &[
    RATE_WINDOW_SECS,
    RATE_ANONYMOUS_LIMIT,
    RATE_AUTHENTICATED_LIMIT,
    RATE_SWEEP_INTERVAL_SECS,
    PROVIDER_ATTEMPT_TIMEOUT_SECS,
    PROVIDER_MAX_RETRIES,
    PROVIDER_BACKOFF_BASE_MS,
];

/// Persistent key-value configuration store.
pub struct Config {
    conn: Mutex<Connection>,
}

impl Config {
    /// Open or create the config table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open config database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create config table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("config connection lock poisoned"))
    }

    /// Get a config value by key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a config value (upsert).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Remove a config key.
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Runtime tuning for the pipeline. Compiled defaults, overridden by any
/// keys present in [`Config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub rate: RateLimitConfig,
    pub retry: RetryConfig,
}

impl Settings {
    pub fn load(config: &Config) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(secs) = read::<u64>(config, RATE_WINDOW_SECS)? {
            if secs == 0 || secs > MAX_RATE_WINDOW_SECS {
                bail!("{RATE_WINDOW_SECS} must be between 1 and {MAX_RATE_WINDOW_SECS}");
            }
            settings.rate.window = Duration::from_secs(secs);
        }
        if let Some(limit) = read::<u32>(config, RATE_ANONYMOUS_LIMIT)? {
            settings.rate.anonymous_limit = limit;
        }
        if let Some(limit) = read::<u32>(config, RATE_AUTHENTICATED_LIMIT)? {
            settings.rate.authenticated_limit = limit;
        }
        if let Some(secs) = read::<u64>(config, RATE_SWEEP_INTERVAL_SECS)? {
            settings.rate.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read::<u64>(config, PROVIDER_ATTEMPT_TIMEOUT_SECS)? {
            if secs == 0 {
                bail!("{PROVIDER_ATTEMPT_TIMEOUT_SECS} must be positive");
            }
            settings.retry.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = read::<u32>(config, PROVIDER_MAX_RETRIES)? {
            settings.retry.max_retries = retries;
        }
        if let Some(ms) = read::<u64>(config, PROVIDER_BACKOFF_BASE_MS)? {
            settings.retry.backoff_base = Duration::from_millis(ms);
        }

        Ok(settings)
    }
}

fn read<T>(config: &Config, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    config
        .get(key)?
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value '{raw}' for config key {key}"))
        })
        .transpose()
}
