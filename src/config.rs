use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Invalid {key} value {value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub bind_addr: String,
    pub retry: RetryPolicy,
}

/// Bounded retry for transactions that failed on lock contention.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total tries, including the first one. Never below 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        // attempt is 1-based; the first retry waits `initial_backoff`
        let shift = attempt.saturating_sub(1).min(10);
        self.initial_backoff.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(25),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_attempts: u32 = try_load(&lookup, "VOTE_RETRY_ATTEMPTS", "3")?;

        Ok(Self {
            database_url: try_load(&lookup, "DATABASE_URL", "sqlite:campus_polls.db")?,
            max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
            busy_timeout: Duration::from_millis(try_load(&lookup, "DATABASE_BUSY_TIMEOUT_MS", "5000")?),
            bind_addr: try_load(&lookup, "BIND_ADDR", "0.0.0.0:8080")?,
            retry: RetryPolicy {
                max_attempts: max_attempts.max(1),
                initial_backoff: Duration::from_millis(try_load(&lookup, "VOTE_RETRY_BACKOFF_MS", "25")?),
            },
        })
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: e.to_string(),
        value,
    })
}
