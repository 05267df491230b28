use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{Poll, PollOption, PollStatus, is_valid_id};

pub const MAX_OPTIONS: usize = 20;
pub const MAX_QUESTION_LEN: usize = 500;
pub const MAX_OPTION_LEN: usize = 200;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!("Connected to {}", config.database_url);
        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single pinned connection. Each call gets
    /// a fresh, empty store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft'
                    CHECK (status IN ('draft', 'active', 'closed')),
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                vote_count INTEGER NOT NULL DEFAULT 0 CHECK (vote_count >= 0),
                UNIQUE (id, poll_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        // (option_id, poll_id) must name an option of that same poll
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_votes (
                poll_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                option_id TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id),
                FOREIGN KEY (option_id, poll_id) REFERENCES poll_options(id, poll_id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS poll_votes_poll_actor
                ON poll_votes (poll_id, actor_id);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS poll_options_poll
                ON poll_options (poll_id, position);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Store a new poll in `Draft` with every option at zero votes.
    pub async fn create_poll(&self, question: &str, options: &[String]) -> Result<Poll, StoreError> {
        let question = question.trim();
        if question.is_empty() || question.len() > MAX_QUESTION_LEN {
            return Err(StoreError::Validation(format!(
                "question must be 1..={} characters",
                MAX_QUESTION_LEN
            )));
        }

        let texts: Vec<String> = options.iter().map(|o| o.trim().to_string()).collect();
        if texts.len() < 2 || texts.len() > MAX_OPTIONS {
            return Err(StoreError::Validation(format!(
                "a poll needs 2..={} options",
                MAX_OPTIONS
            )));
        }
        if texts.iter().any(|t| t.is_empty() || t.len() > MAX_OPTION_LEN) {
            return Err(StoreError::Validation(format!(
                "option text must be 1..={} characters",
                MAX_OPTION_LEN
            )));
        }
        for (i, text) in texts.iter().enumerate() {
            if texts[..i].contains(text) {
                return Err(StoreError::Validation(format!("duplicate option: {}", text)));
            }
        }

        let poll = Poll::new(question.to_string(), texts);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO polls (id, question, status, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.question)
        .bind(poll.status.as_str())
        .bind(poll.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (i, option) in poll.options.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO poll_options (id, poll_id, text, position, vote_count)
                VALUES (?, ?, ?, ?, 0)
                "#,
            )
            .bind(&option.id)
            .bind(&poll.id)
            .bind(&option.text)
            .bind(i as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Created poll {} with {} options", poll.id, poll.options.len());

        Ok(poll)
    }

    /// Move a poll along `Draft -> Active -> Closed`. Asking for the current
    /// status again is a no-op.
    pub async fn set_status(&self, poll_id: &str, next: PollStatus) -> Result<Poll, StoreError> {
        if !is_valid_id(poll_id) {
            return Err(StoreError::NotFound);
        }

        let mut tx = self.pool.begin().await?;

        let current: String = sqlx::query_scalar("SELECT status FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;
        let current = parse_status(&current)?;

        if current != next {
            if !current.can_become(next) {
                return Err(StoreError::InvalidTransition { from: current, to: next });
            }

            // guarded on the status we read, so a racing admin cannot skip a state
            let updated = sqlx::query("UPDATE polls SET status = ? WHERE id = ? AND status = ?")
                .bind(next.as_str())
                .bind(poll_id)
                .bind(current.as_str())
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() != 1 {
                return Err(StoreError::InvalidTransition { from: current, to: next });
            }
            info!("Poll {} moved from {} to {}", poll_id, current, next);
        }

        let poll = fetch_poll(&mut tx, poll_id).await?.ok_or(StoreError::NotFound)?;
        tx.commit().await?;

        Ok(poll)
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError> {
        if !is_valid_id(poll_id) {
            return Err(StoreError::NotFound);
        }

        let mut tx = self.pool.begin().await?;
        let poll = fetch_poll(&mut tx, poll_id).await?;
        tx.commit().await?;

        poll.ok_or(StoreError::NotFound)
    }

    /// Ids of polls, newest first, optionally restricted to one status.
    pub async fn list_poll_ids(&self, status: Option<PollStatus>) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> = match status {
            Some(status) => {
                sqlx::query_scalar(
                    "SELECT id FROM polls WHERE status = ? ORDER BY created_at DESC, id",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT id FROM polls ORDER BY created_at DESC, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(ids)
    }
}

/// Reads a poll and its options inside the caller's transaction, so both come
/// from the same snapshot.
pub(crate) async fn fetch_poll(
    tx: &mut Transaction<'_, Sqlite>,
    poll_id: &str,
) -> Result<Option<Poll>, StoreError> {
    let Some(row) = sqlx::query(
        r#"
        SELECT id, question, status, created_at
        FROM polls
        WHERE id = ?
        "#,
    )
    .bind(poll_id)
    .fetch_optional(&mut **tx)
    .await?
    else {
        return Ok(None);
    };

    let options = sqlx::query(
        r#"
        SELECT id, text, vote_count
        FROM poll_options
        WHERE poll_id = ?
        ORDER BY position
        "#,
    )
    .bind(poll_id)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .map(|row| PollOption {
        id: row.get("id"),
        text: row.get("text"),
        vote_count: row.get("vote_count"),
    })
    .collect();

    Ok(Some(Poll {
        id: row.get("id"),
        question: row.get("question"),
        status: parse_status(&row.get::<String, _>("status"))?,
        options,
        created_at: parse_timestamp(&row, "created_at")?,
    }))
}

pub(crate) fn parse_status(raw: &str) -> Result<PollStatus, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

pub(crate) fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.get(column);
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse {}: {}", column, e)))
}
