#![allow(dead_code)]

use std::time::Duration;

use campus_polls::config::{Config, RetryPolicy};
use campus_polls::db::Database;
use campus_polls::models::{Poll, PollStatus};
use tempfile::TempDir;

/// File-backed store in WAL mode, so several connections really do race.
/// Keep the `TempDir` alive for as long as the database is used.
pub async fn file_store(busy_timeout: Duration) -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database_url: format!("sqlite://{}", dir.path().join("polls.db").display()),
        max_connections: 16,
        busy_timeout,
        bind_addr: "127.0.0.1:0".to_string(),
        retry: RetryPolicy::default(),
    };

    let database = Database::connect(&config).await.unwrap();
    (dir, database)
}

pub async fn default_store() -> (TempDir, Database) {
    file_store(Duration::from_secs(5)).await
}

pub fn retry(max_attempts: u32, backoff_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(backoff_ms),
    }
}

pub async fn active_poll(database: &Database, options: &[&str]) -> Poll {
    let options: Vec<String> = options.iter().map(|o| o.to_string()).collect();
    let poll = database.create_poll("Where should the next hackathon be?", &options).await.unwrap();
    database.set_status(&poll.id, PollStatus::Active).await.unwrap()
}

pub async fn vote_rows(database: &Database, poll_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM poll_votes WHERE poll_id = ?")
        .bind(poll_id)
        .fetch_one(database.pool())
        .await
        .unwrap()
}

pub async fn counters(database: &Database, poll_id: &str) -> Vec<i64> {
    database
        .get_poll(poll_id)
        .await
        .unwrap()
        .options
        .iter()
        .map(|o| o.vote_count)
        .collect()
}
