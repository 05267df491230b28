//! Vote ledger: the only writer of `poll_votes` rows and `poll_options.vote_count`.
//!
//! Double voting is prevented by the unique index on `(poll_id, actor_id)`, not
//! by the "already voted?" read in the precheck. Two requests from
//! the same actor can both pass that read; only one of them can insert the row.
//! The counter bump runs in the same transaction as the insert, as an in-place
//! `vote_count = vote_count + 1`, so the sum of counters always equals the
//! number of vote rows.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use sqlx::{Row, Sqlite, Transaction};

use crate::config::RetryPolicy;
use crate::db::{Database, parse_status};
use crate::error::VoteError;
use crate::models::{PollStatus, Vote, is_valid_id};

#[derive(Debug, Clone, Serialize)]
pub struct VoteReceipt {
    #[serde(flatten)]
    pub vote: Vote,
    /// Tries it took, 1 unless lock contention forced a retry.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct VoteLedger {
    database: Database,
    retry: RetryPolicy,
}

impl VoteLedger {
    pub fn new(database: Database, retry: RetryPolicy) -> Self {
        Self { database, retry }
    }

    /// Record that `actor_id` voted for `option_id` in `poll_id`.
    ///
    /// On `Ok` exactly one vote row was inserted and exactly one counter moved
    /// by one. On any error nothing changed. `DuplicateVote` on a retried
    /// request means an earlier attempt already went through.
    pub async fn submit_vote(
        &self,
        actor_id: &str,
        poll_id: &str,
        option_id: &str,
    ) -> Result<VoteReceipt, VoteError> {
        for (name, value) in [("actor id", actor_id), ("poll id", poll_id), ("option id", option_id)] {
            if !is_valid_id(value) {
                return Err(VoteError::Validation(format!("invalid {}", name)));
            }
        }

        let mut attempt = 1;
        loop {
            debug!("Vote attempt {} by {} on poll {}", attempt, actor_id, poll_id);

            match self.try_submit(actor_id, poll_id, option_id).await {
                Ok(cast_at) => {
                    info!("Recorded vote by {} on poll {} for option {}", actor_id, poll_id, option_id);
                    return Ok(VoteReceipt {
                        vote: Vote {
                            poll_id: poll_id.to_string(),
                            actor_id: actor_id.to_string(),
                            option_id: option_id.to_string(),
                            cast_at,
                        },
                        attempts: attempt,
                    });
                }
                Err(VoteError::Transient) if attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        "Vote by {} on poll {} hit lock contention (attempt {}/{}), retrying in {:?}",
                        actor_id, poll_id, attempt, self.retry.max_attempts, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(VoteError::Unknown(detail)) => {
                    error!("Vote by {} on poll {} failed: {}", actor_id, poll_id, detail);
                    return Err(VoteError::Unknown(detail));
                }
                Err(e) => {
                    debug!("Vote by {} on poll {} rejected: {}", actor_id, poll_id, e);
                    return Err(e);
                }
            }
        }
    }

    async fn try_submit(&self, actor_id: &str, poll_id: &str, option_id: &str) -> Result<DateTime<Utc>, VoteError> {
        self.precheck(actor_id, poll_id, option_id).await?;

        let cast_at = Utc::now();
        let mut tx = self.database.pool().begin().await?;

        match record(&mut tx, actor_id, poll_id, option_id, cast_at).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(cast_at)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    // the connection discards the open transaction when it goes back to the pool
                    warn!("Rollback after failed vote returned: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Fast rejections from committed state. Saves a write transaction for the
    /// common failures; correctness does not depend on any of it.
    async fn precheck(&self, actor_id: &str, poll_id: &str, option_id: &str) -> Result<(), VoteError> {
        let row = sqlx::query(
            r#"
            SELECT
                p.status,
                EXISTS (SELECT 1 FROM poll_options o WHERE o.id = ? AND o.poll_id = p.id) AS option_ok,
                EXISTS (SELECT 1 FROM poll_votes v WHERE v.poll_id = p.id AND v.actor_id = ?) AS has_voted
            FROM polls p
            WHERE p.id = ?
            "#,
        )
        .bind(option_id)
        .bind(actor_id)
        .bind(poll_id)
        .fetch_optional(self.database.pool())
        .await?
        .ok_or(VoteError::NotFound)?;

        let status = parse_status(&row.get::<String, _>("status"))
            .map_err(|e| VoteError::Unknown(e.to_string()))?;

        match status {
            // drafts are not visible to voters yet
            PollStatus::Draft => return Err(VoteError::NotFound),
            PollStatus::Closed => return Err(VoteError::PollClosed),
            PollStatus::Active => {}
        }
        if !row.get::<bool, _>("option_ok") {
            return Err(VoteError::InvalidOption);
        }
        if row.get::<bool, _>("has_voted") {
            return Err(VoteError::DuplicateVote);
        }

        Ok(())
    }
}

/// The insert and the increment, as one unit inside `tx`. The caller commits
/// on `Ok` and rolls back on `Err`.
async fn record(
    tx: &mut Transaction<'_, Sqlite>,
    actor_id: &str,
    poll_id: &str,
    option_id: &str,
    cast_at: DateTime<Utc>,
) -> Result<(), VoteError> {
    // A second row for (poll_id, actor_id) fails here on the unique index.
    // The status guard covers a poll closed after the precheck.
    let inserted = sqlx::query(
        r#"
        INSERT INTO poll_votes (poll_id, actor_id, option_id, cast_at)
        SELECT ?, ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM polls WHERE id = ? AND status = 'active')
        "#,
    )
    .bind(poll_id)
    .bind(actor_id)
    .bind(option_id)
    .bind(cast_at.to_rfc3339())
    .bind(poll_id)
    .execute(&mut **tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(VoteError::PollClosed);
    }

    let bumped = sqlx::query(
        r#"
        UPDATE poll_options
        SET vote_count = vote_count + 1
        WHERE id = ? AND poll_id = ?
        "#,
    )
    .bind(option_id)
    .bind(poll_id)
    .execute(&mut **tx)
    .await?;

    if bumped.rows_affected() != 1 {
        return Err(VoteError::InvalidOption);
    }

    Ok(())
}
