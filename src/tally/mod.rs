//! Read side of polls. Every view is assembled inside a single read
//! transaction, so counters and the caller's vote row come from the same
//! committed snapshot.

use serde::Serialize;

use crate::db::{Database, fetch_poll};
use crate::error::StoreError;
use crate::identity::Identity;
use crate::models::{PollStatus, is_valid_id};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub poll_id: String,
    pub question: String,
    pub status: PollStatus,
    pub options: Vec<OptionTally>,
    pub total_votes: i64,
    pub has_voted: bool,
    pub voted_option_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionTally {
    pub id: String,
    pub text: String,
    pub votes: i64,
}

/// Counter totals next to the vote rows they should match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyAudit {
    pub poll_id: String,
    pub counter_sum: i64,
    pub vote_rows: i64,
    /// Options whose counter differs from the number of votes naming them.
    pub drifted_options: Vec<String>,
}

impl TallyAudit {
    pub fn is_consistent(&self) -> bool {
        self.counter_sum == self.vote_rows && self.drifted_options.is_empty()
    }
}

#[derive(Clone)]
pub struct TallyReader {
    database: Database,
}

impl TallyReader {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn get_poll_view(&self, viewer: &Identity, poll_id: &str) -> Result<PollView, StoreError> {
        if !is_valid_id(poll_id) {
            return Err(StoreError::NotFound);
        }

        let mut tx = self.database.pool().begin().await?;

        let poll = fetch_poll(&mut tx, poll_id).await?.ok_or(StoreError::NotFound)?;
        if poll.status == PollStatus::Draft && !viewer.is_admin() {
            return Err(StoreError::NotFound);
        }

        // same (poll_id, actor_id) lookup the unique index enforces on insert
        let voted_option_id: Option<String> = sqlx::query_scalar(
            "SELECT option_id FROM poll_votes WHERE poll_id = ? AND actor_id = ?",
        )
        .bind(poll_id)
        .bind(&viewer.actor_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        let options: Vec<OptionTally> = poll
            .options
            .into_iter()
            .map(|o| OptionTally {
                id: o.id,
                text: o.text,
                votes: o.vote_count,
            })
            .collect();

        Ok(PollView {
            poll_id: poll.id,
            question: poll.question,
            status: poll.status,
            total_votes: options.iter().map(|o| o.votes).sum(),
            options,
            has_voted: voted_option_id.is_some(),
            voted_option_id,
        })
    }

    /// Views of every poll the viewer may see, newest first.
    pub async fn list_poll_views(
        &self,
        viewer: &Identity,
        status: Option<PollStatus>,
    ) -> Result<Vec<PollView>, StoreError> {
        if status == Some(PollStatus::Draft) && !viewer.is_admin() {
            return Ok(Vec::new());
        }

        let mut views = Vec::new();
        for poll_id in self.database.list_poll_ids(status).await? {
            match self.get_poll_view(viewer, &poll_id).await {
                Ok(view) => views.push(view),
                // hidden draft
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(views)
    }

    pub async fn audit(&self, poll_id: &str) -> Result<TallyAudit, StoreError> {
        if !is_valid_id(poll_id) {
            return Err(StoreError::NotFound);
        }

        let mut tx = self.database.pool().begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let counter_sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(vote_count), 0) FROM poll_options WHERE poll_id = ?",
        )
        .bind(poll_id)
        .fetch_one(&mut *tx)
        .await?;

        let vote_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM poll_votes WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_one(&mut *tx)
            .await?;

        let drifted_options: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT o.id
            FROM poll_options o
            LEFT JOIN poll_votes v ON v.option_id = o.id AND v.poll_id = o.poll_id
            WHERE o.poll_id = ?
            GROUP BY o.id, o.vote_count
            HAVING o.vote_count != COUNT(v.option_id)
            ORDER BY o.position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TallyAudit {
            poll_id: poll_id.to_string(),
            counter_sum,
            vote_rows,
            drifted_options,
        })
    }
}
