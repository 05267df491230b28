use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

lazy_static! {
    static ref ID_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.@:-]{1,64}$").unwrap();
}

/// Accepts identifiers of poll, option and actor rows: 1 to 64 characters of
/// `[A-Za-z0-9_.@:-]`.
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub status: PollStatus,
    pub options: Vec<PollOption>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub vote_count: i64,
}

/// Lifecycle of a poll. Transitions only move forward and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Draft,
    Active,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
        }
    }

    /// Whether the admin surface may move a poll from `self` to `next`.
    pub fn can_become(&self, next: PollStatus) -> bool {
        matches!(
            (self, next),
            (PollStatus::Draft, PollStatus::Active) | (PollStatus::Active, PollStatus::Closed)
        )
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PollStatus::Draft),
            "active" => Ok(PollStatus::Active),
            "closed" => Ok(PollStatus::Closed),
            other => Err(format!("Unknown poll status: {}", other)),
        }
    }
}

/// A cast vote. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub poll_id: String,
    pub actor_id: String,
    pub option_id: String,
    pub cast_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(question: String, options: Vec<String>) -> Self {
        let options = options
            .into_iter()
            .map(|text| PollOption {
                id: Uuid::new_v4().to_string(),
                text,
                vote_count: 0,
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            question,
            status: PollStatus::Draft,
            options,
            created_at: Utc::now(),
        }
    }
}
