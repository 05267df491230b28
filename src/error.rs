use axum::{
    Json,
    http::{StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use log::error;
use serde_json::json;
use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::identity::AuthError;
use crate::models::PollStatus;

// SQLite primary result codes that mean "someone else holds the lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Every way `SubmitVote` can end other than a committed vote.
#[derive(Error, Debug)]
pub enum VoteError {
    #[error("Malformed request: {0}")]
    Validation(String),

    #[error("You have already voted in this poll")]
    DuplicateVote,

    #[error("This poll is closed")]
    PollClosed,

    #[error("That option does not belong to this poll")]
    InvalidOption,

    #[error("Poll not found")]
    NotFound,

    #[error("The vote could not be recorded right now, please retry")]
    Transient,

    #[error("Unexpected store failure: {0}")]
    Unknown(String),
}

impl VoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VoteError::Transient)
    }
}

impl From<sqlx::Error> for VoteError {
    fn from(err: sqlx::Error) -> Self {
        match classify(&err) {
            StoreFault::UniqueViolation => VoteError::DuplicateVote,
            StoreFault::ForeignKeyViolation => VoteError::InvalidOption,
            StoreFault::Contention => VoteError::Transient,
            StoreFault::Missing => VoteError::NotFound,
            StoreFault::Other => VoteError::Unknown(err.to_string()),
        }
    }
}

/// Errors from the administration and read paths.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Poll not found")]
    NotFound,

    #[error("Cannot move a poll from {from} to {to}")]
    InvalidTransition { from: PollStatus, to: PollStatus },

    #[error("Malformed request: {0}")]
    Validation(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(e) if classify(e) == StoreFault::Contention)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreFault {
    UniqueViolation,
    ForeignKeyViolation,
    Contention,
    Missing,
    Other,
}

pub(crate) fn classify(err: &sqlx::Error) -> StoreFault {
    match err {
        sqlx::Error::Database(db_err) => match db_err.kind() {
            ErrorKind::UniqueViolation => StoreFault::UniqueViolation,
            ErrorKind::ForeignKeyViolation => StoreFault::ForeignKeyViolation,
            _ => {
                // extended codes (BUSY_SNAPSHOT = 517, ...) carry the primary code in the low byte
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                match primary {
                    Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => StoreFault::Contention,
                    _ => StoreFault::Other,
                }
            }
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreFault::Contention,
        sqlx::Error::RowNotFound => StoreFault::Missing,
        _ => StoreFault::Other,
    }
}

/// HTTP-facing error. Everything a handler can fail with funnels through here.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Only administrators may do that")]
    Forbidden,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Vote(e) => match e {
                VoteError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                VoteError::DuplicateVote => (StatusCode::BAD_REQUEST, "duplicate_vote"),
                VoteError::PollClosed => (StatusCode::BAD_REQUEST, "poll_closed"),
                VoteError::InvalidOption => (StatusCode::BAD_REQUEST, "invalid_option"),
                VoteError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                VoteError::Transient => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
                VoteError::Unknown(_) => (StatusCode::INTERNAL_SERVER_ERROR, "unknown"),
            },
            ApiError::Store(e) => match e {
                StoreError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                StoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                StoreError::Database(_) if e.is_transient() => {
                    (StatusCode::SERVICE_UNAVAILABLE, "transient")
                }
                StoreError::Database(_) | StoreError::Corrupt(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "unknown")
                }
            },
            ApiError::Auth(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let retryable = status == StatusCode::SERVICE_UNAVAILABLE;

        // internal detail stays in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "Something went wrong".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": code,
            "message": message,
            "retryable": retryable,
        }));

        if retryable {
            (status, [(RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
