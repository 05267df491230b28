use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use log::{info, warn};
use serde::Deserialize;

use crate::error::{ApiError, VoteError};
use crate::identity::Authenticated;
use crate::ledger::VoteReceipt;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: String,
}

/// `POST /polls/{poll_id}/vote`
pub async fn submit_vote(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(poll_id): Path<String>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteReceipt>, ApiError> {
    let Json(request) = payload.map_err(|e| VoteError::Validation(e.body_text()))?;

    match state
        .ledger
        .submit_vote(&identity.actor_id, &poll_id, &request.option_id)
        .await
    {
        Ok(receipt) => Ok(Json(receipt)),
        Err(e) => {
            if e.is_transient() {
                warn!("Vote by {} on poll {} gave up after retries", identity.actor_id, poll_id);
            } else {
                info!("Vote by {} ({:?}) on poll {} rejected: {}", identity.actor_id, identity.role, poll_id, e);
            }
            Err(e.into())
        }
    }
}
