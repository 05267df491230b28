use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use log::info;
use serde::Deserialize;

use crate::error::{ApiError, StoreError};
use crate::identity::{Authenticated, Identity};
use crate::models::{Poll, PollStatus};
use crate::state::AppState;
use crate::tally::{PollView, TallyAudit};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<PollStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: PollStatus,
}

fn require_admin(identity: &Identity) -> Result<(), ApiError> {
    if identity.is_admin() {
        Ok(())
    } else {
        info!("{} ({:?}) tried an admin action", identity.actor_id, identity.role);
        Err(ApiError::Forbidden)
    }
}

/// `GET /polls/{poll_id}`
pub async fn get_poll(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(poll_id): Path<String>,
) -> Result<Json<PollView>, ApiError> {
    Ok(Json(state.reader.get_poll_view(&identity, &poll_id).await?))
}

/// `GET /polls?status=active`
pub async fn list_polls(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<PollView>>, ApiError> {
    let Query(query) = query.map_err(|e| StoreError::Validation(e.body_text()))?;
    Ok(Json(state.reader.list_poll_views(&identity, query.status).await?))
}

/// `POST /polls` (admin)
pub async fn create_poll(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    payload: Result<Json<CreatePollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Poll>), ApiError> {
    require_admin(&identity)?;
    let Json(request) = payload.map_err(|e| StoreError::Validation(e.body_text()))?;

    let poll = state.database.create_poll(&request.question, &request.options).await?;
    info!("{} created poll {}", identity.actor_id, poll.id);

    Ok((StatusCode::CREATED, Json(poll)))
}

/// `POST /polls/{poll_id}/status` (admin)
pub async fn set_status(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(poll_id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Poll>, ApiError> {
    require_admin(&identity)?;
    let Json(request) = payload.map_err(|e| StoreError::Validation(e.body_text()))?;

    Ok(Json(state.database.set_status(&poll_id, request.status).await?))
}

/// `GET /polls/{poll_id}/audit` (admin)
pub async fn audit_poll(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(poll_id): Path<String>,
) -> Result<Json<TallyAudit>, ApiError> {
    require_admin(&identity)?;
    Ok(Json(state.reader.audit(&poll_id).await?))
}
