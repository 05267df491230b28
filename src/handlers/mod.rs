mod poll;
mod vote;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/polls", get(poll::list_polls).post(poll::create_poll))
        .route("/polls/{poll_id}", get(poll::get_poll))
        .route("/polls/{poll_id}/vote", post(vote::submit_vote))
        .route("/polls/{poll_id}/status", post(poll::set_status))
        .route("/polls/{poll_id}/audit", get(poll::audit_poll))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
