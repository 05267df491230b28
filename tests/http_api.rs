use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use campus_polls::config::RetryPolicy;
use campus_polls::db::Database;
use campus_polls::handlers::router;
use campus_polls::identity::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use campus_polls::state::AppState;

async fn app() -> Router {
    let database = Database::in_memory().await.unwrap();
    router(AppState::new(database, RetryPolicy::default()))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    caller: Option<(&str, &str)>,
    body: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some((actor, role)) = caller {
        request = request.header(ACTOR_ID_HEADER, actor).header(ACTOR_ROLE_HEADER, role);
    }
    let request = match body {
        Some(body) => request
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

const ADMIN: Option<(&str, &str)> = Some(("registrar", "admin"));
const STUDENT: Option<(&str, &str)> = Some(("s1024", "student"));

/// Creates and activates a poll; returns (poll id, option ids).
async fn open_poll(app: &Router) -> (String, Vec<String>) {
    let (status, poll) = send(
        app,
        Method::POST,
        "/polls",
        ADMIN,
        Some(r#"{"question":"Extend library hours?","options":["Yes","No"]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", poll);
    assert_eq!(poll["status"], "draft");

    let poll_id = poll["id"].as_str().unwrap().to_string();
    let (status, poll) = send(
        app,
        Method::POST,
        &format!("/polls/{}/status", poll_id),
        ADMIN,
        Some(r#"{"status":"active"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["status"], "active");

    let options = poll["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    (poll_id, options)
}

fn vote_body(option_id: &str) -> String {
    json!({ "optionId": option_id }).to_string()
}

#[tokio::test]
async fn health_needs_no_identity() {
    let app = app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/polls", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = send(&app, Method::GET, "/polls", Some(("s1", "wizard")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn students_cannot_administer_polls() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/polls",
        STUDENT,
        Some(r#"{"question":"q","options":["a","b"]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn vote_then_duplicate_then_view() {
    let app = app().await;
    let (poll_id, options) = open_poll(&app).await;
    let vote_uri = format!("/polls/{}/vote", poll_id);

    let (status, receipt) = send(&app, Method::POST, &vote_uri, STUDENT, Some(&vote_body(&options[0]))).await;
    assert_eq!(status, StatusCode::OK, "{}", receipt);
    assert_eq!(receipt["optionId"], options[0].as_str());
    assert_eq!(receipt["actorId"], "s1024");

    let (status, body) = send(&app, Method::POST, &vote_uri, STUDENT, Some(&vote_body(&options[1]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "duplicate_vote");
    assert_eq!(body["retryable"], false);

    let (status, view) = send(&app, Method::GET, &format!("/polls/{}", poll_id), STUDENT, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["options"][0]["votes"], 1);
    assert_eq!(view["options"][1]["votes"], 0);
    assert_eq!(view["totalVotes"], 1);
    assert_eq!(view["hasVoted"], true);
    assert_eq!(view["votedOptionId"], options[0].as_str());

    let (status, view) = send(&app, Method::GET, &format!("/polls/{}", poll_id), Some(("s2048", "faculty")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["hasVoted"], false);
    assert_eq!(view["votedOptionId"], Value::Null);

    let (status, audit) = send(&app, Method::GET, &format!("/polls/{}/audit", poll_id), ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["counterSum"], 1);
    assert_eq!(audit["voteRows"], 1);
}

#[tokio::test]
async fn vote_rejections_map_to_status_codes() {
    let app = app().await;
    let (poll_id, options) = open_poll(&app).await;
    let (other_id, other_options) = open_poll(&app).await;
    let vote_uri = format!("/polls/{}/vote", poll_id);

    let (status, body) = send(&app, Method::POST, &vote_uri, STUDENT, Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = send(&app, Method::POST, &vote_uri, STUDENT, Some(&vote_body(&other_options[0]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_option");

    let (status, body) = send(&app, Method::POST, "/polls/nope/vote", STUDENT, Some(&vote_body(&options[0]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/polls/{}/status", other_id),
        ADMIN,
        Some(r#"{"status":"closed"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/polls/{}/vote", other_id),
        STUDENT,
        Some(&vote_body(&other_options[0])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "poll_closed");
}

#[tokio::test]
async fn draft_polls_are_invisible_to_voters() {
    let app = app().await;
    let (status, poll) = send(
        &app,
        Method::POST,
        "/polls",
        ADMIN,
        Some(r#"{"question":"Draft?","options":["a","b"]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let poll_id = poll["id"].as_str().unwrap();
    let option_id = poll["options"][0]["id"].as_str().unwrap();

    let (status, _) = send(&app, Method::GET, &format!("/polls/{}", poll_id), STUDENT, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/polls/{}/vote", poll_id),
        STUDENT,
        Some(&vote_body(option_id)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, list) = send(&app, Method::GET, "/polls", STUDENT, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 0);

    let (status, list) = send(&app, Method::GET, "/polls?status=draft", ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admin_errors() {
    let app = app().await;
    let (poll_id, _) = open_poll(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/polls/{}/status", poll_id),
        ADMIN,
        Some(r#"{"status":"draft"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let (status, body) = send(
        &app,
        Method::POST,
        "/polls",
        ADMIN,
        Some(r#"{"question":"q","options":["only one"]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = send(&app, Method::GET, "/polls?status=maybe", STUDENT, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}
