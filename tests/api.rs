use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use poll_service::{routes::create_routes, state::AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    create_routes(AppState::in_memory(), None)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_user(app: &Router, email: &str) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/users/create",
        Some(json!({ "email": email, "firstName": "Test" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_i64().unwrap()
}

async fn create_poll(app: &Router, creator: i64) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/polls/create",
        Some(json!({
            "question": "Which film on Friday?",
            "options": ["A", "B"],
            "category": "movies",
            "visibility": "public",
            "createdByUserId": creator,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["votes"], json!({ "A": 0, "B": 0 }));
    assert_eq!(body["totalVotes"], 0);
    assert_eq!(body["visibility"], "PUBLIC");
    body["id"].as_i64().unwrap()
}

async fn vote(app: &Router, poll: i64, voter: i64, option: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/polls/{poll}/vote"),
        Some(json!({ "option": option, "voterUserId": voter })),
    )
    .await
}

#[tokio::test]
async fn vote_flow_and_statistics() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    let poll = create_poll(&app, creator).await;

    let mut voters = Vec::new();
    for email in ["u1@example.com", "u2@example.com", "u3@example.com"] {
        voters.push(create_user(&app, email).await);
    }

    for (voter, option) in voters.iter().zip(["A", "B", "A"]) {
        let (status, body) = vote(&app, poll, *voter, option).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["vote"]["option"], option);
    }

    let (status, body) = send(&app, "GET", &format!("/api/polls/{poll}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["votes"], json!({ "A": 2, "B": 1 }));
    assert_eq!(body["totalVotes"], 3);
    assert_eq!(body["createdBy"]["id"], creator);

    let (status, body) = send(&app, "GET", &format!("/api/polls/{poll}/statistics"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalVotes"], 3);
    assert_eq!(body["optionStats"]["A"], json!({ "votes": 2, "percentage": 66.67 }));
    assert_eq!(body["optionStats"]["B"], json!({ "votes": 1, "percentage": 33.33 }));
    assert_eq!(body["participationRate"], 3.0);
}

#[tokio::test]
async fn statistics_on_empty_poll() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    let poll = create_poll(&app, creator).await;

    let (status, body) = send(&app, "GET", &format!("/api/polls/{poll}/statistics"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["optionStats"]["A"]["percentage"], 0.0);
    assert_eq!(body["participationRate"], 0.0);
}

#[tokio::test]
async fn vote_errors() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    let poll = create_poll(&app, creator).await;

    let (status, body) = vote(&app, poll, creator, "C").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("\"C\""));

    let (status, _) = vote(&app, poll, creator, "A").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = vote(&app, poll, creator, "B").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "You have already voted in this poll");

    let (status, _) = vote(&app, 404, creator, "A").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", &format!("/api/polls/{poll}"), None).await;
    assert_eq!(body["totalVotes"], 1);
}

#[tokio::test]
async fn create_poll_validation_reports_fields() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/polls/create",
        Some(json!({
            "question": "One option?",
            "options": ["only"],
            "category": "",
            "createdByUserId": creator,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["options"].is_array());
    assert!(body["errors"]["category"].is_array());
}

#[tokio::test]
async fn only_creator_deletes() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    let other = create_user(&app, "other@example.com").await;
    let poll = create_poll(&app, creator).await;
    vote(&app, poll, other, "B").await;

    let uri = format!("/api/polls/{poll}/delete?userId={other}");
    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&app, "GET", &format!("/api/polls/{poll}"), None).await;
    assert_eq!(body["totalVotes"], 1);

    let uri = format!("/api/polls/{poll}/delete?userId={creator}");
    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", &format!("/api/polls/{poll}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_and_categories() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    create_poll(&app, creator).await;

    let (status, body) = send(&app, "GET", "/api/polls/categories", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["movies"]));

    let (_, body) = send(&app, "GET", "/api/polls/category/movies", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/api/polls/visibility/private", None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", "/api/polls/visibility/nobody", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, "GET", &format!("/api/polls?userId={creator}"), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", &format!("/api/polls/user/{creator}"), None).await;
    assert_eq!(body[0]["createdBy"]["email"], "creator@example.com");
}

#[tokio::test]
async fn reconcile_reports_no_drift_after_votes() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    let poll = create_poll(&app, creator).await;
    vote(&app, poll, creator, "A").await;

    let (status, body) = send(&app, "POST", &format!("/api/polls/{poll}/reconcile"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drifted"], false);
    assert_eq!(body["after"], json!({ "A": 1, "B": 0 }));
}

#[tokio::test]
async fn loyalty_points() {
    let app = app();
    let user = create_user(&app, "fan@example.com").await;

    let uri = format!("/api/users/{user}/loyalty-points");
    let (status, body) = send(&app, "POST", &uri, Some(json!({ "points": 150 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loyaltyTier"], "SILVER");

    let (status, _) = send(&app, "POST", &uri, Some(json!({ "points": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, "GET", "/api/users/loyalty-tier/silver", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/api/users/exists/fan@example.com", None).await;
    assert_eq!(body["exists"], true);
}

#[tokio::test]
async fn password_reset_rejects_wrong_code() {
    let app = app();
    create_user(&app, "fan@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/forgot",
        Some(json!({ "email": "fan@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/verify-otp",
        Some(json!({ "email": "fan@example.com", "otp": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/polls/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
}

#[tokio::test]
async fn malformed_requests_get_field_errors() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/polls/create",
        Some(json!({
            "question": "No options?",
            "category": "movies",
            "createdByUserId": creator,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["options"], json!(["This field is required."]));

    let (status, body) = send(&app, "DELETE", "/api/polls/1/delete", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["userId"], json!(["This field is required."]));

    let (status, body) = send(&app, "GET", "/api/polls/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["path"].is_array());

    let request = Request::builder()
        .method("POST")
        .uri("/api/users/create")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_directory_updates() {
    let app = app();
    let ada = create_user(&app, "ada@example.com").await;
    let bob = create_user(&app, "bob@example.com").await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/users/{ada}/update"),
        Some(json!({ "lastName": "Lovelace" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["firstName"], "Test");
    assert_eq!(body["lastName"], "Lovelace");

    let (status, body) = send(&app, "POST", &format!("/api/users/{ada}/verify-email"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["emailVerified"], true);

    let (status, body) = send(&app, "POST", &format!("/api/users/{bob}/deactivate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], false);

    let (_, body) = send(&app, "GET", "/api/users/active", None).await;
    let active: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_i64().unwrap())
        .collect();
    assert_eq!(active, vec![ada]);

    let (status, body) = send(&app, "GET", "/api/users/email/bob@example.com", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], bob);

    let (status, _) = send(&app, "POST", "/api/users/404/deactivate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creator_summary_carries_display_name() {
    let app = app();
    let creator = create_user(&app, "creator@example.com").await;
    let poll = create_poll(&app, creator).await;

    let (_, body) = send(&app, "GET", &format!("/api/polls/{poll}"), None).await;
    assert_eq!(body["createdBy"]["displayName"], "Test");
}
