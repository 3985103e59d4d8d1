// src/handlers.rs
use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    extract::{AppJson, AppPath, AppQuery},
    models::{
        AddLoyaltyPointsRequest, CreatePollRequest, CreateUserRequest, DeletePollQuery,
        ForgotPasswordRequest, LoyaltyTier, Poll, PollFilter, PollListQuery, PollResponse,
        PollVisibility, UpdateUserRequest, User, VerifyOtpRequest, VoteRequest, VoteResponse,
    },
    otp, poll,
    state::AppState,
    stats::PollStatistics,
    store::TallyReconciliation,
    users,
};

async fn poll_response(state: &AppState, poll: Poll) -> AppResult<PollResponse> {
    let creator = state.store.get_user(poll.created_by).await?;
    Ok(PollResponse::new(poll, creator.as_ref()))
}

async fn poll_responses(state: &AppState, polls: Vec<Poll>) -> AppResult<Vec<PollResponse>> {
    let mut creators: HashMap<i64, Option<User>> = HashMap::new();
    let mut out = Vec::with_capacity(polls.len());

    for poll in polls {
        if !creators.contains_key(&poll.created_by) {
            let creator = state.store.get_user(poll.created_by).await?;
            creators.insert(poll.created_by, creator);
        }
        let creator = creators.get(&poll.created_by).and_then(Option::as_ref);
        out.push(PollResponse::new(poll, creator));
    }
    Ok(out)
}

fn parse_visibility(raw: &str) -> AppResult<PollVisibility> {
    raw.parse().map_err(|e: String| AppError::field("visibility", e))
}

async fn filtered(state: &AppState, filter: PollFilter) -> AppResult<Json<Vec<PollResponse>>> {
    let polls = poll::list_polls(state.store.as_ref(), &filter).await?;
    Ok(Json(poll_responses(state, polls).await?))
}

// polls

pub async fn list_polls(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<PollListQuery>,
) -> AppResult<Json<Vec<PollResponse>>> {
    let filter = PollFilter {
        category: query.category,
        visibility: query.visibility.as_deref().map(parse_visibility).transpose()?,
        created_by: query.user_id,
    };
    filtered(&state, filter).await
}

pub async fn get_poll(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<PollResponse>> {
    let poll = poll::get_poll(state.store.as_ref(), id).await?;
    Ok(Json(poll_response(&state, poll).await?))
}

pub async fn create_poll(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreatePollRequest>,
) -> AppResult<(StatusCode, Json<PollResponse>)> {
    let poll = poll::create_poll(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(poll_response(&state, poll).await?)))
}

pub async fn vote_on_poll(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppJson(req): AppJson<VoteRequest>,
) -> AppResult<(StatusCode, Json<VoteResponse>)> {
    let vote = poll::cast_vote(
        state.store.as_ref(),
        &state.retry,
        id,
        req.voter_user_id,
        &req.option,
    )
    .await?;
    let poll = poll::get_poll(state.store.as_ref(), id).await?;

    Ok((
        StatusCode::CREATED,
        Json(VoteResponse {
            vote,
            poll: poll_response(&state, poll).await?,
        }),
    ))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppQuery(query): AppQuery<DeletePollQuery>,
) -> AppResult<Json<Value>> {
    poll::delete_poll(state.store.as_ref(), id, query.user_id).await?;
    Ok(Json(json!({ "message": "Poll deleted successfully" })))
}

pub async fn polls_by_category(
    State(state): State<AppState>,
    AppPath(category): AppPath<String>,
) -> AppResult<Json<Vec<PollResponse>>> {
    let filter = PollFilter {
        category: Some(category),
        ..Default::default()
    };
    filtered(&state, filter).await
}

pub async fn polls_by_user(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i64>,
) -> AppResult<Json<Vec<PollResponse>>> {
    let filter = PollFilter {
        created_by: Some(user_id),
        ..Default::default()
    };
    filtered(&state, filter).await
}

pub async fn polls_by_visibility(
    State(state): State<AppState>,
    AppPath(visibility): AppPath<String>,
) -> AppResult<Json<Vec<PollResponse>>> {
    let filter = PollFilter {
        visibility: Some(parse_visibility(&visibility)?),
        ..Default::default()
    };
    filtered(&state, filter).await
}

pub async fn poll_statistics(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<PollStatistics>> {
    Ok(Json(poll::statistics(state.store.as_ref(), id).await?))
}

pub async fn reconcile_poll(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<Value>> {
    let TallyReconciliation {
        poll_id,
        before,
        after,
    } = poll::reconcile(state.store.as_ref(), &state.retry, id).await?;

    Ok(Json(json!({
        "pollId": poll_id,
        "drifted": before != after,
        "before": before,
        "after": after,
    })))
}

pub async fn categories(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(poll::categories(state.store.as_ref()).await?))
}

pub async fn polls_health() -> Json<Value> {
    Json(json!({ "status": "UP", "service": "poll-service" }))
}

// users

pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(users::list_users(state.store.as_ref(), None).await?))
}

pub async fn active_users(State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(users::list_active_users(state.store.as_ref()).await?))
}

pub async fn users_by_tier(
    State(state): State<AppState>,
    AppPath(tier): AppPath<String>,
) -> AppResult<Json<Vec<User>>> {
    let tier: LoyaltyTier = tier
        .parse()
        .map_err(|e: String| AppError::field("tier", e))?;
    Ok(Json(users::list_users(state.store.as_ref(), Some(tier)).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<User>> {
    Ok(Json(users::get_user(state.store.as_ref(), id).await?))
}

pub async fn get_user_by_email(
    State(state): State<AppState>,
    AppPath(email): AppPath<String>,
) -> AppResult<Json<User>> {
    Ok(Json(users::get_user_by_email(state.store.as_ref(), &email).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppJson(req): AppJson<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    Ok(Json(users::update_user(state.store.as_ref(), id, req).await?))
}

pub async fn verify_email(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<User>> {
    Ok(Json(users::verify_email(state.store.as_ref(), id).await?))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<User>> {
    Ok(Json(users::deactivate_user(state.store.as_ref(), id).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = users::create_user(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn add_loyalty_points(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppJson(req): AppJson<AddLoyaltyPointsRequest>,
) -> AppResult<Json<User>> {
    Ok(Json(
        users::add_loyalty_points(state.store.as_ref(), id, req.points).await?,
    ))
}

pub async fn user_exists(
    State(state): State<AppState>,
    AppPath(email): AppPath<String>,
) -> AppResult<Json<Value>> {
    let exists = users::email_exists(state.store.as_ref(), &email).await?;
    Ok(Json(json!({ "exists": exists })))
}

pub async fn users_health() -> Json<Value> {
    Json(json!({ "status": "UP", "service": "user-service" }))
}

// password reset

pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(req): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    otp::request_password_reset(
        state.store.as_ref(),
        state.notifier.as_ref(),
        state.otp_ttl,
        &req.email,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "If an account exists for this email, an OTP has been sent",
    })))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    AppJson(req): AppJson<VerifyOtpRequest>,
) -> AppResult<Json<Value>> {
    otp::verify_otp(state.store.as_ref(), &req.email, &req.otp).await?;
    Ok(Json(json!({ "success": true, "message": "OTP verified" })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(req): AppJson<VerifyOtpRequest>,
) -> AppResult<Json<Value>> {
    otp::complete_password_reset(
        state.store.as_ref(),
        state.notifier.as_ref(),
        &req.email,
        &req.otp,
    )
    .await?;
    Ok(Json(json!({ "success": true, "message": "Password reset successful" })))
}
