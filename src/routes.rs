// src/routes.rs
use std::time::Duration;

use axum::{
    extract::Request,
    routing::{delete, get, post, put},
    Router,
};
use http::{header::CONTENT_TYPE, HeaderValue, Method};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info_span, warn};
use uuid::Uuid;

use crate::{handlers, state::AppState};

fn poll_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_polls))
        .route("/create", post(handlers::create_poll))
        .route("/categories", get(handlers::categories))
        .route("/health", get(handlers::polls_health))
        .route("/category/{category}", get(handlers::polls_by_category))
        .route("/user/{user_id}", get(handlers::polls_by_user))
        .route("/visibility/{visibility}", get(handlers::polls_by_visibility))
        .route("/{id}", get(handlers::get_poll))
        .route("/{id}/vote", post(handlers::vote_on_poll))
        .route("/{id}/delete", delete(handlers::delete_poll))
        .route("/{id}/statistics", get(handlers::poll_statistics))
        .route("/{id}/reconcile", post(handlers::reconcile_poll))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_users))
        .route("/create", post(handlers::create_user))
        .route("/health", get(handlers::users_health))
        .route("/active", get(handlers::active_users))
        .route("/loyalty-tier/{tier}", get(handlers::users_by_tier))
        .route("/exists/{email}", get(handlers::user_exists))
        .route("/email/{email}", get(handlers::get_user_by_email))
        .route("/{id}", get(handlers::get_user))
        .route("/{id}/update", put(handlers::update_user))
        .route("/{id}/loyalty-points", post(handlers::add_loyalty_points))
        .route("/{id}/verify-email", post(handlers::verify_email))
        .route("/{id}/deactivate", post(handlers::deactivate_user))
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/forgot", post(handlers::forgot_password))
        .route("/verify-otp", post(handlers::verify_otp))
        .route("/reset-password", post(handlers::reset_password))
}

fn cors(allow_origin: Option<&str>) -> CorsLayer {
    let origin = match allow_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(err)) => {
            warn!(%err, "invalid CORS_ALLOW_ORIGIN, allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

pub fn create_routes(state: AppState, allow_origin: Option<&str>) -> Router {
    let api = Router::new()
        .nest("/polls", poll_routes())
        .nest("/users", user_routes())
        .nest("/auth", auth_routes());

    Router::new()
        .nest("/api", api)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request| {
                info_span!(
                    "request",
                    id = %Uuid::new_v4(),
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }),
        )
        .layer(cors(allow_origin))
        .with_state(state)
}
