// src/error.rs
use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Field name to the list of problems found with it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub type AppResult<T> = Result<T, AppError>;

pub const POINTS_OVERFLOW: &str = "Loyalty points total would exceed the maximum.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input")]
    Validation(FieldErrors),

    #[error("\"{0}\" is not an option of this poll")]
    InvalidOption(String),

    #[error("You have already voted in this poll")]
    DuplicateVote,

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid or expired OTP")]
    InvalidOtp,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidOption(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateVote => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidOtp => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PollNotFound(id) => AppError::NotFound(format!("Poll {id}")),
            StoreError::UserNotFound(id) => AppError::NotFound(format!("User {id}")),
            StoreError::DuplicateVote { .. } => AppError::DuplicateVote,
            StoreError::DuplicateEmail(email) => {
                AppError::field("email", format!("User with email {email} already exists"))
            }
            StoreError::PointsOverflow(_) => AppError::field("points", POINTS_OVERFLOW),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            AppError::Validation(errors) => json!({ "error": self.to_string(), "errors": errors }),
            AppError::Internal(cause) => {
                error!(%cause, "request failed");
                json!({ "error": "Internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
