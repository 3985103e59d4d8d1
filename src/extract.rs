// src/extract.rs
//! Request extractors whose rejections come back as [`AppError`], so a
//! malformed body or query gets the same 400 + field map as any other
//! validation failure instead of axum's plain-text 422.
use axum::extract::{
    rejection::{JsonRejection, PathRejection, QueryRejection},
    FromRequest, FromRequestParts,
};
use tracing::debug;

use crate::error::AppError;

/// Key for problems that are not about a single field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// Turns a serde message into a field error. Missing fields name
/// themselves; anything else lands under `fallback`.
fn deserialize_error(message: &str, fallback: &str) -> AppError {
    let missing = message
        .split_once("missing field `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(name, _)| name);

    match missing {
        Some(name) => AppError::field(name, "This field is required."),
        None => AppError::field(fallback, message),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(%rejection, "rejected request body");
        match rejection {
            JsonRejection::JsonDataError(err) => deserialize_error(&err.body_text(), NON_FIELD_ERRORS),
            other => AppError::field(NON_FIELD_ERRORS, other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(%rejection, "rejected query string");
        deserialize_error(&rejection.body_text(), "query")
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        debug!(%rejection, "rejected path");
        AppError::field("path", rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldErrors;

    fn errors(err: AppError) -> FieldErrors {
        match err {
            AppError::Validation(errors) => errors,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_named() {
        let errors = errors(deserialize_error(
            "Failed to deserialize the JSON body into the target type: missing field `options` at line 1 column 80",
            NON_FIELD_ERRORS,
        ));
        assert_eq!(errors["options"], vec!["This field is required."]);
    }

    #[test]
    fn other_messages_fall_back() {
        let errors = errors(deserialize_error("invalid type: string \"x\", expected i64", "query"));
        assert_eq!(errors.len(), 1);
        assert!(errors["query"][0].contains("invalid type"));
    }
}
