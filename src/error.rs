use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::store::StoreError;

/// Service-level error taxonomy. Every variant has a fixed HTTP mapping; the
/// redirect path additionally fails closed on `Storage`.
#[derive(Debug)]
pub enum ServiceError {
    Validation(String),
    Conflict(String),
    QuotaExceeded { current: i64, limit: i64 },
    BlacklistedDestination(String),
    NotFound,
    Unauthorized,
    Forbidden(String),
    Storage(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": "validation", "message": message })),
            )
                .into_response(),
            Self::Conflict(message) => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "conflict", "message": message })),
            )
                .into_response(),
            Self::QuotaExceeded { current, limit } => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": "quota_exceeded",
                    "message": "monthly link-creation quota exceeded",
                    "current": current,
                    "limit": limit,
                })),
            )
                .into_response(),
            Self::BlacklistedDestination(reason) => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": "blacklisted_destination",
                    "message": format!("destination is blacklisted: {reason}"),
                })),
            )
                .into_response(),
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            Self::Forbidden(message) => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "forbidden", "message": message })),
            )
                .into_response(),
            Self::Storage(message) => {
                tracing::error!(%message, "storage failure surfaced to client");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateCode => {
                Self::Conflict("short code is already in use".to_string())
            }
            StoreError::Unavailable(message) => Self::Storage(message),
        }
    }
}
