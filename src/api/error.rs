use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::EngineError;

/// Errors returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("missing caller identity")]
    Unauthenticated,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                self.to_string(),
            ),
            ApiError::Engine(e) => match e {
                EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
                EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation", msg.clone()),
                EngineError::Conflict { .. } => (StatusCode::CONFLICT, "conflict", e.to_string()),
                EngineError::Unauthorized => (StatusCode::FORBIDDEN, "forbidden", e.to_string()),
                EngineError::TransientIo(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "store temporarily unavailable, try again".to_string(),
                ),
                EngineError::Timeout(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "timeout",
                    "store timed out, the change may still have been applied".to_string(),
                ),
                EngineError::Internal(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason, message) = self.parts();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": reason, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: EngineError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(EngineError::not_found("finding", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status(EngineError::Validation("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(EngineError::Conflict {
                current: "RESOLVED".into(),
                attempted: "acknowledge"
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(EngineError::Unauthorized), StatusCode::FORBIDDEN);
        assert_eq!(status(EngineError::TransientIo("busy".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(EngineError::Timeout("slow".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(EngineError::Internal("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Unauthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let (_, _, message) = ApiError::from(EngineError::Internal("sqlite path /var/x".into())).parts();
        assert_eq!(message, "internal error");
    }
}
