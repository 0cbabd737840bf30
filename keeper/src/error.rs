//! Error types for the settlement keeper

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batch_settlement::{error::SettlementError, ErrorKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl KeeperError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            KeeperError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            KeeperError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            KeeperError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            KeeperError::Settlement(err) => match err.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION"),
                ErrorKind::StateConflict => (StatusCode::CONFLICT, "STATE_CONFLICT"),
                ErrorKind::Authorization => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
                ErrorKind::Timing => (StatusCode::CONFLICT, "TIMING"),
                ErrorKind::InvariantViolation => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVARIANT_VIOLATION")
                }
                ErrorKind::Collaborator => (StatusCode::BAD_GATEWAY, "COLLABORATOR_FAILED"),
            },
        }
    }
}

impl IntoResponse for KeeperError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for KeeperError {
    fn from(err: anyhow::Error) -> Self {
        KeeperError::Internal(err.to_string())
    }
}

/// Result type alias for keeper handlers
pub type Result<T> = std::result::Result<T, KeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_errors_map_by_kind() {
        let response = KeeperError::from(SettlementError::ZeroAmount).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = KeeperError::from(SettlementError::BatchStillOpen(1)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response =
            KeeperError::from(SettlementError::Collaborator("down".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_not_found() {
        let response = KeeperError::NotFound("proposal".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
