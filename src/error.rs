use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Failure taxonomy for one reconciliation step (an inbound event or a scheduled group).
/// Nothing here is fatal to the process; the caller logs and moves on.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("malformed input: {0}")]
    Malformed(String),
}

impl ReconcileError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ReconcileError::Malformed(message.into())
    }

    /// True when the store rejected a write because the row already exists.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            ReconcileError::Store(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(?self, "rejecting webhook request");
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
