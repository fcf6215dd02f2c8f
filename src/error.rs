use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Failure kinds surfaced by the identity operations. Every variant maps to a
/// stable HTTP status and error code; internal details never leave the process.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("user with email {0} already exists")]
    AlreadyExists(String),
    #[error("user not found")]
    NotFound,
    #[error("invalid email or password")]
    Unauthorized,
    #[error("{0}")]
    InvalidInput(String),
    #[error("failed to exchange code: {0}")]
    ExchangeFailed(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Wraps a lower-level failure with the operation it interrupted.
    pub fn internal<E>(op: &'static str, err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        ServiceError::Internal(err.into().context(op))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::AlreadyExists(_) => StatusCode::CONFLICT,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::ExchangeFailed(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::AlreadyExists(_) => "CONFLICT",
            ServiceError::NotFound => "NOT_FOUND",
            ServiceError::Unauthorized => "UNAUTHORIZED",
            ServiceError::InvalidInput(_) => "VALIDATION",
            ServiceError::ExchangeFailed(_) => "CODE",
            ServiceError::Internal(_) => "SERVER",
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::AlreadyExists(_) => "user already exists".into(),
            ServiceError::NotFound => "user not found".into(),
            ServiceError::Unauthorized => "invalid email or password".into(),
            ServiceError::InvalidInput(msg) => msg.clone(),
            ServiceError::ExchangeFailed(_) => "invalid authorization code".into(),
            ServiceError::Internal(_) => "something went wrong".into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub errors: BTreeMap<&'static str, Vec<String>>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if let ServiceError::Internal(e) = &self {
            error!(error = ?e, "internal error");
        }
        let body = ErrorBody {
            errors: BTreeMap::from([(self.code(), vec![self.public_message()])]),
        };
        (self.status(), Json(body)).into_response()
    }
}
