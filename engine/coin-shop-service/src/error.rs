//! Error types for the HTTP layer

use coin_ledger::ServiceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use warp::http::StatusCode;

/// Errors rendered as HTTP responses
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl warp::reject::Reject for ApiError {}

/// Result type for the HTTP layer
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Body of every non-200 response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Service(e) => match e {
                ServiceError::WrongCredentials => StatusCode::UNAUTHORIZED,
                ServiceError::NoSuchUser(_)
                | ServiceError::NoSuchItem(_)
                | ServiceError::InsufficientFunds
                | ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message shown to the client; internal details stay in the logs.
    pub fn public_message(&self) -> String {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}
