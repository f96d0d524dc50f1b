//! Maps service failures onto `{"detail": ...}` HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::api::models::{DetailBody, FieldError};
use crate::service::ServiceError;
use crate::store::StoreError;

pub const NOT_JSON: &str = "Request must be in JSON format";
pub const INVALID_TIMER_ID: &str = "Invalid timer ID format.";
pub const TIMER_NOT_FOUND: &str = "Timer not found";
pub const UNEXPECTED: &str = "An unexpected error occurred.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("validation failed ({} errors)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("timer not found")]
    NotFound,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::DurationOverflow => ApiError::Validation(vec![FieldError::new(
                &[],
                "Timer duration is too large",
                "value_error",
            )]),
            ServiceError::Store(StoreError::InvalidIdentifier(_)) => {
                ApiError::BadRequest(INVALID_TIMER_ID)
            }
            ServiceError::Store(StoreError::NotFound { .. }) => ApiError::NotFound,
            other => {
                tracing::error!(error = %other, "timer request failed");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ApiError::Validation(errors) => {
                (status, Json(DetailBody { detail: errors })).into_response()
            }
            ApiError::BadRequest(msg) => (status, Json(DetailBody { detail: msg })).into_response(),
            ApiError::NotFound => {
                (status, Json(DetailBody { detail: TIMER_NOT_FOUND })).into_response()
            }
            ApiError::Internal => (status, Json(DetailBody { detail: UNEXPECTED })).into_response(),
        }
    }
}
