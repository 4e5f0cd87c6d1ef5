//! Error types for the loan lifecycle core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes exposed to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    DbFailure = 2,
    NoSuchEntity = 3,
    BadValue = 4,
    InvalidInterval = 5,
    InvalidTransition = 6,
    ReservationOverlap = 7,
    ItemNotAvailable = 8,
    AlreadyReturned = 9,
    NotOwner = 10,
    AlreadyStarted = 11,
    MissingReason = 12,
    NotTechnician = 13,
    ConcurrentUpdate = 14,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid interval: start must be before end")]
    InvalidInterval,

    #[error("Reservation {0} not found")]
    ReservationNotFound(i32),

    #[error("Loan {0} not found")]
    LoanNotFound(i32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} {entity} in status {from}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("Reservation {reservation_id} overlaps an active reservation on asset {asset_id}")]
    ReservationOverlap { reservation_id: i32, asset_id: i32 },

    #[error("Asset {0} is not available")]
    ItemUnavailable(i32),

    #[error("Loan {0} has already been returned")]
    AlreadyReturned(i32),

    #[error("Only the requester may cancel reservation {0}")]
    Ownership(i32),

    #[error("Reservation {0} has already started")]
    AlreadyStarted(i32),

    #[error("A reason is required to deny a reservation")]
    MissingReason,

    #[error("User {0} is not a technician")]
    NotTechnician(i32),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrent update: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub(crate) fn transition(entity: &'static str, from: impl ToString, action: &'static str) -> Self {
        AppError::InvalidStateTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::InvalidInterval => (StatusCode::BAD_REQUEST, ErrorCode::InvalidInterval),
            AppError::ReservationNotFound(_) | AppError::LoanNotFound(_) | AppError::NotFound(_) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchEntity)
            }
            AppError::InvalidStateTransition { .. } => {
                (StatusCode::CONFLICT, ErrorCode::InvalidTransition)
            }
            AppError::ReservationOverlap { .. } => {
                (StatusCode::CONFLICT, ErrorCode::ReservationOverlap)
            }
            AppError::ItemUnavailable(_) => (StatusCode::CONFLICT, ErrorCode::ItemNotAvailable),
            AppError::AlreadyReturned(_) => (StatusCode::BAD_REQUEST, ErrorCode::AlreadyReturned),
            AppError::Ownership(_) => (StatusCode::FORBIDDEN, ErrorCode::NotOwner),
            AppError::AlreadyStarted(_) => (StatusCode::BAD_REQUEST, ErrorCode::AlreadyStarted),
            AppError::MissingReason => (StatusCode::BAD_REQUEST, ErrorCode::MissingReason),
            AppError::NotTechnician(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::NotTechnician)
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorCode::ConcurrentUpdate),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
