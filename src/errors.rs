use http::StatusCode;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

/// Error body an outer transport can render for a [`ServiceError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable code, see [`ServiceError::kind`]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Optimistic-lock failure on a versioned row.
    pub fn stale(entity: &str, id: i64, expected_version: i32) -> Self {
        ServiceError::Conflict(format!(
            "{} {} was modified concurrently (expected version {})",
            entity, id, expected_version
        ))
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidOperation(_) | Self::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable snake_case code for this error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for callers.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let status = self.status_code();
        ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.kind().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// True for the rule violations callers are expected to handle, as
    /// opposed to infrastructure failures.
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ValidationError(_)
                | Self::InvalidOperation(_)
                | Self::InvalidState(_)
                | Self::Conflict(_)
                | Self::Forbidden(_)
        )
    }
}
