//! Domain error type and its translation into the response envelope.
//!
//! Services return [`AppResult`]; handlers propagate with `?` and axum turns
//! the error into an HTTP 200 envelope carrying the mapped [`ErrorCode`].
//! Store-client errors are logged here and never shown verbatim to clients.

use axum::response::{IntoResponse, Response};

use crate::response::{ApiResponse, ErrorCode};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or malformed request fields.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing, invalid, or expired credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Entity absent, or not owned by the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate unique key.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// LLM, OCR, object storage or webhook provider failure.
    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("migration of {table} v{version} failed: {reason}")]
    MigrationApply {
        table: String,
        version: u32,
        reason: String,
    },

    /// A specific business code, with an optional message override.
    #[error("{}", business_message(.0, .1))]
    Business(ErrorCode, Option<String>),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn business_message<'a>(code: &ErrorCode, msg: &'a Option<String>) -> &'a str {
    msg.as_deref().unwrap_or(code.default_message())
}

impl AppError {
    pub fn business(code: ErrorCode) -> Self {
        AppError::Business(code, None)
    }

    pub fn business_msg(code: ErrorCode, msg: impl Into<String>) -> Self {
        AppError::Business(code, Some(msg.into()))
    }

    /// The envelope code this error is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::PARAMS_ERROR,
            AppError::Auth(_) => ErrorCode::UNAUTHORIZED,
            AppError::NotFound(_) => ErrorCode::NOT_FOUND,
            AppError::Conflict(_) => ErrorCode::CONFLICT,
            AppError::Storage(_) => ErrorCode::DATABASE_ERROR,
            AppError::ExternalService(_) => ErrorCode::EXTERNAL_SERVICE_ERROR,
            AppError::MigrationApply { .. } => ErrorCode::MIGRATION_FAILED,
            AppError::Business(code, _) => *code,
            AppError::Internal(_) => ErrorCode::SYSTEM_ERROR,
        }
    }

    /// The message sent to clients. Internal details stay in the logs.
    pub fn client_message(&self) -> Option<String> {
        match self {
            AppError::Validation(m)
            | AppError::Auth(m)
            | AppError::NotFound(m)
            | AppError::Conflict(m) => Some(m.clone()),
            AppError::ExternalService(m) => Some(m.clone()),
            AppError::Business(_, m) => m.clone(),
            AppError::Storage(_) | AppError::Internal(_) | AppError::MigrationApply { .. } => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        match &self {
            AppError::Storage(_) | AppError::Internal(_) | AppError::MigrationApply { .. } => {
                tracing::error!(code = code.code(), error = %self, "request failed");
            }
            AppError::ExternalService(_) => {
                tracing::warn!(code = code.code(), error = %self, "upstream service failed");
            }
            _ => {
                tracing::debug!(code = code.code(), error = %self, "request rejected");
            }
        }
        ApiResponse::<()>::error(code, self.client_message()).into_response()
    }
}
