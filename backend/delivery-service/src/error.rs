use crate::middleware::error_handling;
use crate::store::StoreError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use error_types::error_codes;
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("contact not found")]
    ContactNotFound,

    #[error("connection not found")]
    ConnectionNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("relay failed: {0}")]
    RelayFailed(String),

    #[error("media processing failed: {0}")]
    MediaProcessing(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::PersistenceFailed(e.to_string())
    }
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::InvalidCursor(_) => 400,
            AppError::ConversationNotFound
            | AppError::ContactNotFound
            | AppError::ConnectionNotFound
            | AppError::MessageNotFound => 404,
            AppError::ProviderNotConfigured(_) => 424,
            AppError::RelayFailed(_) | AppError::MediaProcessing(_) => 502,
            AppError::PersistenceFailed(_)
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// Stable code written to the response body and to `metadata.error.code`
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => error_codes::INVALID_REQUEST,
            AppError::InvalidCursor(_) => error_codes::INVALID_CURSOR,
            AppError::ConversationNotFound => error_codes::CONVERSATION_NOT_FOUND,
            AppError::ContactNotFound => error_codes::CONTACT_NOT_FOUND,
            AppError::ConnectionNotFound => error_codes::CONNECTION_NOT_FOUND,
            AppError::MessageNotFound => error_codes::MESSAGE_NOT_FOUND,
            AppError::ProviderNotConfigured(_) => error_codes::PROVIDER_NOT_CONFIGURED,
            AppError::RelayFailed(_) => error_codes::RELAY_FAILED,
            AppError::MediaProcessing(_) => error_codes::MEDIA_PROCESSING_FAILED,
            AppError::PersistenceFailed(_) => error_codes::PERSISTENCE_FAILED,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
                error_codes::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Validation("x".into()).status_code(), 400);
        assert_eq!(AppError::ContactNotFound.status_code(), 404);
        assert_eq!(AppError::ProviderNotConfigured("x".into()).status_code(), 424);
        assert_eq!(AppError::RelayFailed("x".into()).status_code(), 502);
        assert_eq!(AppError::PersistenceFailed("x".into()).status_code(), 500);
    }

    #[test]
    fn test_provider_not_configured_message() {
        let err = AppError::ProviderNotConfigured("no credentials for connection".into());
        assert!(err.to_string().contains("not configured"));
        assert_eq!(err.code(), error_codes::PROVIDER_NOT_CONFIGURED);
    }
}
