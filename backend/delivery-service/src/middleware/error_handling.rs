use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_types as kinds, ErrorResponse};

/// Map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let error_type = match err {
        AppError::Validation(_) | AppError::InvalidCursor(_) => kinds::VALIDATION_ERROR,
        AppError::ConversationNotFound
        | AppError::ContactNotFound
        | AppError::ConnectionNotFound
        | AppError::MessageNotFound => kinds::NOT_FOUND_ERROR,
        AppError::ProviderNotConfigured(_) => kinds::CONFIGURATION_ERROR,
        AppError::RelayFailed(_) | AppError::MediaProcessing(_) => kinds::UPSTREAM_ERROR,
        AppError::PersistenceFailed(_)
        | AppError::Config(_)
        | AppError::StartServer(_)
        | AppError::Internal(_) => kinds::SERVER_ERROR,
    };

    let mut response = ErrorResponse::new(&err.to_string(), status.as_u16(), error_type, err.code());
    if let AppError::RelayFailed(details) | AppError::MediaProcessing(details) = err {
        response = response.with_details(details.clone());
    }

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, body) = map_error(err);
    HttpResponse::build(status).json(body)
}
