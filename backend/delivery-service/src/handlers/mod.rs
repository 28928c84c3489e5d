/// HTTP handlers for the delivery API
pub mod health;
pub mod live;
pub mod media;
pub mod messages;
pub mod webhooks;

use crate::error::AppError;
use actix_web::{error::InternalError, web, HttpRequest};

/// Register every route plus extractor error handling.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .configure(messages::register_routes)
        .configure(media::register_routes)
        .configure(webhooks::register_routes)
        .configure(live::register_routes)
        .configure(health::register_routes);
}

/// Malformed bodies answer with the same error envelope as everything else.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(16 * 1024 * 1024)
        .error_handler(|err, _req: &HttpRequest| {
            let app_error = AppError::Validation(err.to_string());
            InternalError::from_response(err, actix_web::ResponseError::error_response(&app_error))
                .into()
        })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req: &HttpRequest| {
        let app_error = AppError::Validation(err.to_string());
        InternalError::from_response(err, actix_web::ResponseError::error_response(&app_error)).into()
    })
}
