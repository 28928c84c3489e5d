use crate::error::{AppError, AppResult};
use crate::models::WebhookAck;
use crate::services::webhook;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use message_identity::Provider;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

/// Provider webhook intake
///
/// POST /api/v1/webhooks/{provider}/{connection_id}
///
/// Answers 200 for every well-formed body, matched or not, so providers do
/// not redeliver.
pub async fn receive_webhook(
    state: web::Data<AppState>,
    path: web::Path<(String, Uuid)>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let (provider, connection_id) = path.into_inner();
    let provider: Provider = provider
        .parse()
        .map_err(|e: message_identity::UnknownVariant| AppError::Validation(e.to_string()))?;

    let payload: JsonValue = serde_json::from_slice(&body).map_err(|e| {
        warn!(provider = %provider, connection_id = %connection_id, error = %e, "Unparseable webhook body");
        AppError::Validation(format!("invalid JSON body: {e}"))
    })?;

    let events = webhook::normalize(provider, &payload);
    let summary = state
        .reconciler
        .process(provider, connection_id, events)
        .await;
    debug!(provider = %provider, connection_id = %connection_id, ?summary, "Webhook processed");

    Ok(HttpResponse::Ok().json(WebhookAck {
        received: true,
        processed: summary.processed,
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/v1/webhooks/{provider}/{connection_id}",
        web::post().to(receive_webhook),
    );
}
