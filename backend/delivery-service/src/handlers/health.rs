use crate::metrics;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "delivery-service",
    }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}
