use crate::error::AppResult;
use crate::models::MediaCallbackRequest;
use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// Attach late media to an existing message
///
/// POST /api/v1/messages/media-callback
pub async fn media_callback(
    state: web::Data<AppState>,
    body: web::Json<MediaCallbackRequest>,
) -> AppResult<HttpResponse> {
    let response = state.media.process(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/v1/messages/media-callback",
        web::post().to(media_callback),
    );
}
