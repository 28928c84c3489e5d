use crate::error::{AppError, AppResult};
use crate::models::{HistoryQuery, HistoryResponse, SendMessageRequest};
use crate::services::cursor;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use tracing::debug;
use uuid::Uuid;

/// Send a message through the workspace relay
///
/// POST /api/v1/messages/send
pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<SendMessageRequest>,
) -> AppResult<HttpResponse> {
    let outcome = state.pipeline.send(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outcome.into_response()))
}

/// Page of conversation history, newest first
///
/// GET /api/v1/conversations/{id}/messages?limit=&before=
pub async fn list_messages(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> AppResult<HttpResponse> {
    let conversation_id = path.into_inner();
    let query = query.into_inner();

    let before = query
        .before
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(cursor::decode)
        .transpose()?;

    let conversation = state
        .directory
        .conversation(conversation_id)
        .await?
        .ok_or(AppError::ConversationNotFound)?;
    if query
        .workspace_id
        .is_some_and(|workspace_id| workspace_id != conversation.workspace_id)
    {
        return Err(AppError::ConversationNotFound);
    }

    let limit = state.config.history_limit(query.limit);
    let mut items = state.store.history(conversation_id, limit + 1, before).await?;

    let next_before = if items.len() > limit as usize {
        items.truncate(limit as usize);
        items.last().map(cursor::encode_message)
    } else {
        None
    };
    debug!(
        conversation_id = %conversation_id,
        returned = items.len(),
        has_more = next_before.is_some(),
        "History page"
    );

    Ok(HttpResponse::Ok().json(HistoryResponse { items, next_before }))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/messages/send", web::post().to(send_message))
        .route(
            "/api/v1/conversations/{id}/messages",
            web::get().to(list_messages),
        );
}
