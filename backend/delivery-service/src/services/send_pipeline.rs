//! # Send Pipeline
//!
//! Makes "submit a message" idempotent across retries and crashes:
//!
//! ```text
//! validate ─► resolve conversation/contact/connection
//!          ─► dedupe on clientMessageId ──hit──► existing row, no dispatch
//!          ─► pre-save row (status=sending)
//!          ─► Provider Adapter ──err──► row failed + metadata.error
//!          ─► row sent + correlation id
//! ```
//!
//! The row is durable before the relay is called, so a webhook that races
//! the write-back, or a crash after dispatch, still finds it.

use super::provider_adapter::{ProviderAdapter, RelayTransport, SendContext};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{SendMessageRequest, SendMessageResponse, SentMessage};
use crate::store::{Directory, InsertOutcome, MessagePatch, MessageStore};
use chrono::Utc;
use message_identity::{meta, Message, MessageStatus, MessageType, SenderType};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DUPLICATE_STATUS: &str = "duplicate";

const MAX_CLIENT_MESSAGE_ID_LEN: usize = 255;

const PLACEHOLDER_LABELS: &[&str] = &[
    "image", "imagem", "video", "vídeo", "audio", "áudio", "document", "documento", "arquivo",
    "file", "sticker", "media", "mídia",
];

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    /// The idempotency key was already used; nothing was dispatched.
    pub duplicate: bool,
    pub conversation_id: Uuid,
    pub phone_number: String,
}

impl SendOutcome {
    pub fn into_response(self) -> SendMessageResponse {
        let status = if self.duplicate {
            DUPLICATE_STATUS.to_string()
        } else {
            self.message.status.to_string()
        };

        SendMessageResponse {
            success: true,
            message: SentMessage {
                id: self.message.id,
                external_id: self.message.external_id,
                evolution_key_id: self.message.evolution_key_id,
                status,
                created_at: self.message.created_at,
            },
            conversation_id: self.conversation_id,
            phone_number: self.phone_number,
        }
    }
}

/// Request fields after validation and normalisation
#[derive(Debug, Clone, PartialEq)]
struct Prepared {
    message_type: MessageType,
    content: String,
    client_message_id: Option<String>,
}

pub struct SendPipeline {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn Directory>,
    adapter: ProviderAdapter,
}

impl SendPipeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        let adapter = ProviderAdapter::new(directory.clone(), store.clone(), transport);
        Self {
            store,
            directory,
            adapter,
        }
    }

    pub async fn send(&self, request: SendMessageRequest) -> AppResult<SendOutcome> {
        let prepared = prepare(&request)?;

        let conversation = self
            .directory
            .conversation(request.conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;
        let contact = self
            .directory
            .contact(conversation.contact_id)
            .await?
            .ok_or(AppError::ContactNotFound)?;
        let connection_id = conversation.connection_id.ok_or(AppError::ConnectionNotFound)?;
        let connection = self
            .directory
            .connection(connection_id)
            .await?
            .ok_or(AppError::ConnectionNotFound)?;

        let outcome = |message: Message, duplicate: bool| SendOutcome {
            message,
            duplicate,
            conversation_id: conversation.id,
            phone_number: contact.phone_number.clone(),
        };

        if let Some(key) = prepared.client_message_id.as_deref() {
            if let Some(existing) = self
                .store
                .find_by_client_message_id(conversation.id, key)
                .await?
            {
                info!(
                    conversation_id = %conversation.id,
                    message_id = %existing.id,
                    client_message_id = %key,
                    "Duplicate submission, returning existing message"
                );
                metrics::record_send("duplicate");
                return Ok(outcome(existing, true));
            }
        }

        let draft = build_message(&request, &prepared, conversation.id);
        let placeholder = match self.store.insert(&draft).await {
            Ok(InsertOutcome::Inserted(message)) => message,
            Ok(InsertOutcome::Existing(existing)) => {
                info!(
                    conversation_id = %conversation.id,
                    message_id = %existing.id,
                    "Concurrent submission won the pre-save, returning its row"
                );
                metrics::record_send("duplicate");
                return Ok(outcome(existing, true));
            }
            Err(e) => {
                error!(conversation_id = %conversation.id, error = %e, "Pre-save failed, nothing sent");
                metrics::record_send("failed");
                return Err(e.into());
            }
        };
        info!(
            conversation_id = %conversation.id,
            message_id = %placeholder.id,
            message_type = %placeholder.message_type.as_str(),
            "Pre-saved message"
        );

        let ctx = SendContext {
            message: &placeholder,
            conversation: &conversation,
            contact: &contact,
            connection: &connection,
        };
        match self.adapter.dispatch(ctx).await {
            Ok(dispatched) => {
                metrics::record_send("sent");
                Ok(outcome(dispatched.message, false))
            }
            Err(e) => {
                self.mark_failed(&placeholder, &e).await;
                metrics::record_send("failed");
                Err(e)
            }
        }
    }

    async fn mark_failed(&self, message: &Message, err: &AppError) {
        let mut patch = MessagePatch::status(MessageStatus::Failed);
        patch.metadata.insert(
            meta::ERROR.into(),
            json!({
                "code": err.code(),
                "message": err.to_string(),
                "failed_at": Utc::now(),
            }),
        );

        match self.store.update(message.id, &patch).await {
            Ok(Some(updated)) => warn!(
                message_id = %message.id,
                status = %updated.status,
                error = %err,
                "Send failed, message marked"
            ),
            Ok(None) => warn!(message_id = %message.id, "Failed message row vanished"),
            Err(e) => error!(message_id = %message.id, error = %e, "Could not mark message failed"),
        }
    }
}

fn prepare(request: &SendMessageRequest) -> AppResult<Prepared> {
    let has_file = request
        .file_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    let message_type = request
        .message_type
        .unwrap_or_else(|| infer_message_type(has_file, request.mime_type.as_deref()));

    let mut content = request.content.as_deref().unwrap_or_default().trim().to_string();
    if message_type.is_media() {
        if !has_file {
            return Err(AppError::Validation("file_url is required for media messages".into()));
        }
        if is_placeholder_caption(&content) {
            content.clear();
        }
    } else if content.is_empty() {
        return Err(AppError::Validation("content is required for text messages".into()));
    }

    let client_message_id = request
        .client_message_id
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    if client_message_id
        .as_deref()
        .is_some_and(|k| k.chars().count() > MAX_CLIENT_MESSAGE_ID_LEN)
    {
        return Err(AppError::Validation(format!(
            "clientMessageId must be at most {MAX_CLIENT_MESSAGE_ID_LEN} characters"
        )));
    }

    Ok(Prepared {
        message_type,
        content,
        client_message_id,
    })
}

fn infer_message_type(has_file: bool, mime_type: Option<&str>) -> MessageType {
    if !has_file {
        return MessageType::Text;
    }
    let Some(parsed) = mime_type.and_then(|m| m.trim().parse::<mime::Mime>().ok()) else {
        return MessageType::Document;
    };
    let top = parsed.type_();
    if top == mime::IMAGE {
        MessageType::Image
    } else if top == mime::VIDEO {
        MessageType::Video
    } else if top == mime::AUDIO {
        MessageType::Audio
    } else {
        MessageType::Document
    }
}

/// `[image]`, `[Áudio]` and friends stand in for a missing caption.
pub fn is_placeholder_caption(content: &str) -> bool {
    let Some(inner) = content
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return false;
    };
    let label = inner.trim().to_lowercase();
    PLACEHOLDER_LABELS.contains(&label.as_str())
}

fn build_message(request: &SendMessageRequest, prepared: &Prepared, conversation_id: Uuid) -> Message {
    let sender_type = request.sender_type.unwrap_or(SenderType::Agent);
    let mut message = Message::text(conversation_id, prepared.content.clone(), sender_type);

    message.message_type = prepared.message_type;
    message.sender_id = request.sender_id;
    message.reply_to_message_id = request.reply_to_message_id;
    message.quoted_message = request.quoted_message.clone();
    if prepared.message_type.is_media() {
        message.file_url = request.file_url.clone();
        message.file_name = request.file_name.clone();
        message.mime_type = request.mime_type.clone();
    }
    if let Some(key) = &prepared.client_message_id {
        message.external_id = Some(key.clone());
        message
            .metadata
            .insert(meta::CLIENT_MESSAGE_ID.into(), json!(key));
    }
    message
}
