//! # Provider Adapter
//!
//! Resolves the active WhatsApp provider for a connection, builds the relay
//! envelope for it and POSTs it to the workspace relay. The relay performs
//! the actual provider call; its response is searched for the provider's
//! message id, which is written back onto the Message Store row.
//!
//! Provider resolution order:
//!
//! 1. config embedded on the connection
//! 2. workspace master config
//! 3. most recently updated workspace provider settings

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{ProviderConfig, RelayData, RelayKey, RelayPayload};
use crate::store::{
    normalize_phone, ConnectionRecord, ContactRecord, ConversationRecord, Directory, MessagePatch,
    MessageStore,
};
use async_trait::async_trait;
use chrono::Utc;
use message_identity::{meta, Message, MessageStatus, MessageType, Provider};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const SEND_EVENT: &str = "send.message";

const EVOLUTION_ID_PATHS: &[&str] = &[
    "/key/id",
    "/data/key/id",
    "/message/key/id",
    "/data/message/key/id",
    "/response/key/id",
    "/messageId",
];

const ZAPI_ID_PATHS: &[&str] = &[
    "/provider_msg_id",
    "/messageId",
    "/id",
    "/zaapId",
    "/data/messageId",
    "/data/id",
];

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("relay reported an error: {0}")]
    Application(String),
}

/// Transport to the workspace relay. Returns the decoded 2xx body.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &RelayPayload) -> Result<JsonValue, RelayError>;
}

pub struct HttpRelayTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRelayTransport {
    pub fn new(timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn post(&self, url: &str, payload: &RelayPayload) -> Result<JsonValue, RelayError> {
        let request = async {
            let response = self.client.post(url).json(payload).send().await?;
            let status = response.status();
            let text = response.text().await?;

            if !status.is_success() {
                return Err(RelayError::Status {
                    status: status.as_u16(),
                    body: text.chars().take(MAX_ERROR_BODY).collect(),
                });
            }
            Ok(parse_body(&text))
        };

        timeout(self.timeout, request)
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))?
    }
}

fn parse_body(text: &str) -> JsonValue {
    if text.trim().is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.to_string()))
}

/// Everything the adapter needs to send one pre-saved row
#[derive(Debug, Clone, Copy)]
pub struct SendContext<'a> {
    pub message: &'a Message,
    pub conversation: &'a ConversationRecord,
    pub contact: &'a ContactRecord,
    pub connection: &'a ConnectionRecord,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub provider: Provider,
    pub provider_message_id: Option<String>,
    /// Row after the correlation write-back
    pub message: Message,
}

pub struct ProviderAdapter {
    directory: Arc<dyn Directory>,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn RelayTransport>,
}

impl ProviderAdapter {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        Self {
            directory,
            store,
            transport,
        }
    }

    pub async fn resolve_provider(&self, connection: &ConnectionRecord) -> AppResult<ProviderConfig> {
        if let Some(config) = connection.provider_config.as_ref().filter(|c| c.is_complete()) {
            return Ok(config.clone());
        }

        let workspace_id = connection.workspace_id;
        if let Some(config) = self.directory.master_provider_config(workspace_id).await? {
            debug!(connection_id = %connection.id, "Using workspace master provider config");
            return Ok(config);
        }
        if let Some(config) = self.directory.latest_provider_settings(workspace_id).await? {
            debug!(connection_id = %connection.id, "Using workspace provider settings");
            return Ok(config);
        }

        Err(AppError::ProviderNotConfigured(format!(
            "no provider credentials for connection {}",
            connection.id
        )))
    }

    pub async fn relay_url(&self, workspace_id: uuid::Uuid) -> AppResult<String> {
        self.directory
            .relay_url(workspace_id)
            .await?
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::ProviderNotConfigured(format!(
                    "relay url is not configured for workspace {workspace_id}"
                ))
            })
    }

    /// Relay, extract the provider id, write it back. Any relay problem is
    /// `RelayFailed`; a failed write-back is logged and the locally patched
    /// row is returned.
    pub async fn dispatch(&self, ctx: SendContext<'_>) -> AppResult<DispatchOutcome> {
        let config = self.resolve_provider(ctx.connection).await?;
        let provider = config.provider();
        let destination = self.relay_url(ctx.conversation.workspace_id).await?;
        let payload = build_payload(&config, &ctx, &destination);

        let started = Instant::now();
        let result = self.transport.post(&destination, &payload).await;
        metrics::observe_relay(provider.as_str(), started.elapsed());

        let body = match result {
            Ok(body) => unwrap_array(body),
            Err(e) => {
                warn!(message_id = %ctx.message.id, provider = %provider, error = %e, "Relay dispatch failed");
                return Err(AppError::RelayFailed(e.to_string()));
            }
        };

        if let Some(reason) = detect_application_error(&body) {
            warn!(message_id = %ctx.message.id, provider = %provider, reason = %reason, "Relay returned an application error");
            return Err(AppError::RelayFailed(RelayError::Application(reason).to_string()));
        }

        let provider_message_id = extract_provider_message_id(provider, &body);
        match &provider_message_id {
            Some(id) => info!(
                message_id = %ctx.message.id,
                provider = %provider,
                provider_message_id = %id,
                "Relay accepted message"
            ),
            None => warn!(
                message_id = %ctx.message.id,
                provider = %provider,
                "Relay response carried no provider message id; correlation is best-effort"
            ),
        }

        let message = self
            .write_back(ctx.message, provider, provider_message_id.as_deref())
            .await;

        Ok(DispatchOutcome {
            provider,
            provider_message_id,
            message,
        })
    }

    async fn write_back(&self, message: &Message, provider: Provider, provider_id: Option<&str>) -> Message {
        let patch = correlation_patch(provider, provider_id);
        let mut local = message.clone();
        patch.apply(&mut local);

        match self.store.update(message.id, &patch).await {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                warn!(message_id = %message.id, "Row disappeared before correlation write-back");
                local
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Correlation write-back failed");
                local
            }
        }
    }
}

/// Fields written after a successful relay.
///
/// Evolution ids go to `external_id` and `evolution_key_id`. Z-API ids go to
/// `evolution_key_id` and `metadata.provider_msg_id`, leaving `external_id`
/// on the caller's key.
pub fn correlation_patch(provider: Provider, provider_id: Option<&str>) -> MessagePatch {
    let mut patch = MessagePatch::status(MessageStatus::Sent);
    patch
        .metadata
        .insert(meta::PROVIDER.into(), json!(provider.as_str()));

    if let Some(id) = provider_id {
        patch.evolution_key_id = Some(id.to_string());
        match provider {
            Provider::Evolution => patch.external_id = Some(id.to_string()),
            Provider::Zapi => {
                patch.metadata.insert(meta::PROVIDER_MSG_ID.into(), json!(id));
            }
        }
    }
    patch
}

pub fn build_payload(config: &ProviderConfig, ctx: &SendContext<'_>, destination: &str) -> RelayPayload {
    let message = ctx.message;
    let phone_number = normalize_phone(&ctx.contact.phone_number);
    let key_id = message
        .external_id
        .clone()
        .unwrap_or_else(|| message.id.to_string());

    RelayPayload {
        event: SEND_EVENT.to_string(),
        instance: ctx.connection.instance_name.clone(),
        workspace_id: ctx.conversation.workspace_id,
        connection_id: ctx.connection.id,
        conversation_id: ctx.conversation.id,
        message_id: message.id,
        phone_number: phone_number.clone(),
        external_id: message.external_id.clone(),
        data: RelayData {
            key: RelayKey {
                remote_jid: format!("{phone_number}@s.whatsapp.net"),
                from_me: true,
                id: key_id,
            },
            message: message_body(message),
            message_type: wire_message_type(message.message_type),
            message_timestamp: message.created_at.timestamp(),
        },
        destination: destination.to_string(),
        date_time: Utc::now(),
        sender: ctx
            .connection
            .phone_number
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ctx.connection.instance_name.clone()),
        reply_to_message_id: message.reply_to_message_id,
        quoted_message: message.quoted_message.clone(),
        credentials: config.credentials(),
    }
}

fn wire_message_type(message_type: MessageType) -> String {
    match message_type {
        MessageType::Text => "conversation".to_string(),
        media => format!("{}Message", media.as_str()),
    }
}

fn message_body(message: &Message) -> JsonValue {
    let content = message.content.clone().unwrap_or_default();
    if !message.message_type.is_media() {
        return json!({ "conversation": content });
    }

    let media = json!({
        "url": message.file_url,
        "caption": content,
        "fileName": message.file_name,
        "mimetype": message.mime_type,
    });
    let mut body = serde_json::Map::new();
    body.insert(wire_message_type(message.message_type), media);
    JsonValue::Object(body)
}

/// Some relays answer with a one-element array.
fn unwrap_array(body: JsonValue) -> JsonValue {
    match body {
        JsonValue::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    }
}

/// Reason when a 2xx body still encodes a failure.
pub fn detect_application_error(body: &JsonValue) -> Option<String> {
    let object = body.as_object()?;
    let described = |fallback: &str| {
        object
            .get("message")
            .or_else(|| object.get("error"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };

    if object.get("success") == Some(&JsonValue::Bool(false)) {
        return Some(described("success=false"));
    }
    match object.get("error") {
        None | Some(JsonValue::Null) | Some(JsonValue::Bool(false)) => {}
        Some(JsonValue::String(reason)) => return Some(reason.clone()),
        Some(other) => return Some(other.to_string()),
    }
    if object.get("status").and_then(JsonValue::as_str) == Some("error") {
        return Some(described("status=error"));
    }
    None
}

pub fn extract_provider_message_id(provider: Provider, body: &JsonValue) -> Option<String> {
    let paths = match provider {
        Provider::Evolution => EVOLUTION_ID_PATHS,
        Provider::Zapi => ZAPI_ID_PATHS,
    };

    paths.iter().find_map(|path| match body.pointer(path)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
