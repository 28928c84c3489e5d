mod provider;

pub use provider::{
    EvolutionConfig, ProviderConfig, ProviderCredentials, RelayData, RelayKey, RelayPayload,
    ZapiConfig, ZAPI_DEFAULT_BASE_URL,
};

use chrono::{DateTime, Utc};
use message_identity::{Message, MessageType, SenderType};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Outbound send request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub sender_id: Option<Uuid>,
    #[serde(default)]
    pub sender_type: Option<SenderType>,
    #[serde(default, rename = "clientMessageId", alias = "client_message_id")]
    pub client_message_id: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<Uuid>,
    #[serde(default)]
    pub quoted_message: Option<JsonValue>,
}

impl SendMessageRequest {
    pub fn text(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: Some(content.into()),
            message_type: None,
            file_url: None,
            file_name: None,
            mime_type: None,
            sender_id: None,
            sender_type: None,
            client_message_id: None,
            reply_to_message_id: None,
            quoted_message: None,
        }
    }

    pub fn with_client_message_id(mut self, key: impl Into<String>) -> Self {
        self.client_message_id = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: Uuid,
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evolution_key_id: Option<String>,
    /// Row status, or `duplicate` when the idempotency key was already used
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: SentMessage,
    pub conversation_id: Uuid,
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub before: Option<String>,
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<Message>,
    #[serde(rename = "nextBefore", skip_serializing_if = "Option::is_none")]
    pub next_before: Option<String>,
}

/// Late media for an already stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCallbackRequest {
    /// External id, provider id or internal id
    #[serde(rename = "messageId", alias = "message_id")]
    pub message_id: String,
    #[serde(default, rename = "fileUrl", alias = "file_url")]
    pub file_url: Option<String>,
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(default, rename = "fileName", alias = "file_name")]
    pub file_name: Option<String>,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default, rename = "messageType", alias = "message_type")]
    pub message_type: Option<MessageType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCallbackResponse {
    pub success: bool,
    pub message_id: Uuid,
    pub file_url: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub processed: usize,
}
