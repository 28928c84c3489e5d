//! Message Store and conversation directory
//!
//! [`MessageStore`] is the single source of truth for message rows; every
//! reconciliation path ends in one of its narrow, field-level writes.
//! [`Directory`] is the read-only view of the CRM tables the pipeline needs
//! (conversations, contacts, connections, provider and relay settings).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::ProviderConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_identity::{Message, MessageStatus, MessageType, Provider};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("insert conflicted but no existing row was found")]
    LostConflict,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub contact_id: Uuid,
    pub connection_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub instance_name: String,
    pub phone_number: Option<String>,
    pub provider_type: Option<Provider>,
    /// Provider config embedded on the connection, if complete.
    pub provider_config: Option<ProviderConfig>,
}

/// Result of an insert that may collide with an existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Message),
    /// Same idempotency key or provider id already stored in the conversation.
    Existing(Message),
}

impl InsertOutcome {
    pub fn into_message(self) -> Message {
        match self {
            InsertOutcome::Inserted(m) | InsertOutcome::Existing(m) => m,
        }
    }
}

/// Field-level update. `None` leaves a column untouched.
///
/// `status` only applies when it moves the row forward; every other field
/// applies regardless of status, so late media still lands on a read row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub status: Option<MessageStatus>,
    pub external_id: Option<String>,
    pub evolution_key_id: Option<String>,
    /// Shallow-merged into the stored metadata.
    pub metadata: Map<String, JsonValue>,
    pub content: Option<String>,
    pub message_type: Option<MessageType>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl MessagePatch {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply to an in-memory row with the same rules the SQL update uses.
    pub fn apply(&self, message: &mut Message) {
        if let Some(status) = self.status {
            message.status = message.status.advance(status);
        }
        if let Some(v) = &self.external_id {
            message.external_id = Some(v.clone());
        }
        if let Some(v) = &self.evolution_key_id {
            message.evolution_key_id = Some(v.clone());
        }
        for (key, value) in &self.metadata {
            message.metadata.insert(key.clone(), value.clone());
        }
        if let Some(v) = &self.content {
            message.content = Some(v.clone());
        }
        if let Some(v) = self.message_type {
            message.message_type = v;
        }
        if let Some(v) = &self.file_url {
            message.file_url = Some(v.clone());
        }
        if let Some(v) = &self.file_name {
            message.file_name = Some(v.clone());
        }
        if let Some(v) = &self.mime_type {
            message.mime_type = Some(v.clone());
        }
    }
}

/// Keyset cursor position: older than `(created_at, id)`.
pub type HistoryCursor = (DateTime<Utc>, Uuid);

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert unless the conversation already holds the same
    /// `metadata.client_message_id` or `evolution_key_id`.
    async fn insert(&self, message: &Message) -> StoreResult<InsertOutcome>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Message>>;

    /// Match `external_id` or `metadata.client_message_id` within a conversation.
    async fn find_by_client_message_id(
        &self,
        conversation_id: Uuid,
        client_message_id: &str,
    ) -> StoreResult<Option<Message>>;

    /// Match a provider id against `evolution_key_id`, `external_id` and
    /// `metadata.provider_msg_id` on conversations served by `connection_id`.
    async fn find_by_provider_id(
        &self,
        connection_id: Uuid,
        provider_id: &str,
    ) -> StoreResult<Option<Message>>;

    /// Internal id when `reference` is a UUID, otherwise any external or
    /// provider id. Newest row wins.
    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Message>>;

    /// Returns the updated row, or `None` if `id` does not exist.
    async fn update(&self, id: Uuid, patch: &MessagePatch) -> StoreResult<Option<Message>>;

    /// Newest first, strictly older than `before` when given.
    async fn history(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<HistoryCursor>,
    ) -> StoreResult<Vec<Message>>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn conversation(&self, id: Uuid) -> StoreResult<Option<ConversationRecord>>;

    async fn contact(&self, id: Uuid) -> StoreResult<Option<ContactRecord>>;

    async fn connection(&self, id: Uuid) -> StoreResult<Option<ConnectionRecord>>;

    /// Conversation on `connection_id` whose contact has `phone_number`.
    async fn conversation_for_contact(
        &self,
        connection_id: Uuid,
        phone_number: &str,
    ) -> StoreResult<Option<ConversationRecord>>;

    async fn master_provider_config(&self, workspace_id: Uuid) -> StoreResult<Option<ProviderConfig>>;

    /// Most recently updated active provider settings row.
    async fn latest_provider_settings(
        &self,
        workspace_id: Uuid,
    ) -> StoreResult<Option<ProviderConfig>>;

    async fn relay_url(&self, workspace_id: Uuid) -> StoreResult<Option<String>>;
}

/// Digits only; strips WhatsApp JID suffixes and formatting.
pub fn normalize_phone(raw: &str) -> String {
    let number = raw.split('@').next().unwrap_or(raw);
    let number = number.split(':').next().unwrap_or(number);
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}
