use super::{
    normalize_phone, ConnectionRecord, ContactRecord, ConversationRecord, Directory, HistoryCursor,
    InsertOutcome, MessagePatch, MessageStore, StoreError, StoreResult,
};
use crate::models::ProviderConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_identity::Message;
use serde_json::{Map, Value as JsonValue};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.external_id, m.content, m.message_type, \
     m.sender_type, m.sender_id, m.file_url, m.file_name, m.mime_type, m.status, \
     m.evolution_key_id, m.metadata, m.reply_to_message_id, m.quoted_message, m.created_at";

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    external_id: Option<String>,
    content: Option<String>,
    message_type: String,
    sender_type: String,
    sender_id: Option<Uuid>,
    file_url: Option<String>,
    file_name: Option<String>,
    mime_type: Option<String>,
    status: String,
    evolution_key_id: Option<String>,
    metadata: Option<JsonValue>,
    reply_to_message_id: Option<Uuid>,
    quoted_message: Option<JsonValue>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let decode = |e: message_identity::UnknownVariant| StoreError::Decode(e.to_string());
        let metadata = match row.metadata {
            Some(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };

        Ok(Message {
            id: row.id,
            external_id: row.external_id,
            conversation_id: row.conversation_id,
            content: row.content,
            message_type: row.message_type.parse().map_err(decode)?,
            sender_type: row.sender_type.parse().map_err(decode)?,
            sender_id: row.sender_id,
            file_url: row.file_url,
            file_name: row.file_name,
            mime_type: row.mime_type,
            status: row.status.parse().map_err(decode)?,
            evolution_key_id: row.evolution_key_id,
            metadata,
            reply_to_message_id: row.reply_to_message_id,
            quoted_message: row.quoted_message,
            created_at: row.created_at,
        })
    }
}

fn into_message(row: Option<MessageRow>) -> StoreResult<Option<Message>> {
    row.map(Message::try_from).transpose()
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    workspace_id: Uuid,
    contact_id: Uuid,
    connection_id: Option<Uuid>,
}

impl From<ConversationRow> for ConversationRecord {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            contact_id: row.contact_id,
            connection_id: row.connection_id,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConnectionRow {
    id: Uuid,
    workspace_id: Uuid,
    instance_name: String,
    phone_number: Option<String>,
    provider_type: Option<String>,
    provider_config: Option<JsonValue>,
}

#[derive(Debug, FromRow)]
struct ProviderConfigRow {
    provider_type: String,
    config: JsonValue,
}

/// Postgres-backed Message Store and directory
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert(&self, message: &Message) -> StoreResult<InsertOutcome> {
        let sql = format!(
            "INSERT INTO messages AS m (id, conversation_id, external_id, content, message_type, \
                 sender_type, sender_id, file_url, file_name, mime_type, status, evolution_key_id, \
                 metadata, reply_to_message_id, quoted_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT DO NOTHING \
             RETURNING {MESSAGE_COLUMNS}"
        );

        let inserted = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message.id)
            .bind(message.conversation_id)
            .bind(&message.external_id)
            .bind(&message.content)
            .bind(message.message_type.as_str())
            .bind(message.sender_type.as_str())
            .bind(message.sender_id)
            .bind(&message.file_url)
            .bind(&message.file_name)
            .bind(&message.mime_type)
            .bind(message.status.as_str())
            .bind(&message.evolution_key_id)
            .bind(JsonValue::Object(message.metadata.clone()))
            .bind(message.reply_to_message_id)
            .bind(&message.quoted_message)
            .bind(message.created_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row.try_into()?));
        }

        debug!(message_id = %message.id, "Insert collided with an existing row");
        if let Some(key) = message.client_message_id() {
            if let Some(existing) = self
                .find_by_client_message_id(message.conversation_id, key)
                .await?
            {
                return Ok(InsertOutcome::Existing(existing));
            }
        }
        if let Some(key_id) = message.evolution_key_id.as_deref() {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m \
                 WHERE m.conversation_id = $1 AND m.evolution_key_id = $2 LIMIT 1"
            );
            let row = sqlx::query_as::<_, MessageRow>(&sql)
                .bind(message.conversation_id)
                .bind(key_id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(existing) = into_message(row)? {
                return Ok(InsertOutcome::Existing(existing));
            }
        }
        if let Some(existing) = self.find_by_id(message.id).await? {
            return Ok(InsertOutcome::Existing(existing));
        }
        Err(StoreError::LostConflict)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        into_message(row)
    }

    async fn find_by_client_message_id(
        &self,
        conversation_id: Uuid,
        client_message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.conversation_id = $1 \
               AND (m.external_id = $2 OR m.metadata ->> 'client_message_id' = $2) \
             ORDER BY m.created_at ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(conversation_id)
            .bind(client_message_id)
            .fetch_optional(&self.pool)
            .await?;
        into_message(row)
    }

    async fn find_by_provider_id(
        &self,
        connection_id: Uuid,
        provider_id: &str,
    ) -> StoreResult<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             JOIN conversations c ON c.id = m.conversation_id \
             WHERE c.connection_id = $1 \
               AND (m.evolution_key_id = $2 \
                    OR m.external_id = $2 \
                    OR m.metadata ->> 'provider_msg_id' = $2) \
             ORDER BY m.created_at ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(connection_id)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        into_message(row)
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Message>> {
        if let Ok(id) = Uuid::parse_str(reference) {
            if let Some(message) = self.find_by_id(id).await? {
                return Ok(Some(message));
            }
        }

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.external_id = $1 \
                OR m.evolution_key_id = $1 \
                OR m.metadata ->> 'provider_msg_id' = $1 \
                OR m.metadata ->> 'client_message_id' = $1 \
             ORDER BY m.created_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        into_message(row)
    }

    async fn update(&self, id: Uuid, patch: &MessagePatch) -> StoreResult<Option<Message>> {
        // status moves only forward along message_status_rank; failed only from sending/sent
        let sql = format!(
            "UPDATE messages AS m SET \
                 status = CASE \
                     WHEN $2::text IS NULL OR m.status IN ('read', 'failed') THEN m.status \
                     WHEN $2 = 'failed' THEN \
                         CASE WHEN m.status IN ('sending', 'sent') THEN 'failed' ELSE m.status END \
                     WHEN message_status_rank($2) > message_status_rank(m.status) THEN $2 \
                     ELSE m.status \
                 END, \
                 external_id = COALESCE($3, m.external_id), \
                 evolution_key_id = COALESCE($4, m.evolution_key_id), \
                 metadata = COALESCE(m.metadata, '{{}}'::jsonb) || $5::jsonb, \
                 content = COALESCE($6, m.content), \
                 message_type = COALESCE($7, m.message_type), \
                 file_url = COALESCE($8, m.file_url), \
                 file_name = COALESCE($9, m.file_name), \
                 mime_type = COALESCE($10, m.mime_type), \
                 updated_at = NOW() \
             WHERE m.id = $1 \
             RETURNING {MESSAGE_COLUMNS}"
        );

        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(&patch.external_id)
            .bind(&patch.evolution_key_id)
            .bind(JsonValue::Object(patch.metadata.clone()))
            .bind(&patch.content)
            .bind(patch.message_type.map(|t| t.as_str()))
            .bind(&patch.file_url)
            .bind(&patch.file_name)
            .bind(&patch.mime_type)
            .fetch_optional(&self.pool)
            .await?;
        into_message(row)
    }

    async fn history(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<HistoryCursor>,
    ) -> StoreResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.conversation_id = $1 \
               AND ($2::timestamptz IS NULL OR (m.created_at, m.id) < ($2::timestamptz, $3::uuid)) \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(conversation_id)
            .bind(before.map(|(created_at, _)| created_at))
            .bind(before.map(|(_, id)| id))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Message::try_from).collect()
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn conversation(&self, id: Uuid) -> StoreResult<Option<ConversationRecord>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, workspace_id, contact_id, connection_id FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn contact(&self, id: Uuid) -> StoreResult<Option<ContactRecord>> {
        let row: Option<(Uuid, Uuid, String)> =
            sqlx::query_as("SELECT id, workspace_id, phone_number FROM contacts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, workspace_id, phone_number)| ContactRecord {
            id,
            workspace_id,
            phone_number,
        }))
    }

    async fn connection(&self, id: Uuid) -> StoreResult<Option<ConnectionRecord>> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT id, workspace_id, instance_name, phone_number, provider_type, provider_config \
             FROM whatsapp_connections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let provider_type = row.provider_type.as_deref().and_then(|p| p.parse().ok());
            let provider_config = match (row.provider_type.as_deref(), row.provider_config) {
                (Some(kind), Some(config)) => ProviderConfig::from_stored(kind, config),
                _ => None,
            };
            ConnectionRecord {
                id: row.id,
                workspace_id: row.workspace_id,
                instance_name: row.instance_name,
                phone_number: row.phone_number,
                provider_type,
                provider_config,
            }
        }))
    }

    async fn conversation_for_contact(
        &self,
        connection_id: Uuid,
        phone_number: &str,
    ) -> StoreResult<Option<ConversationRecord>> {
        let digits = normalize_phone(phone_number);
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT c.id, c.workspace_id, c.contact_id, c.connection_id \
             FROM conversations c \
             JOIN contacts ct ON ct.id = c.contact_id \
             WHERE c.connection_id = $1 \
               AND regexp_replace(ct.phone_number, '\\D', '', 'g') = $2 \
             ORDER BY c.created_at DESC LIMIT 1",
        )
        .bind(connection_id)
        .bind(digits)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn master_provider_config(&self, workspace_id: Uuid) -> StoreResult<Option<ProviderConfig>> {
        let row = sqlx::query_as::<_, ProviderConfigRow>(
            "SELECT provider_type, config FROM workspace_provider_master_config \
             WHERE workspace_id = $1 AND is_active",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| ProviderConfig::from_stored(&r.provider_type, r.config)))
    }

    async fn latest_provider_settings(
        &self,
        workspace_id: Uuid,
    ) -> StoreResult<Option<ProviderConfig>> {
        let rows = sqlx::query_as::<_, ProviderConfigRow>(
            "SELECT provider_type, config FROM workspace_provider_settings \
             WHERE workspace_id = $1 AND is_active \
             ORDER BY updated_at DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .find_map(|r| ProviderConfig::from_stored(&r.provider_type, r.config)))
    }

    async fn relay_url(&self, workspace_id: Uuid) -> StoreResult<Option<String>> {
        let url: Option<String> = sqlx::query_scalar(
            "SELECT relay_url FROM workspace_relay_settings WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(url.filter(|u| !u.trim().is_empty()))
    }
}
