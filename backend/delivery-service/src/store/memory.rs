use super::{
    normalize_phone, ConnectionRecord, ContactRecord, ConversationRecord, Directory, HistoryCursor,
    InsertOutcome, MessagePatch, MessageStore, StoreResult,
};
use crate::models::ProviderConfig;
use crate::realtime::WorkspaceChannels;
use async_trait::async_trait;
use message_identity::{LiveEvent, Message};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct MemoryData {
    messages: Vec<Message>,
    conversations: HashMap<Uuid, ConversationRecord>,
    contacts: HashMap<Uuid, ContactRecord>,
    connections: HashMap<Uuid, ConnectionRecord>,
    master_configs: HashMap<Uuid, ProviderConfig>,
    /// Oldest first; the last entry is the most recently updated.
    provider_settings: HashMap<Uuid, Vec<ProviderConfig>>,
    relay_urls: HashMap<Uuid, String>,
}

impl MemoryData {
    fn workspace_of(&self, conversation_id: Uuid) -> Option<Uuid> {
        self.conversations.get(&conversation_id).map(|c| c.workspace_id)
    }

    fn conflicting(&self, message: &Message) -> Option<Message> {
        self.messages
            .iter()
            .find(|m| {
                m.conversation_id == message.conversation_id
                    && (m.id == message.id
                        || matches!(
                            (m.client_message_id(), message.client_message_id()),
                            (Some(a), Some(b)) if a == b
                        )
                        || matches!(
                            (m.evolution_key_id.as_deref(), message.evolution_key_id.as_deref()),
                            (Some(a), Some(b)) if a == b
                        ))
            })
            .cloned()
    }
}

/// In-process Message Store and directory
///
/// Same matching and status rules as [`super::PgStore`]. When built with a
/// change feed it publishes insert/update events the way the database
/// trigger does.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
    feed: Option<WorkspaceChannels>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change_feed(mut self, channels: WorkspaceChannels) -> Self {
        self.feed = Some(channels);
        self
    }

    pub fn add_contact(&self, workspace_id: Uuid, phone_number: &str) -> ContactRecord {
        let contact = ContactRecord {
            id: Uuid::new_v4(),
            workspace_id,
            phone_number: phone_number.to_string(),
        };
        self.data.lock().contacts.insert(contact.id, contact.clone());
        contact
    }

    pub fn add_connection(&self, connection: ConnectionRecord) {
        self.data.lock().connections.insert(connection.id, connection);
    }

    pub fn add_conversation(
        &self,
        workspace_id: Uuid,
        contact_id: Uuid,
        connection_id: Option<Uuid>,
    ) -> ConversationRecord {
        let conversation = ConversationRecord {
            id: Uuid::new_v4(),
            workspace_id,
            contact_id,
            connection_id,
        };
        self.data
            .lock()
            .conversations
            .insert(conversation.id, conversation.clone());
        conversation
    }

    pub fn set_master_config(&self, workspace_id: Uuid, config: ProviderConfig) {
        self.data.lock().master_configs.insert(workspace_id, config);
    }

    pub fn push_provider_settings(&self, workspace_id: Uuid, config: ProviderConfig) {
        self.data
            .lock()
            .provider_settings
            .entry(workspace_id)
            .or_default()
            .push(config);
    }

    pub fn set_relay_url(&self, workspace_id: Uuid, url: &str) {
        self.data.lock().relay_urls.insert(workspace_id, url.to_string());
    }

    /// Store a row as-is, bypassing conflict checks.
    pub fn seed_message(&self, message: Message) {
        self.data.lock().messages.push(message);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.data.lock().messages.clone()
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.data.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    async fn publish(&self, message: &Message, insert: bool) {
        let Some(feed) = &self.feed else {
            return;
        };
        let Some(workspace_id) = self.data.lock().workspace_of(message.conversation_id) else {
            return;
        };
        let message = message.clone();
        let event = if insert {
            LiveEvent::Insert {
                workspace_id,
                message,
            }
        } else {
            LiveEvent::Update {
                workspace_id,
                message,
            }
        };
        feed.broadcast(event).await;
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &Message) -> StoreResult<InsertOutcome> {
        let outcome = {
            let mut data = self.data.lock();
            match data.conflicting(message) {
                Some(existing) => InsertOutcome::Existing(existing),
                None => {
                    data.messages.push(message.clone());
                    InsertOutcome::Inserted(message.clone())
                }
            }
        };

        if let InsertOutcome::Inserted(inserted) = &outcome {
            self.publish(inserted, true).await;
        }
        Ok(outcome)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(self.message(id))
    }

    async fn find_by_client_message_id(
        &self,
        conversation_id: Uuid,
        client_message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let data = self.data.lock();
        Ok(data
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| {
                m.external_id.as_deref() == Some(client_message_id)
                    || m.client_message_id() == Some(client_message_id)
            })
            .min_by_key(|m| m.created_at)
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        connection_id: Uuid,
        provider_id: &str,
    ) -> StoreResult<Option<Message>> {
        let data = self.data.lock();
        Ok(data
            .messages
            .iter()
            .filter(|m| {
                data.conversations
                    .get(&m.conversation_id)
                    .is_some_and(|c| c.connection_id == Some(connection_id))
            })
            .filter(|m| {
                m.evolution_key_id.as_deref() == Some(provider_id)
                    || m.external_id.as_deref() == Some(provider_id)
                    || m.provider_msg_id() == Some(provider_id)
            })
            .min_by_key(|m| m.created_at)
            .cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Message>> {
        if let Ok(id) = Uuid::parse_str(reference) {
            if let Some(message) = self.message(id) {
                return Ok(Some(message));
            }
        }

        let data = self.data.lock();
        Ok(data
            .messages
            .iter()
            .filter(|m| {
                m.external_id.as_deref() == Some(reference)
                    || m.evolution_key_id.as_deref() == Some(reference)
                    || m.provider_msg_id() == Some(reference)
                    || m.client_message_id() == Some(reference)
            })
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn update(&self, id: Uuid, patch: &MessagePatch) -> StoreResult<Option<Message>> {
        let updated = {
            let mut data = self.data.lock();
            data.messages.iter_mut().find(|m| m.id == id).map(|m| {
                patch.apply(m);
                m.clone()
            })
        };

        if let Some(message) = &updated {
            self.publish(message, false).await;
        }
        Ok(updated)
    }

    async fn history(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<HistoryCursor>,
    ) -> StoreResult<Vec<Message>> {
        let data = self.data.lock();
        let mut rows: Vec<Message> = data
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.map_or(true, |cursor| (m.created_at, m.id) < cursor))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn conversation(&self, id: Uuid) -> StoreResult<Option<ConversationRecord>> {
        Ok(self.data.lock().conversations.get(&id).cloned())
    }

    async fn contact(&self, id: Uuid) -> StoreResult<Option<ContactRecord>> {
        Ok(self.data.lock().contacts.get(&id).cloned())
    }

    async fn connection(&self, id: Uuid) -> StoreResult<Option<ConnectionRecord>> {
        Ok(self.data.lock().connections.get(&id).cloned())
    }

    async fn conversation_for_contact(
        &self,
        connection_id: Uuid,
        phone_number: &str,
    ) -> StoreResult<Option<ConversationRecord>> {
        let digits = normalize_phone(phone_number);
        let data = self.data.lock();
        Ok(data
            .conversations
            .values()
            .filter(|c| c.connection_id == Some(connection_id))
            .find(|c| {
                data.contacts
                    .get(&c.contact_id)
                    .is_some_and(|contact| normalize_phone(&contact.phone_number) == digits)
            })
            .cloned())
    }

    async fn master_provider_config(&self, workspace_id: Uuid) -> StoreResult<Option<ProviderConfig>> {
        Ok(self.data.lock().master_configs.get(&workspace_id).cloned())
    }

    async fn latest_provider_settings(
        &self,
        workspace_id: Uuid,
    ) -> StoreResult<Option<ProviderConfig>> {
        Ok(self
            .data
            .lock()
            .provider_settings
            .get(&workspace_id)
            .and_then(|configs| configs.iter().rev().find(|c| c.is_complete()).cloned()))
    }

    async fn relay_url(&self, workspace_id: Uuid) -> StoreResult<Option<String>> {
        Ok(self.data.lock().relay_urls.get(&workspace_id).cloned())
    }
}
