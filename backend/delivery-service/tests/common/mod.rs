//! Shared fixtures: an in-memory workspace with one contact, one connection
//! and one conversation, plus fake relay, storage and transcoder.
#![allow(dead_code)]

use async_trait::async_trait;
use delivery_service::config::Config;
use delivery_service::models::{EvolutionConfig, ProviderConfig, RelayPayload, ZapiConfig};
use delivery_service::realtime::WorkspaceChannels;
use delivery_service::services::{
    AudioTranscoder, MediaError, MediaStorage, RelayError, RelayTransport,
};
use delivery_service::state::{AppState, Integrations};
use delivery_service::store::{ConnectionRecord, ContactRecord, ConversationRecord, MemoryStore};
use message_identity::{Message, MessageStatus, Provider, SenderType};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const RELAY_URL: &str = "https://relay.test/hook";
pub const CONTACT_PHONE: &str = "5511999990000";
pub const EVOLUTION_KEY_ID: &str = "3EB0ABC";

/// Records every payload; answers from a script, then from a default body.
pub struct FakeRelay {
    calls: Mutex<Vec<(String, RelayPayload)>>,
    script: Mutex<VecDeque<Result<JsonValue, RelayError>>>,
    default: Mutex<JsonValue>,
}

impl FakeRelay {
    pub fn replying(body: JsonValue) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(body),
        })
    }

    pub fn set_default(&self, body: JsonValue) {
        *self.default.lock() = body;
    }

    pub fn push_response(&self, response: Result<JsonValue, RelayError>) {
        self.script.lock().push_back(response);
    }

    pub fn payloads(&self) -> Vec<RelayPayload> {
        self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RelayTransport for FakeRelay {
    async fn post(&self, url: &str, payload: &RelayPayload) -> Result<JsonValue, RelayError> {
        self.calls.lock().push((url.to_string(), payload.clone()));
        tokio::task::yield_now().await;

        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self.default.lock().clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub path: String,
    pub size: usize,
    pub content_type: String,
}

#[derive(Default)]
pub struct FakeStorage {
    uploads: Mutex<Vec<StoredObject>>,
    fail: AtomicBool,
}

impl FakeStorage {
    pub fn failing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<StoredObject> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl MediaStorage for FakeStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::Rejected {
                status: 503,
                body: "storage offline".into(),
            });
        }
        self.uploads.lock().push(StoredObject {
            path: path.to_string(),
            size: bytes.len(),
            content_type: content_type.to_string(),
        });
        Ok(format!("https://storage.test/{path}"))
    }
}

/// Returns a fixed Ogg payload, or fails when told to.
#[derive(Default)]
pub struct FakeTranscoder {
    calls: AtomicUsize,
    fail: AtomicBool,
}

pub const OGG_BYTES: &[u8] = b"OggS-fake-opus";

impl FakeTranscoder {
    pub fn failing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioTranscoder for FakeTranscoder {
    async fn to_ogg_opus(&self, _input: Vec<u8>) -> Result<Vec<u8>, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::Transcode("unsupported codec".into()));
        }
        Ok(OGG_BYTES.to_vec())
    }
}

pub fn evolution_config() -> ProviderConfig {
    ProviderConfig::Evolution(EvolutionConfig {
        server_url: "https://evo.test".into(),
        api_key: "evo-key".into(),
    })
}

pub fn zapi_config() -> ProviderConfig {
    ProviderConfig::Zapi(ZapiConfig {
        base_url: "https://api.z-api.io".into(),
        instance_id: "inst-1".into(),
        instance_token: "tok-1".into(),
        client_token: Some("client-1".into()),
    })
}

pub struct Fixture {
    pub store: MemoryStore,
    pub channels: WorkspaceChannels,
    pub relay: Arc<FakeRelay>,
    pub storage: Arc<FakeStorage>,
    pub transcoder: Arc<FakeTranscoder>,
    pub workspace_id: Uuid,
    pub contact: ContactRecord,
    pub connection: ConnectionRecord,
    pub conversation: ConversationRecord,
    pub state: AppState,
}

impl Fixture {
    /// Connection with embedded Evolution credentials; relay answers with a key id.
    pub fn evolution() -> Self {
        Self::build(Some(evolution_config()), json!({"key": {"id": EVOLUTION_KEY_ID}}), true)
    }

    /// Connection with embedded Z-API credentials; relay answers `provider_msg_id`.
    pub fn zapi() -> Self {
        Self::build(Some(zapi_config()), json!({"provider_msg_id": "zp123"}), true)
    }

    /// No credentials anywhere in the workspace.
    pub fn unconfigured() -> Self {
        Self::build(None, json!({"key": {"id": EVOLUTION_KEY_ID}}), true)
    }

    pub fn without_media_storage() -> Self {
        Self::build(Some(evolution_config()), json!({"key": {"id": EVOLUTION_KEY_ID}}), false)
    }

    fn build(provider: Option<ProviderConfig>, relay_body: JsonValue, media_storage: bool) -> Self {
        let channels = WorkspaceChannels::new();
        let store = MemoryStore::new().with_change_feed(channels.clone());
        let workspace_id = Uuid::new_v4();

        let contact = store.add_contact(workspace_id, &format!("+{CONTACT_PHONE}"));
        let connection = ConnectionRecord {
            id: Uuid::new_v4(),
            workspace_id,
            instance_name: "sales-line".into(),
            phone_number: Some("5511888880000".into()),
            provider_type: provider.as_ref().map(ProviderConfig::provider),
            provider_config: provider,
        };
        store.add_connection(connection.clone());
        let conversation = store.add_conversation(workspace_id, contact.id, Some(connection.id));
        store.set_relay_url(workspace_id, RELAY_URL);

        let relay = FakeRelay::replying(relay_body);
        let storage = Arc::new(FakeStorage::default());
        let transcoder = Arc::new(FakeTranscoder::default());

        let integrations = Integrations {
            relay: relay.clone(),
            media_storage: media_storage.then(|| storage.clone() as Arc<dyn MediaStorage>),
            transcoder: transcoder.clone(),
        };
        let state = AppState::new(
            Arc::new(Config::for_database("postgres://localhost/unused")),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            integrations,
            channels.clone(),
        );

        Self {
            store,
            channels,
            relay,
            storage,
            transcoder,
            workspace_id,
            contact,
            connection,
            conversation,
            state,
        }
    }

    /// Store a message in the fixture conversation as-is.
    pub fn seed(&self, configure: impl FnOnce(&mut Message)) -> Message {
        let mut message = Message::text(self.conversation.id, "seeded", SenderType::Agent);
        message.status = MessageStatus::Sent;
        configure(&mut message);
        self.store.seed_message(message.clone());
        message
    }

    pub fn stored(&self, id: Uuid) -> Message {
        self.store.message(id).expect("message should be stored")
    }

    pub fn provider(&self) -> Provider {
        self.connection
            .provider_type
            .unwrap_or(Provider::Evolution)
    }
}
