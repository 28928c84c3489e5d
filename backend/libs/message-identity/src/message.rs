use crate::{MessageStatus, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Well-known `metadata` keys
pub mod meta {
    pub const PROVIDER: &str = "provider";
    pub const PROVIDER_MSG_ID: &str = "provider_msg_id";
    pub const CLIENT_MESSAGE_ID: &str = "client_message_id";
    pub const ERROR: &str = "error";
}

/// WhatsApp gateway behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Evolution,
    Zapi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Evolution => "evolution",
            Provider::Zapi => "zapi",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evolution" => Ok(Provider::Evolution),
            "zapi" | "z-api" => Ok(Provider::Zapi),
            other => Err(UnknownVariant::new("provider", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, MessageType::Text)
    }
}

impl FromStr for MessageType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "video" => Ok(MessageType::Video),
            "audio" => Ok(MessageType::Audio),
            "document" => Ok(MessageType::Document),
            other => Err(UnknownVariant::new("message type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Contact,
    Agent,
    System,
    Ai,
    User,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Contact => "contact",
            SenderType::Agent => "agent",
            SenderType::System => "system",
            SenderType::Ai => "ai",
            SenderType::User => "user",
        }
    }
}

impl FromStr for SenderType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" => Ok(SenderType::Contact),
            "agent" => Ok(SenderType::Agent),
            "system" => Ok(SenderType::System),
            "ai" => Ok(SenderType::Ai),
            "user" => Ok(SenderType::User),
            other => Err(UnknownVariant::new("sender type", other)),
        }
    }
}

/// Conversation message as stored in the Message Store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub conversation_id: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub sender_type: SenderType,
    pub sender_id: Option<Uuid>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub status: MessageStatus,
    /// Evolution key id or Z-API message id, depending on the provider
    pub evolution_key_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub metadata: Map<String, JsonValue>,
    pub reply_to_message_id: Option<Uuid>,
    pub quoted_message: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Plain text message with an empty metadata map.
    pub fn text(conversation_id: Uuid, content: impl Into<String>, sender_type: SenderType) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: None,
            conversation_id,
            content: Some(content.into()),
            message_type: MessageType::Text,
            sender_type,
            sender_id: None,
            file_url: None,
            file_name: None,
            mime_type: None,
            status: MessageStatus::Sending,
            evolution_key_id: None,
            metadata: Map::new(),
            reply_to_message_id: None,
            quoted_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn provider(&self) -> Option<Provider> {
        self.meta_str(meta::PROVIDER).and_then(|p| p.parse().ok())
    }

    pub fn provider_msg_id(&self) -> Option<&str> {
        self.meta_str(meta::PROVIDER_MSG_ID)
    }

    pub fn client_message_id(&self) -> Option<&str> {
        self.meta_str(meta::CLIENT_MESSAGE_ID)
    }
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, JsonValue>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_row_json_with_null_metadata() {
        let value = json!({
            "id": "5f0c4a8e-6d0e-4f7b-8d7e-3c1f1f6a9a11",
            "external_id": null,
            "conversation_id": "0b7c1f8e-1d2a-4c3b-9e8f-7a6b5c4d3e2f",
            "content": "hello",
            "message_type": "text",
            "sender_type": "contact",
            "sender_id": null,
            "file_url": null,
            "file_name": null,
            "mime_type": null,
            "status": "delivered",
            "evolution_key_id": "3EB0ABC",
            "metadata": null,
            "reply_to_message_id": null,
            "quoted_message": null,
            "created_at": "2024-05-01T12:00:00.123456+00:00"
        });

        let message: Message = serde_json::from_value(value).unwrap();
        assert!(message.metadata.is_empty());
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.evolution_key_id.as_deref(), Some("3EB0ABC"));
    }

    #[test]
    fn test_metadata_accessors_ignore_empty_strings() {
        let mut message = Message::text(Uuid::new_v4(), "hi", SenderType::Agent);
        message
            .metadata
            .insert(meta::PROVIDER.into(), json!("zapi"));
        message
            .metadata
            .insert(meta::PROVIDER_MSG_ID.into(), json!(""));

        assert_eq!(message.provider(), Some(Provider::Zapi));
        assert_eq!(message.provider_msg_id(), None);
    }

    #[test]
    fn test_provider_parse_accepts_hyphenated_zapi() {
        assert_eq!("Z-API".parse::<Provider>().unwrap(), Provider::Zapi);
        assert_eq!("evolution".parse::<Provider>().unwrap(), Provider::Evolution);
        assert!("twilio".parse::<Provider>().is_err());
    }
}
