//! Provider webhook normalisation
//!
//! Evolution and Z-API describe the same two things (a new message, a
//! status change) in different shapes. Both are reduced to
//! [`InboundEvent`] here; anything else (presence, groups, connection
//! state) is skipped.

use chrono::{DateTime, TimeZone, Utc};
use message_identity::{MessageStatus, MessageType, Provider};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub provider_message_id: String,
    /// Remote party, as sent by the provider
    pub phone_number: String,
    /// Sent from the connected phone (or echoed back from our own send)
    pub from_me: bool,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub provider_message_id: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(InboundMessage),
    Status(StatusUpdate),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Message(_) => "message",
            InboundEvent::Status(_) => "status",
        }
    }
}

pub fn normalize(provider: Provider, body: &JsonValue) -> Vec<InboundEvent> {
    let bodies: Vec<&JsonValue> = match body {
        JsonValue::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    bodies
        .into_iter()
        .flat_map(|body| match provider {
            Provider::Evolution => evolution::normalize(body),
            Provider::Zapi => zapi::normalize(body),
        })
        .collect()
}

fn str_at<'a>(value: &'a JsonValue, path: &str) -> Option<&'a str> {
    value
        .pointer(path)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn owned_at(value: &JsonValue, path: &str) -> Option<String> {
    str_at(value, path).map(str::to_string)
}

fn is_group(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

/// Seconds or milliseconds since the epoch, as number or string.
fn parse_timestamp(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    let raw = match value? {
        JsonValue::Number(n) => n.as_i64()?,
        JsonValue::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if raw > 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

mod evolution {
    use super::*;

    const MEDIA_KEYS: &[(&str, MessageType)] = &[
        ("imageMessage", MessageType::Image),
        ("videoMessage", MessageType::Video),
        ("audioMessage", MessageType::Audio),
        ("documentMessage", MessageType::Document),
        ("stickerMessage", MessageType::Image),
    ];

    pub(super) fn normalize(body: &JsonValue) -> Vec<InboundEvent> {
        let event = body
            .get("event")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .replace('_', ".");

        let items: Vec<&JsonValue> = match body.get("data") {
            Some(JsonValue::Array(items)) => items.iter().collect(),
            Some(item) => vec![item],
            None => Vec::new(),
        };

        match event.as_str() {
            "messages.upsert" => items.into_iter().filter_map(message).collect(),
            "messages.update" => items.into_iter().filter_map(status).collect(),
            _ => Vec::new(),
        }
    }

    fn message(data: &JsonValue) -> Option<InboundEvent> {
        let remote_jid = str_at(data, "/key/remoteJid")?;
        if is_group(remote_jid) {
            return None;
        }
        let provider_message_id = owned_at(data, "/key/id")?;
        let from_me = data
            .pointer("/key/fromMe")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);

        let body = data.get("message").unwrap_or(&JsonValue::Null);
        let media = MEDIA_KEYS
            .iter()
            .find_map(|(key, kind)| body.get(*key).map(|m| (m, *kind)));

        let (message_type, content, file_url, file_name, mime_type) = match media {
            Some((media, kind)) => (
                kind,
                owned_at(media, "/caption"),
                owned_at(media, "/url").or_else(|| owned_at(data, "/mediaUrl")),
                owned_at(media, "/fileName"),
                owned_at(media, "/mimetype"),
            ),
            None => (
                MessageType::Text,
                owned_at(body, "/conversation").or_else(|| owned_at(body, "/extendedTextMessage/text")),
                None,
                None,
                None,
            ),
        };

        Some(InboundEvent::Message(InboundMessage {
            provider_message_id,
            phone_number: remote_jid.to_string(),
            from_me,
            content,
            message_type,
            file_url,
            file_name,
            mime_type,
            timestamp: parse_timestamp(data.get("messageTimestamp")),
        }))
    }

    fn status(data: &JsonValue) -> Option<InboundEvent> {
        if str_at(data, "/remoteJid")
            .or_else(|| str_at(data, "/key/remoteJid"))
            .is_some_and(is_group)
        {
            return None;
        }
        let provider_message_id = owned_at(data, "/keyId")
            .or_else(|| owned_at(data, "/key/id"))
            .or_else(|| owned_at(data, "/messageId"))?;
        let raw = data
            .get("status")
            .or_else(|| data.pointer("/update/status"))?;

        let status = match raw {
            JsonValue::String(s) => match s.to_ascii_uppercase().as_str() {
                "SERVER_ACK" => MessageStatus::Sent,
                "DELIVERY_ACK" => MessageStatus::Delivered,
                "READ" | "PLAYED" => MessageStatus::Read,
                "ERROR" => MessageStatus::Failed,
                _ => return None,
            },
            JsonValue::Number(n) => match n.as_i64()? {
                0 => MessageStatus::Failed,
                2 => MessageStatus::Sent,
                3 => MessageStatus::Delivered,
                4 | 5 => MessageStatus::Read,
                _ => return None,
            },
            _ => return None,
        };

        Some(InboundEvent::Status(StatusUpdate {
            provider_message_id,
            status,
        }))
    }
}

mod zapi {
    use super::*;

    const MEDIA_KEYS: &[(&str, &str, MessageType)] = &[
        ("image", "imageUrl", MessageType::Image),
        ("video", "videoUrl", MessageType::Video),
        ("audio", "audioUrl", MessageType::Audio),
        ("document", "documentUrl", MessageType::Document),
        ("sticker", "stickerUrl", MessageType::Image),
    ];

    pub(super) fn normalize(body: &JsonValue) -> Vec<InboundEvent> {
        match body.get("type").and_then(JsonValue::as_str) {
            Some("ReceivedCallback") => received(body).into_iter().collect(),
            Some("MessageStatusCallback") => status(body),
            Some("DeliveryCallback") => owned_at(body, "/messageId")
                .map(|provider_message_id| {
                    InboundEvent::Status(StatusUpdate {
                        provider_message_id,
                        status: MessageStatus::Sent,
                    })
                })
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn is_group_body(body: &JsonValue) -> bool {
        body.get("isGroup").and_then(JsonValue::as_bool).unwrap_or(false)
            || str_at(body, "/phone").is_some_and(|p| is_group(p) || p.ends_with("-group"))
    }

    fn received(body: &JsonValue) -> Option<InboundEvent> {
        if is_group_body(body) {
            return None;
        }
        let provider_message_id = owned_at(body, "/messageId")?;
        let phone_number = owned_at(body, "/phone")?;

        let media = MEDIA_KEYS
            .iter()
            .find_map(|(key, url_key, kind)| body.get(*key).map(|m| (m, *url_key, *kind)));
        let (message_type, content, file_url, file_name, mime_type) = match media {
            Some((media, url_key, kind)) => (
                kind,
                owned_at(media, "/caption"),
                owned_at(media, &format!("/{url_key}")),
                owned_at(media, "/fileName").or_else(|| owned_at(media, "/title")),
                owned_at(media, "/mimeType"),
            ),
            None => (MessageType::Text, owned_at(body, "/text/message"), None, None, None),
        };

        Some(InboundEvent::Message(InboundMessage {
            provider_message_id,
            phone_number,
            from_me: body.get("fromMe").and_then(JsonValue::as_bool).unwrap_or(false),
            content,
            message_type,
            file_url,
            file_name,
            mime_type,
            timestamp: parse_timestamp(body.get("momment")),
        }))
    }

    fn status(body: &JsonValue) -> Vec<InboundEvent> {
        if is_group_body(body) {
            return Vec::new();
        }
        let status = match body
            .get("status")
            .and_then(JsonValue::as_str)
            .map(str::to_ascii_uppercase)
            .as_deref()
        {
            Some("SENT") => MessageStatus::Sent,
            Some("RECEIVED") => MessageStatus::Delivered,
            Some("READ") | Some("READ_BY_ME") | Some("PLAYED") => MessageStatus::Read,
            _ => return Vec::new(),
        };

        body.get("ids")
            .and_then(JsonValue::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(JsonValue::as_str)
                    .filter(|id| !id.trim().is_empty())
                    .map(|id| {
                        InboundEvent::Status(StatusUpdate {
                            provider_message_id: id.trim().to_string(),
                            status,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evolution_upsert_text_and_media() {
        let body = json!({
            "event": "messages.upsert",
            "instance": "sales",
            "data": [
                {
                    "key": {"remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false, "id": "IN1"},
                    "message": {"extendedTextMessage": {"text": "hello"}},
                    "messageTimestamp": 1714564800
                },
                {
                    "key": {"remoteJid": "5511999990000@s.whatsapp.net", "fromMe": true, "id": "OUT1"},
                    "message": {"audioMessage": {"url": "https://mmg/a.enc", "mimetype": "audio/ogg; codecs=opus"}},
                    "messageTimestamp": "1714564801"
                },
                {
                    "key": {"remoteJid": "120363@g.us", "fromMe": false, "id": "GRP"},
                    "message": {"conversation": "group chatter"}
                }
            ]
        });

        let events = normalize(Provider::Evolution, &body);
        assert_eq!(events.len(), 2);
        match &events[0] {
            InboundEvent::Message(m) => {
                assert_eq!(m.provider_message_id, "IN1");
                assert_eq!(m.content.as_deref(), Some("hello"));
                assert!(!m.from_me);
                assert_eq!(m.timestamp.unwrap().timestamp(), 1714564800);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[1] {
            InboundEvent::Message(m) => {
                assert!(m.from_me);
                assert_eq!(m.message_type, MessageType::Audio);
                assert_eq!(m.file_url.as_deref(), Some("https://mmg/a.enc"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_evolution_update_status_forms() {
        let named = json!({"event": "MESSAGES_UPDATE", "data": {"keyId": "K1", "status": "DELIVERY_ACK"}});
        let numeric = json!({"event": "messages.update", "data": {"key": {"id": "K2"}, "update": {"status": 4}}});
        let unknown = json!({"event": "messages.update", "data": {"keyId": "K3", "status": "PENDING"}});

        assert_eq!(
            normalize(Provider::Evolution, &named),
            vec![InboundEvent::Status(StatusUpdate {
                provider_message_id: "K1".into(),
                status: MessageStatus::Delivered
            })]
        );
        assert_eq!(
            normalize(Provider::Evolution, &numeric),
            vec![InboundEvent::Status(StatusUpdate {
                provider_message_id: "K2".into(),
                status: MessageStatus::Read
            })]
        );
        assert!(normalize(Provider::Evolution, &unknown).is_empty());
        assert!(normalize(Provider::Evolution, &json!({"event": "connection.update"})).is_empty());
    }

    #[test]
    fn test_zapi_received_and_status() {
        let received = json!({
            "type": "ReceivedCallback",
            "messageId": "Z1",
            "phone": "5511999990000",
            "fromMe": false,
            "momment": 1714564800000i64,
            "image": {"imageUrl": "https://z/img.jpg", "caption": "look", "mimeType": "image/jpeg"}
        });
        match normalize(Provider::Zapi, &received).as_slice() {
            [InboundEvent::Message(m)] => {
                assert_eq!(m.message_type, MessageType::Image);
                assert_eq!(m.content.as_deref(), Some("look"));
                assert_eq!(m.timestamp.unwrap().timestamp(), 1714564800);
            }
            other => panic!("unexpected events: {other:?}"),
        }

        let status = json!({"type": "MessageStatusCallback", "status": "READ", "ids": ["Z1", "Z2"]});
        assert_eq!(normalize(Provider::Zapi, &status).len(), 2);

        let group = json!({"type": "ReceivedCallback", "messageId": "G", "phone": "1203-group", "isGroup": true, "text": {"message": "x"}});
        assert!(normalize(Provider::Zapi, &group).is_empty());
    }
}
