//! Opaque history cursor: URL-safe base64 of `<created_at RFC3339>|<id>`.

use crate::error::AppError;
use crate::store::HistoryCursor;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use message_identity::Message;
use uuid::Uuid;

pub fn encode(created_at: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}|{}", created_at.to_rfc3339_opts(SecondsFormat::Micros, true), id);
    URL_SAFE_NO_PAD.encode(raw)
}

pub fn encode_message(message: &Message) -> String {
    encode(message.created_at, message.id)
}

pub fn decode(cursor: &str) -> Result<HistoryCursor, AppError> {
    let invalid = || AppError::InvalidCursor(cursor.to_string());

    let bytes = URL_SAFE_NO_PAD.decode(cursor.trim()).map_err(|_| invalid())?;
    let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (created_at, id) = raw.split_once('|').ok_or_else(invalid)?;

    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok((created_at, id))
}
