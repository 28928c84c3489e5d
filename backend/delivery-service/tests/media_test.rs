//! Integration tests for late media attachment
//!
//! Covers:
//! 1. Lookup by internal id and provider id, 404 otherwise
//! 2. Only media columns change, even on terminal rows
//! 3. base64 upload with audio normalisation and its fallback
//! 4. Missing object storage

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{Fixture, OGG_BYTES};
use delivery_service::error::AppError;
use delivery_service::models::MediaCallbackRequest;
use message_identity::{MessageStatus, MessageType};

fn callback(message_id: &str) -> MediaCallbackRequest {
    MediaCallbackRequest {
        message_id: message_id.to_string(),
        file_url: None,
        base64: None,
        file_name: None,
        mime_type: None,
        message_type: None,
    }
}

#[tokio::test]
async fn test_unknown_message_is_not_found() {
    let fx = Fixture::evolution();
    let mut request = callback("does-not-exist");
    request.file_url = Some("https://cdn.test/a.jpg".into());

    let err = fx.state.media.process(request).await.unwrap_err();
    assert!(matches!(err, AppError::MessageNotFound));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_file_url_patch_keeps_status_and_content() {
    let fx = Fixture::evolution();
    let row = fx.seed(|m| {
        m.status = MessageStatus::Read;
        m.content = Some("caption".into());
        m.evolution_key_id = Some("3EB0IMG".into());
    });

    let mut request = callback("3EB0IMG");
    request.file_url = Some("https://cdn.test/a.jpg".into());
    request.mime_type = Some("image/jpeg".into());
    request.message_type = Some(MessageType::Image);

    let response = fx.state.media.process(request).await.unwrap();
    assert!(response.success);
    assert_eq!(response.message_id, row.id);
    assert_eq!(response.file_size, None);

    let stored = fx.stored(row.id);
    assert_eq!(stored.status, MessageStatus::Read);
    assert_eq!(stored.content.as_deref(), Some("caption"));
    assert_eq!(stored.file_url.as_deref(), Some("https://cdn.test/a.jpg"));
    assert_eq!(stored.mime_type.as_deref(), Some("image/jpeg"));
    assert_eq!(stored.message_type, MessageType::Image);
}

#[tokio::test]
async fn test_base64_audio_is_transcoded_to_ogg() {
    let fx = Fixture::evolution();
    let row = fx.seed(|m| m.message_type = MessageType::Audio);

    let mut request = callback(&row.id.to_string());
    request.base64 = Some(format!("data:audio/mpeg;base64,{}", STANDARD.encode(b"ID3-mp3-bytes")));
    request.file_name = Some("voice note.mp3".into());

    let response = fx.state.media.process(request).await.unwrap();

    assert_eq!(fx.transcoder.calls(), 1);
    assert_eq!(response.mime_type.as_deref(), Some("audio/ogg"));
    assert_eq!(response.file_name.as_deref(), Some("voice_note.ogg"));
    assert_eq!(response.file_size, Some(OGG_BYTES.len()));

    let uploads = fx.storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].path, format!("{}/voice_note.ogg", fx.conversation.id));
    assert_eq!(uploads[0].content_type, "audio/ogg");
    assert_eq!(
        fx.stored(row.id).file_url,
        Some(format!("https://storage.test/{}/voice_note.ogg", fx.conversation.id))
    );
}

#[tokio::test]
async fn test_transcode_failure_keeps_original_encoding() {
    let fx = Fixture::evolution();
    fx.transcoder.failing();
    let row = fx.seed(|m| m.message_type = MessageType::Audio);

    let mut request = callback(&row.id.to_string());
    request.base64 = Some(STANDARD.encode(b"ID3-mp3-bytes"));
    request.mime_type = Some("audio/mpeg".into());

    let response = fx.state.media.process(request).await.unwrap();

    assert_eq!(response.mime_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(response.file_size, Some(b"ID3-mp3-bytes".len()));
    assert_eq!(
        response.file_name,
        Some(format!("{}.mp3", row.id))
    );
}

#[tokio::test]
async fn test_ogg_audio_skips_transcoding() {
    let fx = Fixture::evolution();
    let row = fx.seed(|m| m.message_type = MessageType::Audio);

    let mut request = callback(&row.id.to_string());
    request.base64 = Some(STANDARD.encode(b"OggS-real"));
    request.mime_type = Some("audio/ogg; codecs=opus".into());

    fx.state.media.process(request).await.unwrap();
    assert_eq!(fx.transcoder.calls(), 0);
}

#[tokio::test]
async fn test_base64_without_storage_is_not_configured() {
    let fx = Fixture::without_media_storage();
    let row = fx.seed(|_| {});

    let mut request = callback(&row.id.to_string());
    request.base64 = Some(STANDARD.encode(b"bytes"));

    let err = fx.state.media.process(request).await.unwrap_err();
    assert_eq!(err.status_code(), 424);
    assert!(fx.stored(row.id).file_url.is_none());
}

#[tokio::test]
async fn test_upload_failure_and_bad_payloads() {
    let fx = Fixture::evolution();
    let row = fx.seed(|_| {});

    let mut garbage = callback(&row.id.to_string());
    garbage.base64 = Some("***not base64***".into());
    assert!(matches!(
        fx.state.media.process(garbage).await,
        Err(AppError::Validation(_))
    ));

    let empty = callback(&row.id.to_string());
    assert!(matches!(
        fx.state.media.process(empty).await,
        Err(AppError::Validation(_))
    ));

    fx.storage.failing();
    let mut upload = callback(&row.id.to_string());
    upload.base64 = Some(STANDARD.encode(b"bytes"));
    upload.mime_type = Some("image/png".into());
    let err = fx.state.media.process(upload).await.unwrap_err();
    assert!(matches!(err, AppError::MediaProcessing(_)));
    assert_eq!(err.status_code(), 502);
}
