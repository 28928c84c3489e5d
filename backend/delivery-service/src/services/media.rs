//! Late-arriving media
//!
//! Providers often deliver the text row first and the media a few seconds
//! later, once it has been downloaded and decrypted. The callback carries
//! either a public URL or the raw bytes as base64; raw bytes are uploaded to
//! object storage (audio normalised to Ogg/Opus first) and only the media
//! columns of the existing row are patched.

use crate::config::MediaStorageConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{MediaCallbackRequest, MediaCallbackResponse};
use crate::store::{MessagePatch, MessageStore};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use message_identity::Message;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

const OGG_MIME: &str = "audio/ogg";
const FALLBACK_MIME: &str = "application/octet-stream";
const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage for uploaded media. Returns the public URL.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError>;
}

#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn to_ogg_opus(&self, input: Vec<u8>) -> Result<Vec<u8>, MediaError>;
}

/// Supabase-compatible storage REST API
pub struct HttpObjectStorage {
    client: reqwest::Client,
    config: MediaStorageConfig,
}

impl HttpObjectStorage {
    pub fn new(config: MediaStorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base(),
            self.config.bucket,
            path
        )
    }
}

#[async_trait]
impl MediaStorage for HttpObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base(), self.config.bucket, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        Ok(self.public_url(path))
    }
}

pub struct FfmpegTranscoder {
    binary: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TRANSCODE_TIMEOUT,
        }
    }

    /// Upper bound on one ffmpeg run; the process is killed past it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn to_ogg_opus(&self, input: Vec<u8>) -> Result<Vec<u8>, MediaError> {
        let mut child = Command::new(&self.binary)
            .args([
                "-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-vn", "-c:a", "libopus",
                "-b:a", "32k", "-f", "ogg", "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // stdin is written from its own task while output is drained.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Transcode("ffmpeg stdin unavailable".into()))?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        // dropping the child on timeout kills it (kill_on_drop)
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                writer.abort();
                warn!(timeout_secs = self.timeout.as_secs_f64(), "ffmpeg timed out");
                return Err(MediaError::Transcode(format!(
                    "ffmpeg timed out after {:?}",
                    self.timeout
                )));
            }
        };
        if let Ok(Err(e)) = writer.await {
            warn!(error = %e, "ffmpeg closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(MediaError::Transcode("ffmpeg produced no output".into()));
        }
        Ok(output.stdout)
    }
}

/// Decoded upload ready for storage
#[derive(Debug)]
struct Upload {
    bytes: Vec<u8>,
    mime_type: String,
    file_name: String,
}

pub struct MediaProcessor {
    store: Arc<dyn MessageStore>,
    storage: Option<Arc<dyn MediaStorage>>,
    transcoder: Arc<dyn AudioTranscoder>,
}

impl MediaProcessor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        storage: Option<Arc<dyn MediaStorage>>,
        transcoder: Arc<dyn AudioTranscoder>,
    ) -> Self {
        Self {
            store,
            storage,
            transcoder,
        }
    }

    pub async fn process(&self, request: MediaCallbackRequest) -> AppResult<MediaCallbackResponse> {
        let reference = request.message_id.trim();
        if reference.is_empty() {
            return Err(AppError::Validation("messageId is required".into()));
        }

        let message = self
            .store
            .find_by_reference(reference)
            .await?
            .ok_or(AppError::MessageNotFound)?;

        let file_url = request.file_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        let base64 = request.base64.as_deref().map(str::trim).filter(|b| !b.is_empty());

        let (file_url, file_name, mime_type, file_size) = match (file_url, base64) {
            (Some(url), _) => (
                url.to_string(),
                request.file_name.clone(),
                request.mime_type.clone(),
                None,
            ),
            (None, Some(encoded)) => {
                let storage = self.storage.as_ref().ok_or_else(|| {
                    AppError::ProviderNotConfigured("media storage is not configured".into())
                })?;
                let upload = self.prepare_upload(&message, &request, encoded).await?;
                let size = upload.bytes.len();
                let path = format!("{}/{}", message.conversation_id, upload.file_name);
                let url = storage
                    .upload(&path, upload.bytes, &upload.mime_type)
                    .await
                    .map_err(|e| AppError::MediaProcessing(e.to_string()))?;
                (url, Some(upload.file_name), Some(upload.mime_type), Some(size))
            }
            (None, None) => {
                return Err(AppError::Validation("fileUrl or base64 is required".into()));
            }
        };

        let patch = MessagePatch {
            file_url: Some(file_url.clone()),
            file_name: file_name.clone(),
            mime_type: mime_type.clone(),
            message_type: request.message_type,
            ..MessagePatch::default()
        };
        let updated = self
            .store
            .update(message.id, &patch)
            .await?
            .ok_or(AppError::MessageNotFound)?;

        metrics::record_reconcile("media", "matched");
        info!(message_id = %updated.id, file_url = %file_url, "Media attached");

        Ok(MediaCallbackResponse {
            success: true,
            message_id: updated.id,
            file_url,
            file_name: updated.file_name,
            mime_type: updated.mime_type,
            file_size,
        })
    }

    async fn prepare_upload(
        &self,
        message: &Message,
        request: &MediaCallbackRequest,
        encoded: &str,
    ) -> AppResult<Upload> {
        let (data_url_mime, payload) = split_data_url(encoded);
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|_| AppError::Validation("base64 payload is not valid".into()))?;

        let mut mime_type = request
            .mime_type
            .clone()
            .or(data_url_mime)
            .or_else(|| message.mime_type.clone())
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        let mut bytes = bytes;
        if needs_transcode(&mime_type) {
            match self.transcoder.to_ogg_opus(bytes.clone()).await {
                Ok(ogg) => {
                    bytes = ogg;
                    mime_type = OGG_MIME.to_string();
                }
                Err(e) => warn!(
                    message_id = %message.id,
                    mime_type = %mime_type,
                    error = %e,
                    "Audio transcode failed, keeping original encoding"
                ),
            }
        }

        let extension = extension_for(&mime_type);
        let stem = request
            .file_name
            .as_deref()
            .or(message.file_name.as_deref())
            .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
            .map(sanitize)
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| message.id.to_string());

        Ok(Upload {
            bytes,
            mime_type,
            file_name: format!("{stem}.{extension}"),
        })
    }
}

/// `data:audio/mpeg;base64,AAAA` → (`audio/mpeg`, `AAAA`)
fn split_data_url(encoded: &str) -> (Option<String>, &str) {
    let Some(rest) = encoded.strip_prefix("data:") else {
        return (None, encoded);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header
                .split(';')
                .next()
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            (mime, payload)
        }
        None => (None, encoded),
    }
}

fn needs_transcode(mime_type: &str) -> bool {
    match mime_type.parse::<mime::Mime>() {
        Ok(m) => m.type_() == mime::AUDIO && m.subtype().as_str() != "ogg",
        Err(_) => false,
    }
}

fn extension_for(mime_type: &str) -> String {
    let Ok(m) = mime_type.parse::<mime::Mime>() else {
        return "bin".into();
    };
    let known = match (m.type_().as_str(), m.subtype().as_str()) {
        ("image", "jpeg") => Some("jpg"),
        ("audio", "mpeg") => Some("mp3"),
        ("audio", "mp4") => Some("m4a"),
        ("application", "pdf") => Some("pdf"),
        ("text", "plain") => Some("txt"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.into();
    }

    let subtype = m.subtype().as_str();
    if subtype.len() <= 5 && subtype.chars().all(|c| c.is_ascii_alphanumeric()) {
        subtype.to_string()
    } else {
        "bin".into()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
