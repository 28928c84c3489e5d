use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Config(format!("LOG_FORMAT must be text or json, got {other}"))),
        }
    }
}

/// Object storage for media uploaded as base64
#[derive(Debug, Clone)]
pub struct MediaStorageConfig {
    pub url: String,
    pub service_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseConfig,
    pub relay_timeout: Duration,
    pub history_default_limit: u32,
    pub history_max_limit: u32,
    /// `None` when MEDIA_STORAGE_URL or MEDIA_STORAGE_KEY is unset.
    pub media_storage: Option<MediaStorageConfig>,
    pub ffmpeg_path: String,
    pub transcode_timeout: Duration,
    pub log_format: LogFormat,
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = optional_var("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;

        let database = DatabaseConfig {
            url: database_url,
            max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", 2)?,
            acquire_timeout: Duration::from_secs(parse_var("DB_ACQUIRE_TIMEOUT_SECS", 10)?),
        };
        if database.min_connections > database.max_connections {
            return Err(AppError::Config(
                "DB_MIN_CONNECTIONS cannot exceed DB_MAX_CONNECTIONS".into(),
            ));
        }

        let history_default_limit: u32 = parse_var("HISTORY_DEFAULT_LIMIT", 50)?;
        let history_max_limit: u32 = parse_var("HISTORY_MAX_LIMIT", 200)?;
        if history_default_limit == 0 || history_max_limit < history_default_limit {
            return Err(AppError::Config(
                "HISTORY_DEFAULT_LIMIT must be between 1 and HISTORY_MAX_LIMIT".into(),
            ));
        }

        let media_storage = match (optional_var("MEDIA_STORAGE_URL"), optional_var("MEDIA_STORAGE_KEY")) {
            (Some(url), Some(service_key)) => Some(MediaStorageConfig {
                url,
                service_key,
                bucket: optional_var("MEDIA_BUCKET").unwrap_or_else(|| "chat-media".into()),
            }),
            _ => None,
        };

        let transcode_timeout = Duration::from_secs(parse_var("TRANSCODE_TIMEOUT_SECS", 60)?);
        if transcode_timeout.is_zero() {
            return Err(AppError::Config("TRANSCODE_TIMEOUT_SECS must be positive".into()));
        }

        Ok(Self {
            port: parse_var("PORT", 3000)?,
            database,
            relay_timeout: Duration::from_secs(parse_var("RELAY_TIMEOUT_SECS", 15)?),
            history_default_limit,
            history_max_limit,
            media_storage,
            ffmpeg_path: optional_var("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".into()),
            transcode_timeout,
            log_format: parse_var("LOG_FORMAT", LogFormat::Text)?,
        })
    }

    /// Defaults without touching the environment.
    pub fn for_database(url: impl Into<String>) -> Self {
        Self {
            port: 3000,
            database: DatabaseConfig {
                url: url.into(),
                max_connections: 10,
                min_connections: 2,
                acquire_timeout: Duration::from_secs(10),
            },
            relay_timeout: Duration::from_secs(15),
            history_default_limit: 50,
            history_max_limit: 200,
            media_storage: None,
            ffmpeg_path: "ffmpeg".into(),
            transcode_timeout: Duration::from_secs(60),
            log_format: LogFormat::Text,
        }
    }

    /// Clamp a requested history page size to `[1, history_max_limit]`.
    pub fn history_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.history_default_limit)
            .clamp(1, self.history_max_limit)
    }
}
