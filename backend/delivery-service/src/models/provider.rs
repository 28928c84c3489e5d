use chrono::{DateTime, Utc};
use message_identity::Provider;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const ZAPI_DEFAULT_BASE_URL: &str = "https://api.z-api.io";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(alias = "serverUrl", alias = "base_url", alias = "url")]
    pub server_url: String,
    #[serde(alias = "apikey", alias = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapiConfig {
    #[serde(default = "zapi_default_base_url", alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "instanceId")]
    pub instance_id: String,
    #[serde(alias = "instanceToken", alias = "token")]
    pub instance_token: String,
    #[serde(default, alias = "clientToken")]
    pub client_token: Option<String>,
}

fn zapi_default_base_url() -> String {
    ZAPI_DEFAULT_BASE_URL.to_string()
}

impl ZapiConfig {
    pub fn instance_url(&self) -> String {
        format!(
            "{}/instances/{}/token/{}",
            self.base_url.trim_end_matches('/'),
            self.instance_id,
            self.instance_token
        )
    }
}

/// Active provider configuration for a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Evolution(EvolutionConfig),
    Zapi(ZapiConfig),
}

impl ProviderConfig {
    /// Build from a stored `(provider_type, config jsonb)` pair. Returns `None`
    /// for unknown providers or configs missing a required credential.
    pub fn from_stored(provider_type: &str, config: JsonValue) -> Option<Self> {
        let provider: Provider = provider_type.parse().ok()?;
        let parsed = match provider {
            Provider::Evolution => serde_json::from_value(config).ok().map(ProviderConfig::Evolution),
            Provider::Zapi => serde_json::from_value(config).ok().map(ProviderConfig::Zapi),
        }?;
        parsed.is_complete().then_some(parsed)
    }

    pub fn provider(&self) -> Provider {
        match self {
            ProviderConfig::Evolution(_) => Provider::Evolution,
            ProviderConfig::Zapi(_) => Provider::Zapi,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            ProviderConfig::Evolution(c) => {
                !c.server_url.trim().is_empty() && !c.api_key.trim().is_empty()
            }
            ProviderConfig::Zapi(c) => {
                !c.instance_id.trim().is_empty() && !c.instance_token.trim().is_empty()
            }
        }
    }

    pub fn credentials(&self) -> ProviderCredentials {
        match self {
            ProviderConfig::Evolution(c) => ProviderCredentials::Evolution {
                server_url: c.server_url.clone(),
                apikey: c.api_key.clone(),
            },
            ProviderConfig::Zapi(c) => ProviderCredentials::Zapi {
                zapi_url: c.instance_url(),
                zapi_token: c.instance_token.clone(),
                zapi_client_token: c.client_token.clone(),
                instance_id: c.instance_id.clone(),
                instance_token: c.instance_token.clone(),
            },
        }
    }
}

/// Credential fields carried on the relay envelope, one provider at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderCredentials {
    Evolution {
        server_url: String,
        apikey: String,
    },
    Zapi {
        zapi_url: String,
        zapi_token: String,
        zapi_client_token: Option<String>,
        instance_id: String,
        instance_token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayKey {
    #[serde(rename = "remoteJid")]
    pub remote_jid: String,
    #[serde(rename = "fromMe")]
    pub from_me: bool,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayData {
    pub key: RelayKey,
    pub message: JsonValue,
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(rename = "messageTimestamp")]
    pub message_timestamp: i64,
}

/// Envelope POSTed to the workspace relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPayload {
    pub event: String,
    pub instance: String,
    pub workspace_id: Uuid,
    pub connection_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub phone_number: String,
    pub external_id: Option<String>,
    pub data: RelayData,
    pub destination: String,
    pub date_time: DateTime<Utc>,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<JsonValue>,
    #[serde(flatten)]
    pub credentials: ProviderCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_stored_accepts_aliases() {
        let config = ProviderConfig::from_stored(
            "evolution",
            json!({"serverUrl": "https://evo.example.com", "apikey": "secret"}),
        )
        .unwrap();
        assert_eq!(config.provider(), Provider::Evolution);

        let zapi = ProviderConfig::from_stored(
            "zapi",
            json!({"instanceId": "inst", "token": "tok", "clientToken": "ct"}),
        )
        .unwrap();
        match zapi.credentials() {
            ProviderCredentials::Zapi { zapi_url, .. } => {
                assert_eq!(zapi_url, "https://api.z-api.io/instances/inst/token/tok")
            }
            other => panic!("unexpected credentials: {other:?}"),
        }
    }

    #[test]
    fn test_from_stored_rejects_incomplete_config() {
        assert!(ProviderConfig::from_stored("evolution", json!({"server_url": "", "api_key": "k"})).is_none());
        assert!(ProviderConfig::from_stored("zapi", json!({"instance_id": "i"})).is_none());
        assert!(ProviderConfig::from_stored("twilio", json!({})).is_none());
    }

    #[test]
    fn test_credentials_flatten_exclusively() {
        let evolution = ProviderCredentials::Evolution {
            server_url: "https://evo".into(),
            apikey: "k".into(),
        };
        let json = serde_json::to_value(&evolution).unwrap();
        assert_eq!(json["provider"], "evolution");
        assert!(json.get("zapi_url").is_none());
        assert!(json.get("instance_token").is_none());

        let zapi = ProviderCredentials::Zapi {
            zapi_url: "u".into(),
            zapi_token: "t".into(),
            zapi_client_token: None,
            instance_id: "i".into(),
            instance_token: "t".into(),
        };
        let json = serde_json::to_value(&zapi).unwrap();
        assert_eq!(json["provider"], "zapi");
        assert!(json.get("server_url").is_none());
        assert!(json.get("apikey").is_none());
    }
}
