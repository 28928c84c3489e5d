//! Shared JSON error body for the delivery stack.
//!
//! Every HTTP-facing error is rendered as an [`ErrorResponse`]. The `success`
//! flag is always `false` so callers can branch on the same field they read
//! from successful send responses.

use serde::{Deserialize, Serialize};

/// Unified API error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,

    /// Human readable message
    pub error: String,

    /// Stable machine code, see [`error_codes`]
    pub code: String,

    /// Category, see [`error_types`]
    pub error_type: String,

    /// HTTP status code
    pub status: u16,

    /// Extra context (provider body, failing field, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            success: false,
            error: message.to_string(),
            code: code.to_string(),
            error_type: error_type.to_string(),
            status,
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Stable error codes
pub mod error_codes {
    // Validation
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const INVALID_CURSOR: &str = "INVALID_CURSOR";

    // Lookups
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const CONTACT_NOT_FOUND: &str = "CONTACT_NOT_FOUND";
    pub const CONNECTION_NOT_FOUND: &str = "CONNECTION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";

    // Provider / relay
    pub const PROVIDER_NOT_CONFIGURED: &str = "PROVIDER_NOT_CONFIGURED";
    pub const RELAY_FAILED: &str = "RELAY_FAILED";
    pub const MEDIA_PROCESSING_FAILED: &str = "MEDIA_PROCESSING_FAILED";

    // Database/System
    pub const PERSISTENCE_FAILED: &str = "PERSISTENCE_FAILED";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// Error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const SERVER_ERROR: &str = "server_error";
}
