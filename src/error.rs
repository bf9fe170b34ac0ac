//! Error types for call-insights.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Add-on error: {0}")]
    Addon(#[from] AddonError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Errors on the synchronous webhook path. Each maps to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook {0} not found or inactive")]
    UnknownWebhook(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Failed to persist webhook event: {0}")]
    Persistence(#[from] DatabaseError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownWebhook(_) => StatusCode::NOT_FOUND,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::UnknownWebhook(_) => "Webhook not found".to_string(),
            Self::MalformedPayload(_) => "Invalid JSON payload".to_string(),
            // Internal detail stays in the logs.
            Self::Persistence(_) => "Failed to process webhook".to_string(),
        };
        (
            self.status_code(),
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}

/// Caller identification lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Lookup request failed: {0}")]
    Request(String),

    #[error("Lookup returned HTTP {status}")]
    Status { status: u16 },

    #[error("Lookup response could not be decoded: {0}")]
    Decode(String),
}

/// Add-on execution errors.
#[derive(Debug, thiserror::Error)]
pub enum AddonError {
    #[error("Add-on {addon} is not registered")]
    Unknown { addon: String },

    #[error("Add-on {addon} is misconfigured: {reason}")]
    Config { addon: String, reason: String },

    #[error("Add-on {addon} request failed: {reason}")]
    Request { addon: String, reason: String },
}

/// Outbound trigger delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Displayed as the bare status so it can be stored as the log's error message.
    #[error("HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
