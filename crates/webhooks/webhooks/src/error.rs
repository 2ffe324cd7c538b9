//! Webhook error types.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Invalid subscription input (URL, event list, retry budget).
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Signature did not match the body.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Payload timestamp outside the accepted window.
    #[error("Signature expired")]
    ExpiredSignature,

    /// Subscription not found.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Delivery record not found.
    #[error("Delivery not found: {0}")]
    EventNotFound(String),

    /// A conditional update lost against a concurrent writer.
    #[error("Conflicting update on delivery {0}")]
    Conflict(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Timeout.
    #[error("Request timeout")]
    Timeout,

    /// Storage error.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::InvalidPayload(err.to_string())
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for WebhookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WebhookError::Timeout
        } else {
            WebhookError::HttpError(err.to_string())
        }
    }
}
