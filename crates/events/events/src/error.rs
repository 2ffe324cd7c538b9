//! Event error types.

use thiserror::Error;

/// Result type for event operations.
pub type EventResult<T> = Result<T, EventError>;

/// Error type for event publishing and handling.
#[derive(Debug, Error)]
pub enum EventError {
    /// A subscriber failed to process an event.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    /// The body of a known event type does not match its schema.
    #[error("Invalid {event_type} payload: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    #[error("Event type is empty")]
    EmptyEventType,
}
