//! Event handler trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EventError;
use crate::event::Event;

/// Something that reacts to business events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and reports.
    fn id(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, event: &Event) -> Result<(), EventError>;
}

/// How one handler fared with one event, as returned by `EventBus::emit_sync`.
#[derive(Debug, Clone)]
pub struct HandlerReport {
    pub handler_id: String,
    /// Error message on failure.
    pub outcome: Result<(), String>,
    pub elapsed: Duration,
}

impl HandlerReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}
