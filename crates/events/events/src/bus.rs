//! In-process pub/sub for business events.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::event::Event;
use crate::handler::{EventHandler, HandlerReport};

struct Subscriber {
    pattern: String,
    handler: Arc<dyn EventHandler>,
}

/// Routes every emitted event to the handlers whose pattern matches it.
///
/// Patterns are exact types (`shipment.created`), namespace wildcards
/// (`shipment.*`) or `*`. A failing handler is logged and never affects the
/// others or the publisher.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    /// Spawn one task per handler on `emit` instead of awaiting them in turn.
    parallel_handlers: bool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_parallel_handlers(true)
    }

    /// With `false`, `emit` returns only after every handler ran, in
    /// subscription order.
    pub fn with_parallel_handlers(parallel_handlers: bool) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            parallel_handlers,
        }
    }

    /// Subscribes `handler` to events matching `pattern`.
    pub async fn on(&self, pattern: &str, handler: impl EventHandler + 'static) {
        self.subscribers.write().await.push(Subscriber {
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        });
    }

    /// Subscribes `handler` to every event.
    pub async fn on_all(&self, handler: impl EventHandler + 'static) {
        self.on("*", handler).await;
    }

    /// Publishes an event without waiting on its outcome.
    pub async fn emit(&self, event: Event) {
        let handlers = self.matching(&event).await;
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            handlers = handlers.len(),
            "Emitting event"
        );

        if !self.parallel_handlers {
            for handler in handlers {
                run_logged(handler.as_ref(), &event).await;
            }
            return;
        }

        let event = Arc::new(event);
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move { run_logged(handler.as_ref(), &event).await });
        }
    }

    /// Publishes an event and reports how each handler fared.
    pub async fn emit_sync(&self, event: Event) -> Vec<HandlerReport> {
        let mut reports = Vec::new();
        for handler in self.matching(&event).await {
            let started = Instant::now();
            let outcome = handler.handle(&event).await.map_err(|e| e.to_string());
            reports.push(HandlerReport {
                handler_id: handler.id().to_string(),
                outcome,
                elapsed: started.elapsed(),
            });
        }
        reports
    }

    /// Number of handlers registered under exactly `pattern`.
    pub async fn subscriber_count(&self, pattern: &str) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| s.pattern == pattern)
            .count()
    }

    async fn matching(&self, event: &Event) -> Vec<Arc<dyn EventHandler>> {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| event.matches(&s.pattern))
            .map(|s| s.handler.clone())
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_logged(handler: &dyn EventHandler, event: &Event) {
    if let Err(e) = handler.handle(event).await {
        tracing::error!("Event handler '{}' error: {}", handler.id(), e);
    }
}
