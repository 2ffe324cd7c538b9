//! Webhook system - main entry point.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use freightline_events::{Clock, Event, EventBus, EventError, EventHandler};

use crate::delivery::DeliveryEngine;
use crate::error::{WebhookError, WebhookResult};
use crate::record::WebhookEvent;
use crate::retry::BackoffPolicy;
use crate::scheduler::{DeliveryOutcome, RetryScheduler, SweepReport};
use crate::stats::DeliveryStats;
use crate::storage::WebhookStorage;
use crate::subscription::{NewSubscription, Subscription, SubscriptionUpdate};
use crate::transport::WebhookTransport;

/// Webhook system configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Default per-event attempt budget for new subscriptions.
    pub max_retries: u32,
    /// Delay between failed attempts.
    pub backoff: BackoffPolicy,
    /// Hard timeout per delivery attempt.
    pub request_timeout: Duration,
    /// Maximum stored response body length, in characters.
    pub response_body_limit: usize,
    /// Consecutive terminal failures after which a subscription is deactivated.
    pub deactivation_threshold: u32,
    /// User-Agent sent with every delivery.
    pub user_agent: String,
    /// How long a claimed delivery is hidden from other workers.
    pub claim_lease: Duration,
    /// Maximum records re-attempted per sweep.
    pub sweep_batch_size: usize,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// Whether retries are also driven by in-process timers.
    pub in_process_timers: bool,
    /// Delivery records older than this many days are removed by cleanup.
    pub retention_days: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::subscription::DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(30),
            response_body_limit: 1000,
            deactivation_threshold: 10,
            user_agent: "Freightline-Webhooks/1.0".to_string(),
            claim_lease: Duration::from_secs(60),
            sweep_batch_size: 100,
            sweep_interval: Duration::from_secs(30),
            in_process_timers: true,
            retention_days: 30,
        }
    }
}

impl WebhookConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default retry budget.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the backoff policy.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the stored response body limit.
    pub fn response_body_limit(mut self, limit: usize) -> Self {
        self.response_body_limit = limit;
        self
    }

    /// Sets the deactivation threshold.
    pub fn deactivation_threshold(mut self, threshold: u32) -> Self {
        self.deactivation_threshold = threshold;
        self
    }

    /// Sets the User-Agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the claim lease.
    pub fn claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Sets the sweep batch size.
    pub fn sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    /// Sets the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enables or disables in-process retry timers.
    pub fn in_process_timers(mut self, enabled: bool) -> Self {
        self.in_process_timers = enabled;
        self
    }

    /// Sets the retention window.
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Checks settings that only make sense together.
    ///
    /// A claim lease that can lapse while its attempt is still in flight
    /// lets a second worker claim the same delivery.
    pub fn validate(&self) -> WebhookResult<()> {
        if self.claim_lease <= self.request_timeout {
            return Err(WebhookError::ConfigError(format!(
                "claim_lease ({:?}) must be longer than request_timeout ({:?})",
                self.claim_lease, self.request_timeout
            )));
        }
        if self.sweep_batch_size == 0 {
            return Err(WebhookError::ConfigError(
                "sweep_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// The main webhook system.
///
/// Owns subscription management, fan-out, and the retry scheduler. Wrap it in
/// an `Arc` to share it with the event bus and background sweeps.
pub struct WebhookSystem {
    config: WebhookConfig,
    storage: Arc<dyn WebhookStorage>,
    scheduler: Arc<RetryScheduler>,
    clock: Arc<dyn Clock>,
}

#[cfg(feature = "http-client")]
impl WebhookSystem {
    /// Creates an in-memory system delivering over HTTP.
    pub fn new(config: WebhookConfig) -> Self {
        Self::with_components(
            Arc::new(crate::storage::InMemoryWebhookStorage::new()),
            Arc::new(crate::transport::HttpTransport::new()),
            Arc::new(freightline_events::SystemClock),
            config,
        )
    }
}

impl WebhookSystem {
    /// Creates a system from explicit storage, transport, and clock.
    pub fn with_components(
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
        config: WebhookConfig,
    ) -> Self {
        let engine = DeliveryEngine::new(transport, clock.clone(), &config);
        let scheduler = RetryScheduler::new(storage.clone(), engine, clock.clone(), config.clone());

        Self {
            config,
            storage,
            scheduler,
            clock,
        }
    }

    /// Creates a subscription, generating its secret when none is given.
    pub async fn create_subscription(
        &self,
        mut request: NewSubscription,
    ) -> WebhookResult<Subscription> {
        if request.max_retries.is_none() {
            request.max_retries = Some(self.config.max_retries);
        }
        let subscription = Subscription::from_request(request, self.clock.now())?;
        let created = self.storage.create(&subscription).await?;
        info!(
            subscription_id = %created.id,
            owner_id = %created.owner_id,
            events = created.events.len(),
            "Subscription created"
        );
        Ok(created)
    }

    /// Gets a subscription by ID.
    pub async fn get_subscription(&self, id: &str) -> WebhookResult<Subscription> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))
    }

    /// Lists an owner's subscriptions.
    pub async fn list_subscriptions(&self, owner_id: &str) -> WebhookResult<Vec<Subscription>> {
        self.storage.list_for_owner(owner_id).await
    }

    /// Applies a partial update. Setting `active = true` reactivates.
    pub async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> WebhookResult<Subscription> {
        let updated = self.storage.update(id, update, self.clock.now()).await?;
        debug!(subscription_id = %id, active = updated.active, "Subscription updated");
        Ok(updated)
    }

    /// Soft-deletes a subscription. Its delivery history is kept.
    pub async fn delete_subscription(&self, id: &str) -> WebhookResult<()> {
        self.get_subscription(id).await?;
        self.storage.deactivate(id, "deleted", self.clock.now()).await?;
        info!(subscription_id = %id, "Subscription deleted");
        Ok(())
    }

    /// Delivery counts for a subscription over the trailing `days`.
    pub async fn delivery_stats(&self, id: &str, days: u32) -> WebhookResult<DeliveryStats> {
        self.get_subscription(id).await?;
        let since = self.clock.now() - ChronoDuration::days(i64::from(days));
        let events = self.storage.events_since(id, since).await?;
        Ok(DeliveryStats::from_events(id, since, &events))
    }

    /// Recent deliveries of a subscription, newest first.
    pub async fn events_for_subscription(
        &self,
        id: &str,
        limit: usize,
    ) -> WebhookResult<Vec<WebhookEvent>> {
        self.get_subscription(id).await?;
        self.storage.events_for_subscription(id, limit).await
    }

    /// Gets a delivery record.
    pub async fn get_event(&self, id: &str) -> WebhookResult<WebhookEvent> {
        self.storage
            .get_event(id)
            .await?
            .ok_or_else(|| WebhookError::EventNotFound(id.to_string()))
    }

    /// Deletes delivery records created more than `older_than_days` ago.
    pub async fn cleanup_events(&self, older_than_days: u32) -> WebhookResult<usize> {
        let cutoff = self.clock.now() - ChronoDuration::days(i64::from(older_than_days));
        let deleted = self.storage.delete_events_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "Removed old delivery records");
        }
        Ok(deleted)
    }

    /// Fans an event out to every matching active subscription.
    ///
    /// One record is created per match and its first attempt starts at once
    /// on its own task; the caller never waits for delivery. Returns the
    /// number of records created.
    pub async fn dispatch(&self, event: &Event) -> WebhookResult<usize> {
        let records = self.create_records(event).await?;
        let count = records.len();

        for record in records {
            let scheduler = self.scheduler.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.process(&record.id).await {
                    error!(event_id = %record.id, "Webhook delivery error: {}", e);
                }
            });
        }
        Ok(count)
    }

    /// Like [`dispatch`](Self::dispatch) but waits for every first attempt.
    pub async fn dispatch_and_wait(&self, event: &Event) -> WebhookResult<Vec<DeliveryOutcome>> {
        let records = self.create_records(event).await?;

        let mut tasks = JoinSet::new();
        for record in records {
            let scheduler = self.scheduler.clone();
            tasks.spawn(async move { scheduler.process(&record.id).await });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => error!("Webhook delivery error: {}", e),
                Err(e) => error!("Webhook delivery task panicked: {}", e),
            }
        }
        Ok(outcomes)
    }

    /// Runs one sweep over due deliveries.
    pub async fn sweep(&self) -> WebhookResult<SweepReport> {
        self.scheduler.sweep().await
    }

    /// Spawns the periodic sweep. Abort the handle to stop it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let system = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(system.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = system.sweep().await {
                    error!("Webhook sweep error: {}", e);
                }
            }
        })
    }

    /// Creates an event handler that dispatches webhooks.
    pub fn create_event_handler(self: Arc<Self>) -> WebhookEventHandler {
        WebhookEventHandler { system: self }
    }

    /// Connects to an event bus.
    pub async fn connect_to_events(self: Arc<Self>, bus: &EventBus) {
        let handler = self.create_event_handler();
        bus.on_all(handler).await;
    }

    /// Gets the retry scheduler.
    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    /// Gets the configuration.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    async fn create_records(&self, event: &Event) -> WebhookResult<Vec<WebhookEvent>> {
        let subscriptions = self
            .storage
            .list_active_for_event(&event.event_type, event.owner_id.as_deref())
            .await?;

        let now = self.clock.now();
        let mut records = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let record = WebhookEvent::new(subscription, event, now);
            if let Err(e) = self.storage.insert_event(&record).await {
                warn!(
                    subscription_id = %subscription.id,
                    event_id = %event.id,
                    "Failed to record webhook delivery: {}",
                    e
                );
                continue;
            }
            records.push(record);
        }

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            subscriptions = records.len(),
            "Dispatching webhooks"
        );
        Ok(records)
    }
}

/// Event handler that dispatches webhooks.
pub struct WebhookEventHandler {
    system: Arc<WebhookSystem>,
}

#[async_trait::async_trait]
impl EventHandler for WebhookEventHandler {
    fn id(&self) -> &str {
        "webhook-system"
    }

    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        self.system
            .dispatch(event)
            .await
            .map_err(|e| EventError::HandlerFailed(e.to_string()))?;
        Ok(())
    }
}
