//! Retry scheduling and the durable sweep.
//!
//! Every attempt, whether eager, timer-driven, or found by the sweep, goes
//! through [`RetryScheduler::process`], which claims the record with a
//! compare-and-swap before touching the network. In-process timers only
//! shorten latency; the `next_retry_at` column plus [`RetryScheduler::sweep`]
//! is the system of record.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use freightline_events::Clock;

use crate::delivery::{AttemptOutcome, DeliveryEngine};
use crate::error::{WebhookError, WebhookResult};
use crate::record::{DeliveryStatus, ResponseRecord, WebhookEvent};
use crate::retry::{BackoffPolicy, RetryStrategy};
use crate::storage::WebhookStorage;
use crate::subscription::Subscription;
use crate::system::WebhookConfig;

/// What happened to a record after one pass through the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered; terminal.
    Sent,
    /// Failed but within budget; due again at `next_retry_at`.
    Retrying { next_retry_at: DateTime<Utc> },
    /// Retry budget exhausted; terminal.
    Failed,
    /// Owning subscription is inactive or gone; terminal without an attempt.
    SubscriptionDisabled,
    /// Not due, already claimed, or overtaken by a concurrent writer.
    Skipped,
}

/// Tally of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        self.processed += 1;
        match outcome {
            DeliveryOutcome::Sent => self.sent += 1,
            DeliveryOutcome::Retrying { .. } => self.retrying += 1,
            DeliveryOutcome::Failed | DeliveryOutcome::SubscriptionDisabled => self.failed += 1,
            DeliveryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Decides retry vs. terminal outcome for each attempt and schedules the next one.
pub struct RetryScheduler {
    store: Arc<dyn WebhookStorage>,
    engine: DeliveryEngine,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    config: WebhookConfig,
    this: Weak<RetryScheduler>,
}

impl RetryScheduler {
    /// Creates a shared scheduler.
    pub fn new(
        store: Arc<dyn WebhookStorage>,
        engine: DeliveryEngine,
        clock: Arc<dyn Clock>,
        config: WebhookConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            engine,
            backoff: config.backoff.clone(),
            clock,
            config,
            this: this.clone(),
        })
    }

    /// Claims a record and performs one attempt if it is due.
    pub async fn process(&self, event_id: &str) -> WebhookResult<DeliveryOutcome> {
        let now = self.clock.now();
        let lease_until = now + to_chrono(self.config.claim_lease);

        let Some(event) = self.store.claim_event(event_id, now, lease_until).await? else {
            debug!(event_id = %event_id, "Delivery not due or already claimed");
            return Ok(DeliveryOutcome::Skipped);
        };

        let subscription = match self.store.get(&event.subscription_id).await? {
            Some(sub) if sub.active => sub,
            _ => return self.fail_disabled(event).await,
        };

        if event.attempts >= subscription.max_retries {
            // Budget shrank under an in-flight record.
            let mut updated = event.clone();
            updated.status = DeliveryStatus::Failed;
            updated.next_retry_at = None;
            updated.last_error = Some("retry budget exhausted".into());
            if !self.commit(&updated, event.attempts).await? {
                return Ok(DeliveryOutcome::Skipped);
            }
            self.count_terminal_failure(&subscription).await?;
            return Ok(DeliveryOutcome::Failed);
        }

        debug!(
            event_id = %event.id,
            subscription_id = %subscription.id,
            attempt = event.attempts + 1,
            "Attempting delivery"
        );
        let outcome = self.engine.attempt(&event, &subscription).await;
        self.record_outcome(event, &subscription, outcome).await
    }

    /// Applies the outcome of one attempt to the record and subscription.
    pub async fn record_outcome(
        &self,
        event: WebhookEvent,
        subscription: &Subscription,
        outcome: AttemptOutcome,
    ) -> WebhookResult<DeliveryOutcome> {
        let now = self.clock.now();
        let expected_attempts = event.attempts;

        let mut updated = event;
        updated.attempts += 1;
        updated.last_attempt_at = Some(now);

        match outcome {
            AttemptOutcome::Success {
                status_code,
                body,
                headers,
            } => {
                updated.status = DeliveryStatus::Sent;
                updated.next_retry_at = None;
                updated.last_error = None;
                updated.last_response = Some(ResponseRecord {
                    status_code,
                    body,
                    headers,
                });
                if !self.commit(&updated, expected_attempts).await? {
                    return Ok(DeliveryOutcome::Skipped);
                }
                self.store.reset_failure_count(&subscription.id, now).await?;
                info!(
                    event_id = %updated.id,
                    subscription_id = %subscription.id,
                    status_code,
                    attempt = updated.attempts,
                    "Webhook delivered"
                );
                Ok(DeliveryOutcome::Sent)
            }
            AttemptOutcome::HttpFailure { status_code, body } => {
                updated.last_error = Some(format!("HTTP {status_code}"));
                updated.last_response = Some(ResponseRecord {
                    status_code,
                    body,
                    headers: Default::default(),
                });
                self.on_failure(updated, expected_attempts, subscription, now)
                    .await
            }
            AttemptOutcome::TransportFailure { error } => {
                updated.last_error = Some(error);
                self.on_failure(updated, expected_attempts, subscription, now)
                    .await
            }
        }
    }

    /// Re-attempts every record whose due time has passed.
    pub async fn sweep(&self) -> WebhookResult<SweepReport> {
        let now = self.clock.now();
        let due = self
            .store
            .due_events(now, self.config.sweep_batch_size)
            .await?;
        let mut report = SweepReport::default();
        if due.is_empty() {
            return Ok(report);
        }

        let Some(this) = self.this.upgrade() else {
            return Ok(report);
        };

        debug!(count = due.len(), "Sweeping due deliveries");
        let mut tasks = JoinSet::new();
        for event in due {
            let scheduler = this.clone();
            tasks.spawn(async move { scheduler.process(&event.id).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.record(&outcome),
                Ok(Err(e)) => {
                    error!("Sweep delivery error: {}", e);
                    report.skipped += 1;
                    report.processed += 1;
                }
                Err(e) => {
                    error!("Sweep task panicked: {}", e);
                    report.skipped += 1;
                    report.processed += 1;
                }
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                sent = report.sent,
                retrying = report.retrying,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    async fn on_failure(
        &self,
        mut updated: WebhookEvent,
        expected_attempts: u32,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> WebhookResult<DeliveryOutcome> {
        if updated.attempts >= subscription.max_retries {
            updated.status = DeliveryStatus::Failed;
            updated.next_retry_at = None;
            if !self.commit(&updated, expected_attempts).await? {
                return Ok(DeliveryOutcome::Skipped);
            }
            warn!(
                event_id = %updated.id,
                subscription_id = %subscription.id,
                attempts = updated.attempts,
                error = updated.last_error.as_deref().unwrap_or_default(),
                "Webhook delivery failed permanently"
            );
            self.count_terminal_failure(subscription).await?;
            return Ok(DeliveryOutcome::Failed);
        }

        let delay = self.backoff.next_delay(updated.attempts);
        let next_retry_at = now + to_chrono(delay);
        updated.status = DeliveryStatus::Retrying;
        updated.next_retry_at = Some(next_retry_at);
        if !self.commit(&updated, expected_attempts).await? {
            return Ok(DeliveryOutcome::Skipped);
        }

        warn!(
            event_id = %updated.id,
            subscription_id = %subscription.id,
            attempt = updated.attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = updated.last_error.as_deref().unwrap_or_default(),
            "Webhook delivery failed, retry scheduled"
        );
        self.schedule_timer(updated.id.clone(), delay);
        Ok(DeliveryOutcome::Retrying { next_retry_at })
    }

    async fn fail_disabled(&self, event: WebhookEvent) -> WebhookResult<DeliveryOutcome> {
        let expected_attempts = event.attempts;
        let mut updated = event;
        updated.status = DeliveryStatus::Failed;
        updated.next_retry_at = None;
        updated.last_error = Some("subscription disabled".into());
        if !self.commit(&updated, expected_attempts).await? {
            return Ok(DeliveryOutcome::Skipped);
        }
        info!(
            event_id = %updated.id,
            subscription_id = %updated.subscription_id,
            "Dropping delivery for disabled subscription"
        );
        Ok(DeliveryOutcome::SubscriptionDisabled)
    }

    async fn count_terminal_failure(&self, subscription: &Subscription) -> WebhookResult<()> {
        let failures = self
            .store
            .increment_failure_count(&subscription.id)
            .await?;

        if failures >= self.config.deactivation_threshold {
            let reason = format!("{failures} consecutive failed deliveries");
            self.store
                .deactivate(&subscription.id, &reason, self.clock.now())
                .await?;
            warn!(
                subscription_id = %subscription.id,
                failures,
                "Subscription deactivated"
            );
        }
        Ok(())
    }

    /// Writes `event` if nobody else advanced it. Returns false on a lost race.
    async fn commit(&self, event: &WebhookEvent, expected_attempts: u32) -> WebhookResult<bool> {
        match self.store.update_event_if(event, expected_attempts).await {
            Ok(()) => Ok(true),
            Err(WebhookError::Conflict(id)) => {
                debug!(event_id = %id, "Delivery record changed concurrently, dropping result");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn schedule_timer(&self, event_id: String, delay: Duration) {
        if !self.config.in_process_timers {
            return;
        }
        let scheduler = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };
            if let Err(e) = scheduler.process(&event_id).await {
                error!(event_id = %event_id, "Scheduled retry failed: {}", e);
            }
        });
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
