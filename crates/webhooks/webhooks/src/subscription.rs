//! Webhook subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{WebhookError, WebhookResult};
use crate::signature::generate_secret;

/// Default per-event retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A registered receiver of webhook deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier.
    pub id: String,
    /// Owner (tenant) of this subscription.
    pub owner_id: String,
    /// Target URL.
    pub url: String,
    /// Event types this subscription listens for.
    pub events: BTreeSet<String>,
    /// Signing secret. Never serialized outward.
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Whether deliveries are currently made.
    pub active: bool,
    /// Consecutive events that ended in terminal failure.
    pub consecutive_failures: u32,
    /// Per-event attempt budget.
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time an event was delivered successfully.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Why the subscription was deactivated, if it was.
    pub deactivated_reason: Option<String>,
}

impl Subscription {
    /// Builds a subscription from a creation request.
    ///
    /// The secret is generated here when the request carries none; it is the
    /// only time a secret is chosen for this subscription.
    pub fn from_request(request: NewSubscription, now: DateTime<Utc>) -> WebhookResult<Self> {
        request.validate()?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: request.owner_id,
            url: request.url,
            events: request.events.into_iter().collect(),
            secret: request.secret.unwrap_or_else(generate_secret),
            active: true,
            consecutive_failures: 0,
            max_retries: request.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            created_at: now,
            updated_at: now,
            last_success_at: None,
            deactivated_reason: None,
        })
    }

    /// Checks if this subscription should receive an event type.
    pub fn listens_for(&self, event_type: &str) -> bool {
        self.active && self.events.contains(event_type)
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, update: SubscriptionUpdate, now: DateTime<Utc>) -> WebhookResult<()> {
        update.validate()?;

        if let Some(url) = update.url {
            self.url = url;
        }
        if let Some(events) = update.events {
            self.events = events.into_iter().collect();
        }
        if let Some(max_retries) = update.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(active) = update.active {
            if active && !self.active {
                self.consecutive_failures = 0;
                self.deactivated_reason = None;
            }
            self.active = active;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Request to create a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub owner_id: String,
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewSubscription {
    /// Creates a request with a generated secret and the default retry budget.
    pub fn new(
        owner_id: impl Into<String>,
        url: impl Into<String>,
        events: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            url: url.into(),
            events: events.into_iter().map(Into::into).collect(),
            secret: None,
            max_retries: None,
        }
    }

    /// Uses a caller-provided secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the per-event retry budget.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    fn validate(&self) -> WebhookResult<()> {
        if self.owner_id.trim().is_empty() {
            return Err(WebhookError::InvalidSubscription("owner_id is required".into()));
        }
        validate_url(&self.url)?;
        validate_events(&self.events)?;
        if let Some(secret) = &self.secret {
            if secret.is_empty() {
                return Err(WebhookError::InvalidSubscription("secret must not be empty".into()));
            }
        }
        validate_max_retries(self.max_retries)
    }
}

/// Partial update of a subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl SubscriptionUpdate {
    fn validate(&self) -> WebhookResult<()> {
        if let Some(url) = &self.url {
            validate_url(url)?;
        }
        if let Some(events) = &self.events {
            validate_events(events)?;
        }
        validate_max_retries(self.max_retries)
    }
}

fn validate_url(url: &str) -> WebhookResult<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(WebhookError::InvalidSubscription(format!(
            "url must be an absolute http(s) URL: {url}"
        ))),
    }
}

fn validate_events(events: &[String]) -> WebhookResult<()> {
    if events.is_empty() {
        return Err(WebhookError::InvalidSubscription(
            "at least one event type is required".into(),
        ));
    }
    if events.iter().any(|e| e.trim().is_empty()) {
        return Err(WebhookError::InvalidSubscription("event types must not be empty".into()));
    }
    Ok(())
}

fn validate_max_retries(max_retries: Option<u32>) -> WebhookResult<()> {
    match max_retries {
        Some(0) => Err(WebhookError::InvalidSubscription(
            "max_retries must be at least 1".into(),
        )),
        _ => Ok(()),
    }
}
