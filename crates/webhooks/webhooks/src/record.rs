//! Per-subscription delivery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use freightline_events::Event;

use crate::subscription::Subscription;

/// Lifecycle of one delivery.
///
/// `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// Returns true once no further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

/// Last HTTP response received for a delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseRecord {
    pub status_code: u16,
    /// Response body, truncated.
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// One business event being delivered to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Delivery ID, also sent as the delivery-id header.
    pub id: String,
    pub subscription_id: String,
    /// ID of the business event that produced this delivery.
    pub source_event_id: String,
    pub event_type: String,
    /// The `data` object sent to the subscriber.
    pub payload: Value,
    pub status: DeliveryStatus,
    /// Attempts made so far. Never exceeds the subscription's `max_retries`.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the record is next due. Also used as the claim lease.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_response: Option<ResponseRecord>,
    pub last_error: Option<String>,
}

impl WebhookEvent {
    /// Creates a pending delivery of `event` to `subscription`.
    pub fn new(subscription: &Subscription, event: &Event, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription.id.clone(),
            source_event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            payload: event.data(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            created_at: now,
            last_attempt_at: None,
            next_retry_at: None,
            last_response: None,
            last_error: None,
        }
    }

    /// Checks whether the record may be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_retry_at.is_none_or(|at| at <= now)
    }
}
