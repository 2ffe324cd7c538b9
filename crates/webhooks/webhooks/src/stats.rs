//! Delivery statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{DeliveryStatus, WebhookEvent};

/// Delivery counts for one subscription over a window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryStats {
    pub subscription_id: String,
    /// Start of the window.
    pub since: DateTime<Utc>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Pending or retrying.
    pub pending: usize,
    /// Percentage of `total` that was delivered, 0.0 when there were none.
    pub success_rate: f64,
}

impl DeliveryStats {
    /// Tallies a set of delivery records.
    pub fn from_events<'a>(
        subscription_id: impl Into<String>,
        since: DateTime<Utc>,
        events: impl IntoIterator<Item = &'a WebhookEvent>,
    ) -> Self {
        let mut stats = Self {
            subscription_id: subscription_id.into(),
            since,
            ..Default::default()
        };

        for event in events {
            stats.total += 1;
            match event.status {
                DeliveryStatus::Sent => stats.successful += 1,
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::Pending | DeliveryStatus::Retrying => stats.pending += 1,
            }
        }

        if stats.total > 0 {
            stats.success_rate = stats.successful as f64 / stats.total as f64 * 100.0;
        }
        stats
    }
}
