//! Interfaces the assignment manager needs from its environment.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assignment::{Assignment, EscalationReason};

/// Picks the next carrier for a shipment.
#[async_trait]
pub trait CarrierRanking: Send + Sync {
    /// Returns the best carrier not in `exclude`, or `None` if there is none.
    async fn next_best_carrier(&self, shipment_id: &str, exclude: &[String]) -> Option<String>;
}

/// Carrier-facing notifications. Implementations must not fail the caller.
#[async_trait]
pub trait AssignmentNotifier: Send + Sync {
    /// A shipment was offered to `assignment.carrier_id`.
    async fn assignment_offered(&self, assignment: &Assignment);

    /// The offer expires in `remaining`.
    async fn expiry_warning(&self, assignment: &Assignment, remaining: Duration);
}

/// An assignment chain handed to a human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escalation {
    /// Last assignment of the chain.
    pub assignment_id: String,
    pub shipment_id: String,
    pub reason: EscalationReason,
    /// Every carrier tried, oldest first.
    pub tried_carriers: Vec<String>,
    pub escalated_at: DateTime<Utc>,
}

/// Administrative path for chains automatic reassignment could not resolve.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    async fn escalate(&self, escalation: &Escalation);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl AssignmentNotifier for TracingNotifier {
    async fn assignment_offered(&self, assignment: &Assignment) {
        info!(
            assignment_id = %assignment.id,
            shipment_id = %assignment.shipment_id,
            carrier_id = %assignment.carrier_id,
            expires_at = %assignment.expires_at,
            "Shipment offered to carrier"
        );
    }

    async fn expiry_warning(&self, assignment: &Assignment, remaining: Duration) {
        info!(
            assignment_id = %assignment.id,
            carrier_id = %assignment.carrier_id,
            remaining_minutes = remaining.num_minutes(),
            "Assignment expiring soon"
        );
    }
}

/// Escalation handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEscalation;

#[async_trait]
impl EscalationHandler for TracingEscalation {
    async fn escalate(&self, escalation: &Escalation) {
        warn!(
            assignment_id = %escalation.assignment_id,
            shipment_id = %escalation.shipment_id,
            reason = escalation.reason.as_str(),
            tried = escalation.tried_carriers.len(),
            "Assignment escalated for manual handling"
        );
    }
}

/// Ranking over a fixed, ordered carrier list.
#[derive(Debug, Clone, Default)]
pub struct StaticCarrierRanking {
    carriers: Vec<String>,
}

impl StaticCarrierRanking {
    /// Creates a ranking from carriers in preference order.
    pub fn new(carriers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            carriers: carriers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CarrierRanking for StaticCarrierRanking {
    async fn next_best_carrier(&self, _shipment_id: &str, exclude: &[String]) -> Option<String> {
        self.carriers.iter().find(|c| !exclude.contains(c)).cloned()
    }
}
