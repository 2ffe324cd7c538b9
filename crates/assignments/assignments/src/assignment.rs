//! Assignment records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one carrier offer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Declined => "declined",
            AssignmentStatus::Expired => "expired",
            AssignmentStatus::Completed => "completed",
        }
    }

    /// Whether a record in this state still owns its shipment.
    pub fn holds_shipment(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Pending | AssignmentStatus::Accepted | AssignmentStatus::Completed
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority tier of a shipment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Why an assignment chain was handed to a human.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Ranking found no carrier outside the exclusion list.
    NoEligibleCarrier,
    /// The chain reached the reassignment bound.
    ReassignmentBudgetExhausted,
    /// The assignment opted out of automatic reassignment.
    AutoReassignDisabled,
    /// Opening the next offer failed.
    ReassignmentFailed,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::NoEligibleCarrier => "no_eligible_carrier",
            EscalationReason::ReassignmentBudgetExhausted => "reassignment_budget_exhausted",
            EscalationReason::AutoReassignDisabled => "auto_reassign_disabled",
            EscalationReason::ReassignmentFailed => "reassignment_failed",
        }
    }
}

/// A time-boxed offer of a shipment to one carrier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub shipment_id: String,
    /// Carrier the shipment is offered to.
    pub carrier_id: String,
    pub status: AssignmentStatus,
    pub priority: Priority,
    pub assigned_at: DateTime<Utc>,
    /// Authoritative deadline, compared against the wall clock.
    pub expires_at: DateTime<Utc>,
    /// When the carrier accepted or declined.
    pub responded_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Position in the shipment's chain; 0 for the first offer.
    pub reassignment_count: u32,
    /// Carriers already tried for this shipment, oldest first.
    pub previous_carriers: Vec<String>,
    /// Assignment this one replaced.
    pub previous_assignment_id: Option<String>,
    pub auto_reassign: bool,
    pub decline_reason: Option<String>,
    /// Set on the last record of a chain that was escalated.
    pub escalation: Option<EscalationReason>,
}

impl Assignment {
    /// Creates the first offer of a shipment.
    pub fn new(request: NewAssignment, now: DateTime<Utc>, timeout: Duration, auto_reassign: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            shipment_id: request.shipment_id,
            carrier_id: request.carrier_id,
            status: AssignmentStatus::Pending,
            priority: request.priority,
            assigned_at: now,
            expires_at: now + timeout,
            responded_at: None,
            completed_at: None,
            reassignment_count: 0,
            previous_carriers: Vec::new(),
            previous_assignment_id: None,
            auto_reassign: request.auto_reassign.unwrap_or(auto_reassign),
            decline_reason: None,
            escalation: None,
        }
    }

    /// Creates the follow-up offer to `carrier_id`.
    pub fn successor(&self, carrier_id: impl Into<String>, now: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            shipment_id: self.shipment_id.clone(),
            carrier_id: carrier_id.into(),
            status: AssignmentStatus::Pending,
            priority: self.priority,
            assigned_at: now,
            expires_at: now + timeout,
            responded_at: None,
            completed_at: None,
            reassignment_count: self.reassignment_count + 1,
            previous_carriers: self.tried_carriers(),
            previous_assignment_id: Some(self.id.clone()),
            auto_reassign: self.auto_reassign,
            decline_reason: None,
            escalation: None,
        }
    }

    /// Continues an escalated chain with a manually chosen carrier.
    ///
    /// The exclusion list and reassignment count carry over; the count is not
    /// incremented since no automatic reassignment happened.
    pub fn resume(
        last: &Assignment,
        request: NewAssignment,
        now: DateTime<Utc>,
        timeout: Duration,
        auto_reassign: bool,
    ) -> Self {
        Self {
            reassignment_count: last.reassignment_count,
            previous_carriers: last.tried_carriers(),
            previous_assignment_id: Some(last.id.clone()),
            ..Self::new(request, now, timeout, auto_reassign)
        }
    }

    /// Every carrier tried in the chain so far, including the current one.
    pub fn tried_carriers(&self) -> Vec<String> {
        let mut tried = self.previous_carriers.clone();
        if !tried.contains(&self.carrier_id) {
            tried.push(self.carrier_id.clone());
        }
        tried
    }

    /// Checks if the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_pending(&self) -> bool {
        self.status == AssignmentStatus::Pending
    }

    /// Time left before expiry, zero once passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Request to offer a shipment to a carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignment {
    pub shipment_id: String,
    pub carrier_id: String,
    #[serde(default)]
    pub priority: Priority,
    /// Overrides the configured default.
    #[serde(default)]
    pub auto_reassign: Option<bool>,
}

impl NewAssignment {
    pub fn new(shipment_id: impl Into<String>, carrier_id: impl Into<String>) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            carrier_id: carrier_id.into(),
            priority: Priority::default(),
            auto_reassign: None,
        }
    }

    /// Sets the priority tier.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Enables or disables automatic reassignment.
    pub fn auto_reassign(mut self, enabled: bool) -> Self {
        self.auto_reassign = Some(enabled);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.shipment_id.trim().is_empty() {
            return Err("shipment_id is required".into());
        }
        if self.carrier_id.trim().is_empty() {
            return Err("carrier_id is required".into());
        }
        Ok(())
    }
}
