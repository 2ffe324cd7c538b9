//! Assignment state machine.
//!
//! `pending` moves to `accepted`, `declined` or `expired`; the latter two hand
//! the shipment to the next carrier until the chain is accepted or escalated.
//! Every transition is a compare-and-swap on the stored status, so a late
//! timer and a near-simultaneous accept cannot both win.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use freightline_events::{
    AssignmentEscalated, AssignmentNotice, Clock, Event, EventBus, EventPayload, SystemClock,
};

use crate::assignment::{Assignment, AssignmentStatus, EscalationReason, NewAssignment};
use crate::collaborators::{
    AssignmentNotifier, CarrierRanking, Escalation, EscalationHandler, TracingEscalation,
    TracingNotifier,
};
use crate::error::{AssignmentError, AssignmentResult};
use crate::storage::AssignmentStore;
use crate::timer::TimerRegistry;

/// Assignment engine configuration.
#[derive(Debug, Clone)]
pub struct AssignmentConfig {
    /// How long a carrier has to respond.
    pub timeout: Duration,
    /// Time-before-expiry at which the carrier is nudged.
    pub warning_offsets: Vec<Duration>,
    /// Maximum reassignments per shipment before escalation.
    pub max_reassignments: u32,
    /// Whether new assignments reassign automatically unless told otherwise.
    pub auto_reassign_default: bool,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(7 * 60 * 60),
            warning_offsets: vec![Duration::from_secs(60 * 60), Duration::from_secs(30 * 60)],
            max_reassignments: 3,
            auto_reassign_default: true,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AssignmentConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the warning offsets.
    pub fn warning_offsets(mut self, offsets: impl IntoIterator<Item = Duration>) -> Self {
        self.warning_offsets = offsets.into_iter().collect();
        self
    }

    /// Sets the reassignment bound.
    pub fn max_reassignments(mut self, max: u32) -> Self {
        self.max_reassignments = max;
        self
    }

    /// Sets the default auto-reassign flag.
    pub fn auto_reassign_default(mut self, enabled: bool) -> Self {
        self.auto_reassign_default = enabled;
        self
    }

    /// Sets the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// What happened to a shipment after an offer was declined or expired.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ReassignmentOutcome {
    /// Offered to the next carrier.
    Reassigned(Assignment),
    /// Handed to a human; no new assignment was created.
    Escalated(Escalation),
}

/// A closed offer and what followed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handoff {
    pub previous: Assignment,
    pub next: ReassignmentOutcome,
}

/// Owns the assignment lifecycle and one countdown per live assignment.
pub struct AssignmentManager {
    store: Arc<dyn AssignmentStore>,
    ranking: Arc<dyn CarrierRanking>,
    notifier: Arc<dyn AssignmentNotifier>,
    escalation: Arc<dyn EscalationHandler>,
    bus: Option<Arc<EventBus>>,
    clock: Arc<dyn Clock>,
    config: AssignmentConfig,
    timers: TimerRegistry,
    this: Weak<AssignmentManager>,
}

/// Builder for [`AssignmentManager`].
pub struct AssignmentManagerBuilder {
    store: Arc<dyn AssignmentStore>,
    ranking: Arc<dyn CarrierRanking>,
    notifier: Arc<dyn AssignmentNotifier>,
    escalation: Arc<dyn EscalationHandler>,
    bus: Option<Arc<EventBus>>,
    clock: Arc<dyn Clock>,
    config: AssignmentConfig,
}

impl AssignmentManagerBuilder {
    /// Sets the carrier notifier.
    pub fn notifier(mut self, notifier: Arc<dyn AssignmentNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the escalation handler.
    pub fn escalation(mut self, escalation: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = escalation;
        self
    }

    /// Publishes lifecycle events on `bus`.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: AssignmentConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the manager.
    pub fn build(self) -> Arc<AssignmentManager> {
        Arc::new_cyclic(|this| AssignmentManager {
            store: self.store,
            ranking: self.ranking,
            notifier: self.notifier,
            escalation: self.escalation,
            bus: self.bus,
            clock: self.clock,
            config: self.config,
            timers: TimerRegistry::new(),
            this: this.clone(),
        })
    }
}

impl AssignmentManager {
    /// Starts building a manager over `store` and `ranking`.
    pub fn builder(
        store: Arc<dyn AssignmentStore>,
        ranking: Arc<dyn CarrierRanking>,
    ) -> AssignmentManagerBuilder {
        AssignmentManagerBuilder {
            store,
            ranking,
            notifier: Arc::new(TracingNotifier),
            escalation: Arc::new(TracingEscalation),
            bus: None,
            clock: Arc::new(SystemClock),
            config: AssignmentConfig::default(),
        }
    }

    /// Offers a shipment to a carrier and starts its countdown.
    ///
    /// Rejected while the shipment is pending, accepted or completed. After an
    /// escalation the new offer continues the existing chain and may not go to
    /// a carrier that was already tried.
    pub async fn create_assignment(&self, request: NewAssignment) -> AssignmentResult<Assignment> {
        request.validate().map_err(AssignmentError::InvalidInput)?;

        let chain = self.store.list_for_shipment(&request.shipment_id).await?;
        if let Some(holder) = chain.iter().find(|a| a.status.holds_shipment()) {
            return Err(AssignmentError::Conflict(format!(
                "shipment {} already has {} assignment {}",
                holder.shipment_id, holder.status, holder.id
            )));
        }

        let now = self.clock.now();
        let auto_reassign = self.config.auto_reassign_default;
        let assignment = match chain.last() {
            Some(last) if last.tried_carriers().contains(&request.carrier_id) => {
                return Err(AssignmentError::Conflict(format!(
                    "carrier {} was already tried for shipment {}",
                    request.carrier_id, request.shipment_id
                )));
            }
            Some(last) => Assignment::resume(last, request, now, self.timeout(), auto_reassign),
            None => Assignment::new(request, now, self.timeout(), auto_reassign),
        };
        // The store re-checks the shipment atomically on insert.
        self.open(assignment).await
    }

    /// Accepts an offer on behalf of its carrier.
    pub async fn accept(&self, id: &str, carrier_id: &str) -> AssignmentResult<Assignment> {
        let assignment = self.pending_for_carrier(id, carrier_id).await?;
        let now = self.clock.now();

        let mut accepted = assignment;
        accepted.status = AssignmentStatus::Accepted;
        accepted.responded_at = Some(now);
        self.store
            .transition(&accepted, AssignmentStatus::Pending)
            .await?;
        self.timers.cancel(id).await;

        info!(
            assignment_id = %id,
            shipment_id = %accepted.shipment_id,
            carrier_id = %carrier_id,
            "Assignment accepted"
        );
        self.publish(EventPayload::AssignmentAccepted(notice(&accepted, None)))
            .await;
        Ok(accepted)
    }

    /// Declines an offer and immediately hands the shipment on.
    pub async fn decline(
        &self,
        id: &str,
        carrier_id: &str,
        reason: Option<String>,
    ) -> AssignmentResult<Handoff> {
        let assignment = self.pending_for_carrier(id, carrier_id).await?;
        let now = self.clock.now();

        let mut declined = assignment;
        declined.status = AssignmentStatus::Declined;
        declined.responded_at = Some(now);
        declined.decline_reason = reason.clone();
        self.store
            .transition(&declined, AssignmentStatus::Pending)
            .await?;
        self.timers.cancel(id).await;

        info!(
            assignment_id = %id,
            shipment_id = %declined.shipment_id,
            carrier_id = %carrier_id,
            reason = reason.as_deref().unwrap_or_default(),
            "Assignment declined"
        );
        self.publish(EventPayload::AssignmentDeclined(notice(&declined, reason)))
            .await;

        let next = self.hand_on(&declined).await;
        Ok(Handoff {
            previous: declined,
            next,
        })
    }

    /// Expires a pending offer and hands the shipment on.
    ///
    /// Called by the countdown timer and the expiry sweep.
    pub async fn on_expiry(&self, id: &str) -> AssignmentResult<Handoff> {
        let assignment = self.get(id).await?;
        if !assignment.is_pending() {
            return Err(AssignmentError::NotPending {
                status: assignment.status,
            });
        }

        let mut expired = assignment;
        expired.status = AssignmentStatus::Expired;
        self.store
            .transition(&expired, AssignmentStatus::Pending)
            .await?;
        self.timers.cancel(id).await;

        info!(
            assignment_id = %id,
            shipment_id = %expired.shipment_id,
            carrier_id = %expired.carrier_id,
            "Assignment expired"
        );
        self.publish(EventPayload::AssignmentExpired(notice(&expired, None)))
            .await;

        let next = self.hand_on(&expired).await;
        Ok(Handoff {
            previous: expired,
            next,
        })
    }

    /// Offers the shipment of a closed assignment to the next carrier, or escalates.
    pub async fn reassign(&self, previous: &Assignment) -> AssignmentResult<ReassignmentOutcome> {
        if !previous.auto_reassign {
            return Ok(self
                .escalate(previous, EscalationReason::AutoReassignDisabled)
                .await);
        }
        if previous.reassignment_count >= self.config.max_reassignments {
            return Ok(self
                .escalate(previous, EscalationReason::ReassignmentBudgetExhausted)
                .await);
        }

        let tried = previous.tried_carriers();
        let carrier_id = match self
            .ranking
            .next_best_carrier(&previous.shipment_id, &tried)
            .await
        {
            Some(carrier_id) if !tried.contains(&carrier_id) => carrier_id,
            Some(carrier_id) => {
                warn!(
                    shipment_id = %previous.shipment_id,
                    carrier_id = %carrier_id,
                    "Ranking returned an already tried carrier"
                );
                return Ok(self
                    .escalate(previous, EscalationReason::NoEligibleCarrier)
                    .await);
            }
            None => {
                return Ok(self
                    .escalate(previous, EscalationReason::NoEligibleCarrier)
                    .await);
            }
        };

        let next = previous.successor(carrier_id, self.clock.now(), self.timeout());
        let next = self.open(next).await?;
        Ok(ReassignmentOutcome::Reassigned(next))
    }

    /// Reassigns a closed offer, escalating when the next offer cannot be opened.
    async fn hand_on(&self, previous: &Assignment) -> ReassignmentOutcome {
        let error = match self.reassign(previous).await {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };

        // A concurrent create may already have opened the next offer.
        match self.store.list_for_shipment(&previous.shipment_id).await {
            Ok(chain) => {
                if let Some(live) = chain.into_iter().find(|a| a.is_pending()) {
                    return ReassignmentOutcome::Reassigned(live);
                }
            }
            Err(e) => warn!(shipment_id = %previous.shipment_id, "Failed to reload chain: {}", e),
        }

        error!(
            assignment_id = %previous.id,
            shipment_id = %previous.shipment_id,
            "Reassignment failed: {}",
            error
        );
        self.escalate(previous, EscalationReason::ReassignmentFailed)
            .await
    }

    /// Marks an accepted assignment as completed.
    pub async fn complete(&self, id: &str) -> AssignmentResult<Assignment> {
        let assignment = self.get(id).await?;
        if assignment.status != AssignmentStatus::Accepted {
            return Err(AssignmentError::NotAccepted {
                status: assignment.status,
            });
        }

        let mut completed = assignment;
        completed.status = AssignmentStatus::Completed;
        completed.completed_at = Some(self.clock.now());
        self.store
            .transition(&completed, AssignmentStatus::Accepted)
            .await?;

        info!(assignment_id = %id, shipment_id = %completed.shipment_id, "Assignment completed");
        Ok(completed)
    }

    /// Re-arms countdowns for every pending assignment, expiring overdue ones.
    ///
    /// Returns the number of timers armed.
    pub async fn restore_timers(&self) -> AssignmentResult<usize> {
        let now = self.clock.now();
        let mut armed = 0;

        for assignment in self.store.list_pending().await? {
            if assignment.is_expired_at(now) {
                self.expire_quietly(&assignment.id).await;
            } else {
                self.arm_timer(&assignment).await;
                armed += 1;
            }
        }

        info!(armed, "Assignment timers restored");
        Ok(armed)
    }

    /// Expires every pending assignment whose deadline has passed.
    pub async fn sweep_expired(&self) -> AssignmentResult<Vec<Handoff>> {
        let now = self.clock.now();
        let overdue: Vec<Assignment> = self
            .store
            .list_pending()
            .await?
            .into_iter()
            .filter(|a| a.is_expired_at(now))
            .collect();

        let mut handoffs = Vec::with_capacity(overdue.len());
        for assignment in overdue {
            match self.on_expiry(&assignment.id).await {
                Ok(handoff) => handoffs.push(handoff),
                Err(AssignmentError::NotPending { .. }) => {}
                Err(e) => error!(assignment_id = %assignment.id, "Expiry sweep error: {}", e),
            }
        }

        if !handoffs.is_empty() {
            info!(expired = handoffs.len(), "Expiry sweep finished");
        }
        Ok(handoffs)
    }

    /// Spawns the periodic expiry sweep. Abort the handle to stop it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.sweep_expired().await {
                    error!("Assignment sweep error: {}", e);
                }
            }
        })
    }

    /// Gets an assignment by ID.
    pub async fn get(&self, id: &str) -> AssignmentResult<Assignment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AssignmentError::NotFound(id.to_string()))
    }

    /// Every assignment of a shipment, oldest first.
    pub async fn chain_for_shipment(&self, shipment_id: &str) -> AssignmentResult<Vec<Assignment>> {
        self.store.list_for_shipment(shipment_id).await
    }

    /// The most recent assignment of a shipment.
    pub async fn live_for_shipment(&self, shipment_id: &str) -> AssignmentResult<Option<Assignment>> {
        Ok(self.store.list_for_shipment(shipment_id).await?.pop())
    }

    /// Number of running countdowns.
    pub async fn armed_timers(&self) -> usize {
        self.timers.armed_count().await
    }

    /// Stops every countdown. Pending assignments stay pending.
    pub async fn shutdown(&self) {
        self.timers.cancel_all().await;
    }

    /// Gets the configuration.
    pub fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    async fn open(&self, assignment: Assignment) -> AssignmentResult<Assignment> {
        self.store.insert(&assignment).await?;
        self.arm_timer(&assignment).await;
        self.notifier.assignment_offered(&assignment).await;

        info!(
            assignment_id = %assignment.id,
            shipment_id = %assignment.shipment_id,
            carrier_id = %assignment.carrier_id,
            reassignment_count = assignment.reassignment_count,
            "Assignment created"
        );
        self.publish(EventPayload::AssignmentCreated(notice(&assignment, None)))
            .await;
        Ok(assignment)
    }

    /// Loads an assignment and checks it can still be answered by `carrier_id`.
    async fn pending_for_carrier(&self, id: &str, carrier_id: &str) -> AssignmentResult<Assignment> {
        let assignment = self.get(id).await?;
        if assignment.carrier_id != carrier_id {
            return Err(AssignmentError::NotAssignedCarrier {
                assignment_id: id.to_string(),
                carrier_id: carrier_id.to_string(),
            });
        }
        if !assignment.is_pending() {
            return Err(AssignmentError::NotPending {
                status: assignment.status,
            });
        }
        if assignment.is_expired_at(self.clock.now()) {
            // The timer has not fired yet; the wall clock wins.
            self.expire_quietly(id).await;
            return Err(AssignmentError::Expired);
        }
        Ok(assignment)
    }

    async fn escalate(
        &self,
        previous: &Assignment,
        reason: EscalationReason,
    ) -> ReassignmentOutcome {
        let escalation = Escalation {
            assignment_id: previous.id.clone(),
            shipment_id: previous.shipment_id.clone(),
            reason,
            tried_carriers: previous.tried_carriers(),
            escalated_at: self.clock.now(),
        };

        let mut marked = previous.clone();
        marked.escalation = Some(reason);
        if let Err(e) = self.store.transition(&marked, previous.status).await {
            warn!(assignment_id = %previous.id, "Could not record escalation: {}", e);
        }

        self.escalation.escalate(&escalation).await;
        self.publish(EventPayload::AssignmentEscalated(AssignmentEscalated {
            assignment_id: escalation.assignment_id.clone(),
            shipment_id: escalation.shipment_id.clone(),
            reason: reason.as_str().to_string(),
            tried_carriers: escalation.tried_carriers.clone(),
        }))
        .await;
        ReassignmentOutcome::Escalated(escalation)
    }

    async fn expire_quietly(&self, id: &str) {
        match self.on_expiry(id).await {
            Ok(_) | Err(AssignmentError::NotPending { .. }) => {}
            Err(e) => error!(assignment_id = %id, "Failed to expire assignment: {}", e),
        }
    }

    async fn send_warning(&self, id: &str) {
        let assignment = match self.store.get(id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return,
            Err(e) => {
                error!(assignment_id = %id, "Failed to load assignment for warning: {}", e);
                return;
            }
        };
        let now = self.clock.now();
        if assignment.is_pending() && !assignment.is_expired_at(now) {
            self.notifier
                .expiry_warning(&assignment, assignment.remaining(now))
                .await;
        }
    }

    async fn arm_timer(&self, assignment: &Assignment) {
        let id = assignment.id.clone();
        let expires_at = assignment.expires_at;
        let clock = self.clock.clone();
        let manager = self.this.clone();

        let mut warn_at: Vec<DateTime<Utc>> = self
            .config
            .warning_offsets
            .iter()
            .map(|offset| expires_at - to_chrono(*offset))
            .filter(|at| *at > clock.now())
            .collect();
        warn_at.sort();

        let timer_id = id.clone();
        self.timers
            .arm(id, async move {
                for at in warn_at {
                    sleep_until(clock.as_ref(), at).await;
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    manager.send_warning(&timer_id).await;
                }

                sleep_until(clock.as_ref(), expires_at).await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                debug!(assignment_id = %timer_id, "Assignment countdown fired");
                manager.expire_in_background(timer_id);
            })
            .await;
    }

    /// Runs the expiry outside the timer task so cancelling the timer cannot cut it short.
    fn expire_in_background(self: Arc<Self>, id: String) {
        let task: Pin<Box<dyn Future<Output = ()> + Send>> =
            Box::pin(async move { self.expire_quietly(&id).await });
        tokio::spawn(task);
    }

    async fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.bus {
            bus.emit(Event::at(payload, self.clock.now())).await;
        }
    }

    fn timeout(&self) -> chrono::Duration {
        to_chrono(self.config.timeout)
    }
}

fn notice(assignment: &Assignment, reason: Option<String>) -> AssignmentNotice {
    AssignmentNotice {
        assignment_id: assignment.id.clone(),
        shipment_id: assignment.shipment_id.clone(),
        carrier_id: assignment.carrier_id.clone(),
        reassignment_count: assignment.reassignment_count,
        expires_at: Some(assignment.expires_at),
        reason,
    }
}

async fn sleep_until(clock: &dyn Clock, at: DateTime<Utc>) {
    let delay = (at - clock.now()).to_std().unwrap_or_default();
    tokio::time::sleep(delay).await;
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
