//! # Freightline Assignments
//!
//! Time-boxed offers of shipments to carriers:
//! - A countdown per live assignment with expiry warnings
//! - Accept / decline / expire transitions guarded by compare-and-swap
//! - Automatic reassignment to the next-best carrier, bounded, then escalation
//! - Timer restoration and an expiry sweep so restarts lose nothing
//!
//! ## Example
//!
//! ```rust,ignore
//! use freightline_assignments::{
//!     AssignmentManager, InMemoryAssignmentStore, NewAssignment, StaticCarrierRanking,
//! };
//!
//! let manager = AssignmentManager::builder(
//!     Arc::new(InMemoryAssignmentStore::new()),
//!     Arc::new(StaticCarrierRanking::new(["car_a", "car_b"])),
//! )
//! .event_bus(bus.clone())
//! .build();
//!
//! let offer = manager.create_assignment(NewAssignment::new("shp_1", "car_a")).await?;
//! manager.accept(&offer.id, "car_a").await?;
//! ```

mod assignment;
mod collaborators;
mod error;
mod manager;
mod storage;
mod timer;

pub use assignment::{Assignment, AssignmentStatus, EscalationReason, NewAssignment, Priority};
pub use collaborators::{
    AssignmentNotifier, CarrierRanking, Escalation, EscalationHandler, StaticCarrierRanking,
    TracingEscalation, TracingNotifier,
};
pub use error::{AssignmentError, AssignmentResult};
pub use manager::{
    AssignmentConfig, AssignmentManager, AssignmentManagerBuilder, Handoff, ReassignmentOutcome,
};
pub use storage::{AssignmentStore, InMemoryAssignmentStore};
pub use timer::TimerRegistry;
