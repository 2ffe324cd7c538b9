//! Assignment persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::assignment::{Assignment, AssignmentStatus};
use crate::error::{AssignmentError, AssignmentResult};

/// Persistence consumed by the assignment manager.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Inserts a new assignment unless its shipment is already held.
    ///
    /// A shipment is held while any of its records is pending, accepted or
    /// completed; the check and the insert must be atomic. Fails with
    /// [`AssignmentError::Conflict`] otherwise.
    async fn insert(&self, assignment: &Assignment) -> AssignmentResult<()>;

    /// Gets an assignment by ID.
    async fn get(&self, id: &str) -> AssignmentResult<Option<Assignment>>;

    /// Replaces the stored record if its status is still `expected`.
    ///
    /// Returns [`AssignmentError::NotPending`] (or `NotAccepted`) carrying the
    /// current status when another writer got there first.
    async fn transition(
        &self,
        assignment: &Assignment,
        expected: AssignmentStatus,
    ) -> AssignmentResult<()>;

    /// All assignments of a shipment in creation order.
    async fn list_for_shipment(&self, shipment_id: &str) -> AssignmentResult<Vec<Assignment>>;

    /// All assignments still in `pending`.
    async fn list_pending(&self) -> AssignmentResult<Vec<Assignment>>;
}

#[derive(Default)]
struct Records {
    /// Record and its insertion sequence number.
    by_id: HashMap<String, (u64, Assignment)>,
    next_seq: u64,
}

/// In-memory assignment storage.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    records: RwLock<Records>,
}

impl InMemoryAssignmentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assignments.
    pub async fn len(&self) -> usize {
        self.records.read().await.by_id.len()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn insert(&self, assignment: &Assignment) -> AssignmentResult<()> {
        let mut records = self.records.write().await;
        if records.by_id.contains_key(&assignment.id) {
            return Err(AssignmentError::Conflict(format!(
                "assignment {} already exists",
                assignment.id
            )));
        }
        if let Some((_, holder)) = records
            .by_id
            .values()
            .find(|(_, a)| a.shipment_id == assignment.shipment_id && a.status.holds_shipment())
        {
            return Err(AssignmentError::Conflict(format!(
                "shipment {} is held by {} assignment {}",
                holder.shipment_id, holder.status, holder.id
            )));
        }

        let seq = records.next_seq;
        records.next_seq += 1;
        records
            .by_id
            .insert(assignment.id.clone(), (seq, assignment.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> AssignmentResult<Option<Assignment>> {
        Ok(self.records.read().await.by_id.get(id).map(|(_, a)| a.clone()))
    }

    async fn transition(
        &self,
        assignment: &Assignment,
        expected: AssignmentStatus,
    ) -> AssignmentResult<()> {
        let mut records = self.records.write().await;
        let (_, stored) = records
            .by_id
            .get_mut(&assignment.id)
            .ok_or_else(|| AssignmentError::NotFound(assignment.id.clone()))?;

        if stored.status != expected {
            return Err(match expected {
                AssignmentStatus::Accepted => AssignmentError::NotAccepted {
                    status: stored.status,
                },
                _ => AssignmentError::NotPending {
                    status: stored.status,
                },
            });
        }
        *stored = assignment.clone();
        Ok(())
    }

    async fn list_for_shipment(&self, shipment_id: &str) -> AssignmentResult<Vec<Assignment>> {
        let records = self.records.read().await;
        let mut chain: Vec<&(u64, Assignment)> = records
            .by_id
            .values()
            .filter(|(_, a)| a.shipment_id == shipment_id)
            .collect();
        chain.sort_by_key(|(seq, a)| (a.assigned_at, a.reassignment_count, *seq));
        Ok(chain.into_iter().map(|(_, a)| a.clone()).collect())
    }

    async fn list_pending(&self) -> AssignmentResult<Vec<Assignment>> {
        let records = self.records.read().await;
        Ok(records
            .by_id
            .values()
            .filter(|(_, a)| a.is_pending())
            .map(|(_, a)| a.clone())
            .collect())
    }
}
