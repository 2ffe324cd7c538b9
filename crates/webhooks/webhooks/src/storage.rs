//! Storage traits for subscriptions and delivery records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{WebhookError, WebhookResult};
use crate::record::{DeliveryStatus, WebhookEvent};
use crate::subscription::{Subscription, SubscriptionUpdate};

/// Subscription persistence consumed by the delivery engine.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persists a newly built subscription.
    async fn create(&self, subscription: &Subscription) -> WebhookResult<Subscription>;

    /// Gets a subscription by ID.
    async fn get(&self, id: &str) -> WebhookResult<Option<Subscription>>;

    /// Lists all subscriptions of an owner, active or not.
    async fn list_for_owner(&self, owner_id: &str) -> WebhookResult<Vec<Subscription>>;

    /// Lists active subscriptions whose event set contains `event_type`,
    /// optionally restricted to one owner.
    async fn list_active_for_event(
        &self,
        event_type: &str,
        owner_id: Option<&str>,
    ) -> WebhookResult<Vec<Subscription>>;

    /// Applies a partial update.
    async fn update(
        &self,
        id: &str,
        update: SubscriptionUpdate,
        now: DateTime<Utc>,
    ) -> WebhookResult<Subscription>;

    /// Atomically increments the consecutive-failure counter, returning the new value.
    async fn increment_failure_count(&self, id: &str) -> WebhookResult<u32>;

    /// Resets the consecutive-failure counter after a successful delivery.
    async fn reset_failure_count(&self, id: &str, success_at: DateTime<Utc>) -> WebhookResult<()>;

    /// Marks the subscription inactive.
    async fn deactivate(&self, id: &str, reason: &str, now: DateTime<Utc>) -> WebhookResult<()>;
}

/// Delivery record persistence with conditional updates.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Inserts a new delivery record.
    async fn insert_event(&self, event: &WebhookEvent) -> WebhookResult<()>;

    /// Gets a delivery record by ID.
    async fn get_event(&self, id: &str) -> WebhookResult<Option<WebhookEvent>>;

    /// Claims a due record for one attempt.
    ///
    /// Succeeds only if the record is non-terminal and due at `now`; on
    /// success its due time moves to `lease_until` so no other worker can
    /// claim it until the lease lapses. Returns `None` if the claim lost.
    async fn claim_event(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> WebhookResult<Option<WebhookEvent>>;

    /// Replaces a record if its stored attempt count still equals
    /// `expected_attempts` and it is not terminal.
    ///
    /// Returns [`WebhookError::Conflict`] otherwise.
    async fn update_event_if(
        &self,
        event: &WebhookEvent,
        expected_attempts: u32,
    ) -> WebhookResult<()>;

    /// Lists non-terminal records due at `now`, oldest first.
    async fn due_events(&self, now: DateTime<Utc>, limit: usize) -> WebhookResult<Vec<WebhookEvent>>;

    /// Lists a subscription's records, newest first.
    async fn events_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
    ) -> WebhookResult<Vec<WebhookEvent>>;

    /// Lists a subscription's records created at or after `since`.
    async fn events_since(
        &self,
        subscription_id: &str,
        since: DateTime<Utc>,
    ) -> WebhookResult<Vec<WebhookEvent>>;

    /// Deletes records created before `cutoff`, returning how many were removed.
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> WebhookResult<usize>;
}

/// Combined storage used by the webhook system.
pub trait WebhookStorage: SubscriptionStore + DeliveryStore {}

impl<T: SubscriptionStore + DeliveryStore> WebhookStorage for T {}

/// In-memory webhook storage.
///
/// Every read-modify-write happens under a single write lock, which gives
/// the same atomicity a document store's conditional update would.
pub struct InMemoryWebhookStorage {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    events: RwLock<HashMap<String, WebhookEvent>>,
}

impl InMemoryWebhookStorage {
    /// Creates a new in-memory storage.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of stored delivery records.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

impl Default for InMemoryWebhookStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryWebhookStorage {
    async fn create(&self, subscription: &Subscription) -> WebhookResult<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(WebhookError::StorageError(format!(
                "duplicate subscription id {}",
                subscription.id
            )));
        }
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        Ok(subscription.clone())
    }

    async fn get(&self, id: &str) -> WebhookResult<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(id).cloned())
    }

    async fn list_for_owner(&self, owner_id: &str) -> WebhookResult<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut owned: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.created_at);
        Ok(owned)
    }

    async fn list_active_for_event(
        &self,
        event_type: &str,
        owner_id: Option<&str>,
    ) -> WebhookResult<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut matching: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| s.listens_for(event_type))
            .filter(|s| owner_id.is_none_or(|owner| s.owner_id == owner))
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }

    async fn update(
        &self,
        id: &str,
        update: SubscriptionUpdate,
        now: DateTime<Utc>,
    ) -> WebhookResult<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;
        subscription.apply(update, now)?;
        Ok(subscription.clone())
    }

    async fn increment_failure_count(&self, id: &str) -> WebhookResult<u32> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;
        subscription.consecutive_failures += 1;
        Ok(subscription.consecutive_failures)
    }

    async fn reset_failure_count(&self, id: &str, success_at: DateTime<Utc>) -> WebhookResult<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;
        subscription.consecutive_failures = 0;
        subscription.last_success_at = Some(success_at);
        Ok(())
    }

    async fn deactivate(&self, id: &str, reason: &str, now: DateTime<Utc>) -> WebhookResult<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;
        subscription.active = false;
        subscription.deactivated_reason = Some(reason.to_string());
        subscription.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryWebhookStorage {
    async fn insert_event(&self, event: &WebhookEvent) -> WebhookResult<()> {
        let mut events = self.events.write().await;
        events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> WebhookResult<Option<WebhookEvent>> {
        let events = self.events.read().await;
        Ok(events.get(id).cloned())
    }

    async fn claim_event(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> WebhookResult<Option<WebhookEvent>> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(id)
            .ok_or_else(|| WebhookError::EventNotFound(id.to_string()))?;

        if !event.is_due(now) {
            return Ok(None);
        }
        event.next_retry_at = Some(lease_until);
        Ok(Some(event.clone()))
    }

    async fn update_event_if(
        &self,
        event: &WebhookEvent,
        expected_attempts: u32,
    ) -> WebhookResult<()> {
        let mut events = self.events.write().await;
        let stored = events
            .get_mut(&event.id)
            .ok_or_else(|| WebhookError::EventNotFound(event.id.clone()))?;

        if stored.status.is_terminal() || stored.attempts != expected_attempts {
            return Err(WebhookError::Conflict(event.id.clone()));
        }
        *stored = event.clone();
        Ok(())
    }

    async fn due_events(&self, now: DateTime<Utc>, limit: usize) -> WebhookResult<Vec<WebhookEvent>> {
        let events = self.events.read().await;
        let mut due: Vec<WebhookEvent> = events
            .values()
            .filter(|e| matches!(e.status, DeliveryStatus::Pending | DeliveryStatus::Retrying))
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_retry_at.unwrap_or(e.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn events_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
    ) -> WebhookResult<Vec<WebhookEvent>> {
        let events = self.events.read().await;
        let mut matching: Vec<WebhookEvent> = events
            .values()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn events_since(
        &self,
        subscription_id: &str,
        since: DateTime<Utc>,
    ) -> WebhookResult<Vec<WebhookEvent>> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| e.subscription_id == subscription_id && e.created_at >= since)
            .cloned()
            .collect())
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> WebhookResult<usize> {
        let mut events = self.events.write().await;
        let before_len = events.len();
        events.retain(|_, e| e.created_at >= cutoff);
        Ok(before_len - events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::NewSubscription;
    use chrono::Duration;
    use freightline_events::Event;

    fn subscription(owner: &str, events: &[&str]) -> Subscription {
        Subscription::from_request(
            NewSubscription::new(owner, "https://example.com/hook", events.iter().copied()),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_active_for_event_filters() {
        let store = InMemoryWebhookStorage::new();
        let a = store.create(&subscription("o1", &["shipment.created"])).await.unwrap();
        let b = store.create(&subscription("o2", &["shipment.created"])).await.unwrap();
        store.create(&subscription("o1", &["payment.settled"])).await.unwrap();
        store.deactivate(&b.id, "test", Utc::now()).await.unwrap();

        let matching = store.list_active_for_event("shipment.created", None).await.unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].id, a.id);

        let scoped = store
            .list_active_for_event("shipment.created", Some("o2"))
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn test_failure_counter() {
        let store = InMemoryWebhookStorage::new();
        let sub = store.create(&subscription("o", &["a.b"])).await.unwrap();

        assert_eq!(store.increment_failure_count(&sub.id).await.unwrap(), 1);
        assert_eq!(store.increment_failure_count(&sub.id).await.unwrap(), 2);

        let at = Utc::now();
        store.reset_failure_count(&sub.id, at).await.unwrap();
        let sub = store.get(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.consecutive_failures, 0);
        assert_eq!(sub.last_success_at, Some(at));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryWebhookStorage::new());
        let sub = store.create(&subscription("o", &["a.b"])).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = sub.id.clone();
            tasks.spawn(async move { store.increment_failure_count(&id).await.unwrap() });
        }
        while tasks.join_next().await.is_some() {}

        let sub = store.get(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.consecutive_failures, 20);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_lease_lapses() {
        let store = InMemoryWebhookStorage::new();
        let sub = subscription("o", &["a.b"]);
        let now = Utc::now();
        let event = WebhookEvent::new(&sub, &Event::custom("a.b", serde_json::json!({})), now);
        store.insert_event(&event).await.unwrap();

        let lease = now + Duration::seconds(60);
        assert!(store.claim_event(&event.id, now, lease).await.unwrap().is_some());
        assert!(store.claim_event(&event.id, now, lease).await.unwrap().is_none());
        assert!(store.due_events(now, 10).await.unwrap().is_empty());

        // A lapsed lease makes the record due again.
        assert_eq!(store.due_events(lease, 10).await.unwrap().len(), 1);
        assert!(store.claim_event(&event.id, lease, lease + Duration::seconds(60)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_event_if_rejects_stale_writers() {
        let store = InMemoryWebhookStorage::new();
        let sub = subscription("o", &["a.b"]);
        let now = Utc::now();
        let mut event = WebhookEvent::new(&sub, &Event::custom("a.b", serde_json::json!({})), now);
        store.insert_event(&event).await.unwrap();

        event.attempts = 1;
        event.status = DeliveryStatus::Retrying;
        store.update_event_if(&event, 0).await.unwrap();

        // Second writer still believes attempts == 0.
        let err = store.update_event_if(&event, 0).await.unwrap_err();
        assert!(matches!(err, WebhookError::Conflict(_)));

        event.attempts = 2;
        event.status = DeliveryStatus::Sent;
        store.update_event_if(&event, 1).await.unwrap();

        // Terminal records never change again.
        event.status = DeliveryStatus::Failed;
        assert!(store.update_event_if(&event, 2).await.is_err());
        let stored = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn test_delete_events_before() {
        let store = InMemoryWebhookStorage::new();
        let sub = subscription("o", &["a.b"]);
        let now = Utc::now();
        let old = WebhookEvent::new(&sub, &Event::custom("a.b", serde_json::json!({})), now - Duration::days(40));
        let fresh = WebhookEvent::new(&sub, &Event::custom("a.b", serde_json::json!({})), now);
        store.insert_event(&old).await.unwrap();
        store.insert_event(&fresh).await.unwrap();

        let removed = store.delete_events_before(now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.event_count().await, 1);
    }
}
