//! # Freightline Webhooks
//!
//! Outbound webhook delivery for Freightline providing:
//! - Subscription management with per-subscription signing secrets
//! - Event fan-out to every matching active subscription
//! - Signed, single-attempt HTTP delivery with a hard timeout
//! - Retry scheduling with configurable backoff and a durable sweep
//! - Automatic deactivation of chronically failing subscriptions
//!
//! ## Example
//!
//! ```rust,ignore
//! use freightline_webhooks::{NewSubscription, WebhookConfig, WebhookSystem};
//!
//! let system = Arc::new(WebhookSystem::new(WebhookConfig::default()));
//!
//! let subscription = system
//!     .create_subscription(NewSubscription::new(
//!         "shipper_1",
//!         "https://shipper.example.com/hooks",
//!         ["shipment.status_updated"],
//!     ))
//!     .await?;
//!
//! // Fan out every business event published on the bus
//! system.clone().connect_to_events(&event_bus).await;
//! system.spawn_sweeper();
//! ```

mod delivery;
mod error;
mod receiver;
mod record;
mod retry;
mod scheduler;
mod signature;
mod stats;
mod storage;
mod subscription;
mod system;
mod transport;

pub use delivery::{
    AttemptOutcome, DeliveryEngine, WebhookPayload, DELIVERY_HEADER, EVENT_HEADER,
    SIGNATURE_HEADER,
};
pub use error::{WebhookError, WebhookResult};
pub use receiver::WebhookReceiver;
pub use record::{DeliveryStatus, ResponseRecord, WebhookEvent};
pub use retry::{BackoffPolicy, ExponentialBackoff, RetryStrategy, ScheduledBackoff};
pub use scheduler::{DeliveryOutcome, RetryScheduler, SweepReport};
pub use signature::{generate_secret, WebhookSigner};
pub use stats::DeliveryStats;
pub use storage::{DeliveryStore, InMemoryWebhookStorage, SubscriptionStore, WebhookStorage};
pub use subscription::{NewSubscription, Subscription, SubscriptionUpdate, DEFAULT_MAX_RETRIES};
pub use system::{WebhookConfig, WebhookEventHandler, WebhookSystem};
#[cfg(feature = "http-client")]
pub use transport::HttpTransport;
pub use transport::{OutboundRequest, TransportResponse, WebhookTransport};
