//! # Freightline Events
//!
//! Business events for the freight marketplace:
//! - Typed payloads per known event type, with an opaque JSON fallback
//! - Pub/sub event bus with async handlers
//! - A `Clock` abstraction shared by the webhook and assignment engines
//!
//! ## Example
//!
//! ```rust,ignore
//! use freightline_events::{Event, EventBus, EventPayload, ShipmentStatusUpdated};
//!
//! let bus = EventBus::new();
//! bus.on("shipment.*", handler).await;
//!
//! bus.emit(Event::new(EventPayload::ShipmentStatusUpdated(ShipmentStatusUpdated {
//!     tracking_number: "BAG123".into(),
//!     status: "delivered".into(),
//!     shipment_id: None,
//!     location: None,
//! })))
//! .await;
//! ```

mod bus;
mod error;
mod event;
mod handler;
pub mod clock;

pub use bus::EventBus;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EventError, EventResult};
pub use event::{
    event_types, AssignmentEscalated, AssignmentNotice, Event, EventPayload, PaymentSettled,
    ShipmentCreated, ShipmentStatusUpdated,
};
pub use handler::{EventHandler, HandlerReport};
