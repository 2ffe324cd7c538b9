//! Business event envelope and typed payloads.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EventError, EventResult};

/// A business occurrence published onto the bus and fanned out to webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event instance.
    pub id: String,
    /// Dotted event type (e.g. `shipment.status_updated`).
    pub event_type: String,
    /// The event payload.
    pub payload: EventPayload,
    /// Owner scoping for fan-out, if the event belongs to a single tenant.
    pub owner_id: Option<String>,
    /// Timestamp when the event was created.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates a new event from a typed payload, stamped with the system time.
    pub fn new(payload: EventPayload) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Creates a new event stamped with `timestamp`, usually `Clock::now()`.
    pub fn at(payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: payload.event_type().to_string(),
            payload,
            owner_id: None,
            timestamp,
        }
    }

    /// Creates an event for a type this crate has no variant for.
    pub fn custom(event_type: impl Into<String>, data: Value) -> Self {
        let event_type = event_type.into();
        Self::new(EventPayload::Custom {
            event_type,
            data,
        })
    }

    /// Builds an event from a raw type string and JSON body.
    ///
    /// Known types are parsed into their typed variant; anything else, or a
    /// known type whose body does not match, is kept as an opaque blob.
    pub fn from_parts(event_type: &str, data: Value) -> Self {
        match EventPayload::parse(event_type, data.clone()) {
            Ok(payload) => Self::new(payload),
            Err(_) => Self::custom(event_type, data),
        }
    }

    /// Scopes the event to a single owner.
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Returns the payload as the JSON `data` object sent to subscribers.
    pub fn data(&self) -> Value {
        self.payload.to_value()
    }

    /// Returns the namespace part of the type (`shipment` for `shipment.created`).
    pub fn namespace(&self) -> &str {
        self.event_type
            .split_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or(&self.event_type)
    }

    /// Checks if this event matches a subscription pattern.
    ///
    /// Patterns support exact types, namespace wildcards (`shipment.*`)
    /// and `*` for everything.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        match pattern.strip_suffix(".*") {
            Some(prefix) => self.namespace() == prefix,
            None => self.event_type == pattern,
        }
    }
}

/// Well-known event type strings.
pub mod event_types {
    pub const SHIPMENT_CREATED: &str = "shipment.created";
    pub const SHIPMENT_STATUS_UPDATED: &str = "shipment.status_updated";
    pub const PAYMENT_SETTLED: &str = "payment.settled";
    pub const ASSIGNMENT_CREATED: &str = "assignment.created";
    pub const ASSIGNMENT_ACCEPTED: &str = "assignment.accepted";
    pub const ASSIGNMENT_DECLINED: &str = "assignment.declined";
    pub const ASSIGNMENT_EXPIRED: &str = "assignment.expired";
    pub const ASSIGNMENT_ESCALATED: &str = "assignment.escalated";
}

/// Typed payload per known event type, with an opaque fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ShipmentCreated(ShipmentCreated),
    ShipmentStatusUpdated(ShipmentStatusUpdated),
    PaymentSettled(PaymentSettled),
    AssignmentCreated(AssignmentNotice),
    AssignmentAccepted(AssignmentNotice),
    AssignmentDeclined(AssignmentNotice),
    AssignmentExpired(AssignmentNotice),
    AssignmentEscalated(AssignmentEscalated),
    Custom { event_type: String, data: Value },
}

impl EventPayload {
    /// Returns the dotted event type for this payload.
    pub fn event_type(&self) -> &str {
        use event_types::*;
        match self {
            EventPayload::ShipmentCreated(_) => SHIPMENT_CREATED,
            EventPayload::ShipmentStatusUpdated(_) => SHIPMENT_STATUS_UPDATED,
            EventPayload::PaymentSettled(_) => PAYMENT_SETTLED,
            EventPayload::AssignmentCreated(_) => ASSIGNMENT_CREATED,
            EventPayload::AssignmentAccepted(_) => ASSIGNMENT_ACCEPTED,
            EventPayload::AssignmentDeclined(_) => ASSIGNMENT_DECLINED,
            EventPayload::AssignmentExpired(_) => ASSIGNMENT_EXPIRED,
            EventPayload::AssignmentEscalated(_) => ASSIGNMENT_ESCALATED,
            EventPayload::Custom { event_type, .. } => event_type,
        }
    }

    /// Serializes the payload body without the enum tag.
    pub fn to_value(&self) -> Value {
        let value = match self {
            EventPayload::ShipmentCreated(p) => serde_json::to_value(p),
            EventPayload::ShipmentStatusUpdated(p) => serde_json::to_value(p),
            EventPayload::PaymentSettled(p) => serde_json::to_value(p),
            EventPayload::AssignmentCreated(p)
            | EventPayload::AssignmentAccepted(p)
            | EventPayload::AssignmentDeclined(p)
            | EventPayload::AssignmentExpired(p) => serde_json::to_value(p),
            EventPayload::AssignmentEscalated(p) => serde_json::to_value(p),
            EventPayload::Custom { data, .. } => return data.clone(),
        };
        value.unwrap_or(Value::Null)
    }

    /// Parses a JSON body into the typed variant for `event_type`.
    pub fn parse(event_type: &str, data: Value) -> EventResult<Self> {
        use event_types::*;
        if event_type.trim().is_empty() {
            return Err(EventError::EmptyEventType);
        }
        let payload = match event_type {
            SHIPMENT_CREATED => EventPayload::ShipmentCreated(typed(event_type, data)?),
            SHIPMENT_STATUS_UPDATED => EventPayload::ShipmentStatusUpdated(typed(event_type, data)?),
            PAYMENT_SETTLED => EventPayload::PaymentSettled(typed(event_type, data)?),
            ASSIGNMENT_CREATED => EventPayload::AssignmentCreated(typed(event_type, data)?),
            ASSIGNMENT_ACCEPTED => EventPayload::AssignmentAccepted(typed(event_type, data)?),
            ASSIGNMENT_DECLINED => EventPayload::AssignmentDeclined(typed(event_type, data)?),
            ASSIGNMENT_EXPIRED => EventPayload::AssignmentExpired(typed(event_type, data)?),
            ASSIGNMENT_ESCALATED => EventPayload::AssignmentEscalated(typed(event_type, data)?),
            other => EventPayload::Custom {
                event_type: other.to_string(),
                data,
            },
        };
        Ok(payload)
    }
}

fn typed<T: DeserializeOwned>(event_type: &str, data: Value) -> EventResult<T> {
    serde_json::from_value(data).map_err(|e| EventError::InvalidPayload {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentCreated {
    pub shipment_id: String,
    pub tracking_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentStatusUpdated {
    pub tracking_number: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSettled {
    pub payment_id: String,
    pub shipment_id: String,
    /// Amount in minor currency units.
    pub amount: i64,
    pub currency: String,
}

/// Assignment lifecycle notice shared by created/accepted/declined/expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentNotice {
    pub assignment_id: String,
    pub shipment_id: String,
    pub carrier_id: String,
    pub reassignment_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEscalated {
    pub assignment_id: String,
    pub shipment_id: String,
    pub reason: String,
    pub tried_carriers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_payload_serializes_camel_case() {
        let event = Event::new(EventPayload::ShipmentStatusUpdated(ShipmentStatusUpdated {
            tracking_number: "BAG123".into(),
            status: "delivered".into(),
            shipment_id: None,
            location: None,
        }));

        assert_eq!(event.event_type, "shipment.status_updated");
        assert_eq!(
            event.data(),
            json!({"trackingNumber": "BAG123", "status": "delivered"})
        );
    }

    #[test]
    fn test_event_at_uses_given_time() {
        let at = Utc::now() - chrono::Duration::days(30);
        let payload = EventPayload::Custom {
            event_type: "a.b".into(),
            data: json!({}),
        };
        let event = Event::at(payload, at);
        assert_eq!(event.timestamp, at);
        assert_eq!(event.event_type, "a.b");
    }

    #[test]
    fn test_from_parts_falls_back_to_custom() {
        let known = Event::from_parts(
            "shipment.status_updated",
            json!({"trackingNumber": "BAG123", "status": "delivered"}),
        );
        assert!(matches!(known.payload, EventPayload::ShipmentStatusUpdated(_)));

        // Known type with the wrong shape stays opaque rather than failing.
        let malformed = Event::from_parts("shipment.status_updated", json!({"oops": true}));
        assert!(matches!(malformed.payload, EventPayload::Custom { .. }));
        assert_eq!(malformed.event_type, "shipment.status_updated");
        assert_eq!(malformed.data(), json!({"oops": true}));

        let unknown = Event::from_parts("invoice.issued", json!({"n": 1}));
        assert_eq!(unknown.event_type, "invoice.issued");
        assert_eq!(unknown.data(), json!({"n": 1}));
    }

    #[test]
    fn test_pattern_matching() {
        let event = Event::custom("shipment.created", json!({}));
        assert!(event.matches("shipment.created"));
        assert!(event.matches("shipment.*"));
        assert!(event.matches("*"));
        assert!(!event.matches("payment.*"));
        assert!(!event.matches("shipment.status_updated"));
    }

    #[test]
    fn test_parse_rejects_empty_type() {
        assert!(EventPayload::parse("  ", json!({})).is_err());
    }
}
