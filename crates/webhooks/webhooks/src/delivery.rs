//! Single delivery attempts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use freightline_events::Clock;

use crate::error::WebhookResult;
use crate::record::WebhookEvent;
use crate::signature::WebhookSigner;
use crate::subscription::Subscription;
use crate::system::WebhookConfig;
use crate::transport::{OutboundRequest, WebhookTransport};

/// Header carrying the hex HMAC-SHA256 of the body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Header carrying the delivery (record) ID.
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";

/// Body POSTed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub event: String,
    /// ISO-8601 send time.
    pub timestamp: String,
    pub data: Value,
}

/// Result of exactly one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The endpoint answered 2xx.
    Success {
        status_code: u16,
        body: String,
        headers: BTreeMap<String, String>,
    },
    /// The endpoint answered with any other status.
    HttpFailure { status_code: u16, body: String },
    /// The endpoint was never reached or did not answer in time.
    TransportFailure { error: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

/// Performs single signed delivery attempts. Never retries by itself.
pub struct DeliveryEngine {
    transport: Arc<dyn WebhookTransport>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    body_limit: usize,
    user_agent: String,
}

impl DeliveryEngine {
    /// Creates a new delivery engine.
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            timeout: config.request_timeout,
            body_limit: config.response_body_limit,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Builds the signed request for one attempt.
    pub fn build_request(
        &self,
        event: &WebhookEvent,
        subscription: &Subscription,
    ) -> WebhookResult<OutboundRequest> {
        let payload = WebhookPayload {
            event: event.event_type.clone(),
            timestamp: self.clock.now().to_rfc3339(),
            data: event.payload.clone(),
        };
        let body = serde_json::to_string(&payload)?;
        let signature = WebhookSigner::new(&subscription.secret).sign(body.as_bytes());

        Ok(OutboundRequest {
            url: subscription.url.clone(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("User-Agent".to_string(), self.user_agent.clone()),
                (SIGNATURE_HEADER.to_string(), signature),
                (EVENT_HEADER.to_string(), event.event_type.clone()),
                (DELIVERY_HEADER.to_string(), event.id.clone()),
            ],
            body,
            timeout: self.timeout,
        })
    }

    /// Performs one attempt and classifies the result.
    pub async fn attempt(&self, event: &WebhookEvent, subscription: &Subscription) -> AttemptOutcome {
        let request = match self.build_request(event, subscription) {
            Ok(request) => request,
            Err(e) => {
                return AttemptOutcome::TransportFailure {
                    error: e.to_string(),
                };
            }
        };

        let response = tokio::time::timeout(self.timeout, self.transport.post(&request)).await;

        match response {
            Ok(Ok(resp)) => {
                let body = truncate(&resp.body, self.body_limit);
                if (200..300).contains(&resp.status) {
                    AttemptOutcome::Success {
                        status_code: resp.status,
                        body,
                        headers: resp.headers,
                    }
                } else {
                    AttemptOutcome::HttpFailure {
                        status_code: resp.status,
                        body,
                    }
                }
            }
            Ok(Err(e)) => AttemptOutcome::TransportFailure {
                error: e.to_string(),
            },
            Err(_) => AttemptOutcome::TransportFailure {
                error: format!("request timed out after {}ms", self.timeout.as_millis()),
            },
        }
    }
}

fn truncate(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::NewSubscription;
    use crate::transport::testing::{Reply, ScriptedTransport};
    use chrono::Utc;
    use freightline_events::{Event, SystemClock};

    const URL: &str = "https://carrier.example.com/hooks";

    fn fixtures() -> (Subscription, WebhookEvent) {
        let sub = Subscription::from_request(
            NewSubscription::new("owner", URL, ["shipment.status_updated"]).secret("whsec"),
            Utc::now(),
        )
        .unwrap();
        let event = Event::from_parts(
            "shipment.status_updated",
            serde_json::json!({"trackingNumber": "BAG123", "status": "delivered"}),
        );
        let record = WebhookEvent::new(&sub, &event, Utc::now());
        (sub, record)
    }

    fn engine(transport: Arc<ScriptedTransport>, config: &WebhookConfig) -> DeliveryEngine {
        DeliveryEngine::new(transport, Arc::new(SystemClock), config)
    }

    #[tokio::test]
    async fn test_request_is_signed_and_labelled() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(transport.clone(), &WebhookConfig::default());
        let (sub, record) = fixtures();

        let outcome = engine.attempt(&record, &sub).await;
        assert!(outcome.is_success());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];

        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("user-agent"), Some("Freightline-Webhooks/1.0"));
        assert_eq!(request.header(EVENT_HEADER), Some("shipment.status_updated"));
        assert_eq!(request.header(DELIVERY_HEADER), Some(record.id.as_str()));

        let signature_hex = request.header(SIGNATURE_HEADER).unwrap();
        assert!(WebhookSigner::new("whsec").verify(request.body.as_bytes(), signature_hex));
        assert!(!request.body.contains("whsec"));

        let payload: WebhookPayload = serde_json::from_str(&request.body).unwrap();
        assert_eq!(payload.event, "shipment.status_updated");
        assert_eq!(payload.data["trackingNumber"], "BAG123");
        assert!(chrono::DateTime::parse_from_rfc3339(&payload.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_outcome_classification() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(
            URL,
            [Reply::Status(204), Reply::Status(404), Reply::Status(503), Reply::Error("dns failure")],
        );
        let engine = engine(transport, &WebhookConfig::default());
        let (sub, record) = fixtures();

        assert!(matches!(
            engine.attempt(&record, &sub).await,
            AttemptOutcome::Success { status_code: 204, .. }
        ));
        assert!(matches!(
            engine.attempt(&record, &sub).await,
            AttemptOutcome::HttpFailure { status_code: 404, .. }
        ));
        assert!(matches!(
            engine.attempt(&record, &sub).await,
            AttemptOutcome::HttpFailure { status_code: 503, .. }
        ));
        assert!(matches!(
            engine.attempt(&record, &sub).await,
            AttemptOutcome::TransportFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_hanging_endpoint_times_out() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, [Reply::Hang]);
        let config = WebhookConfig::default().request_timeout(Duration::from_millis(50));
        let engine = engine(transport, &config);
        let (sub, record) = fixtures();

        match engine.attempt(&record, &sub).await {
            AttemptOutcome::TransportFailure { error } => assert!(error.contains("timed out")),
            other => panic!("expected transport failure, got {other:?}"),
        }
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 1000), "abc");
        assert_eq!(truncate(&"x".repeat(5000), 1000).len(), 1000);
    }
}
