use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use freightline_events::{Event, EventPayload, ShipmentStatusUpdated, SystemClock};
use freightline_webhooks::{
    BackoffPolicy, DeliveryOutcome, DeliveryStatus, HttpTransport, InMemoryWebhookStorage,
    NewSubscription, ScheduledBackoff, WebhookConfig, WebhookEvent, WebhookPayload,
    WebhookReceiver, WebhookSystem, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
};

const SECRET: &str = "whsec_integration";

#[derive(Clone, Default)]
struct Inbox {
    received: Arc<Mutex<Vec<(HeaderMap, WebhookPayload)>>>,
}

async fn accept(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match WebhookReceiver::new(SECRET).verify(signature, &body) {
        Ok(payload) => {
            inbox.received.lock().unwrap().push((headers, payload));
            StatusCode::OK
        }
        Err(_) => StatusCode::UNAUTHORIZED,
    }
}

async fn fail() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn hang() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}

async fn serve() -> (SocketAddr, Inbox) {
    let inbox = Inbox::default();
    let app = Router::new()
        .route("/hooks", post(accept))
        .route("/broken", post(fail))
        .route("/slow", post(hang))
        .with_state(inbox.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, inbox)
}

fn system(config: WebhookConfig) -> Arc<WebhookSystem> {
    Arc::new(WebhookSystem::with_components(
        Arc::new(InMemoryWebhookStorage::new()),
        Arc::new(HttpTransport::new()),
        Arc::new(SystemClock),
        config,
    ))
}

fn bag123() -> Event {
    Event::new(EventPayload::ShipmentStatusUpdated(ShipmentStatusUpdated {
        tracking_number: "BAG123".into(),
        status: "delivered".into(),
        shipment_id: None,
        location: None,
    }))
}

async fn wait_for_terminal(system: &WebhookSystem, subscription_id: &str) -> WebhookEvent {
    for _ in 0..200 {
        let records = system.events_for_subscription(subscription_id, 1).await.unwrap();
        if let Some(record) = records.into_iter().next() {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("delivery never reached a terminal state");
}

#[tokio::test]
async fn delivers_signed_payload_over_http() {
    let (addr, inbox) = serve().await;
    let system = system(WebhookConfig::default());
    let sub = system
        .create_subscription(
            NewSubscription::new("shipper", format!("http://{addr}/hooks"), ["shipment.status_updated"])
                .secret(SECRET),
        )
        .await
        .unwrap();

    let outcomes = system.dispatch_and_wait(&bag123()).await.unwrap();
    assert_eq!(outcomes, vec![DeliveryOutcome::Sent]);

    let record = &system.events_for_subscription(&sub.id, 10).await.unwrap()[0];
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.last_response.as_ref().unwrap().status_code, 200);

    let received = inbox.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (headers, payload) = &received[0];
    assert_eq!(payload.event, "shipment.status_updated");
    assert_eq!(payload.data["trackingNumber"], "BAG123");
    assert_eq!(payload.data["status"], "delivered");
    assert_eq!(headers[EVENT_HEADER], "shipment.status_updated");
    assert_eq!(headers[DELIVERY_HEADER], record.id.as_str());
    assert_eq!(headers["user-agent"], "Freightline-Webhooks/1.0");
}

#[tokio::test]
async fn retries_server_errors_until_budget_is_spent() {
    let (addr, _) = serve().await;
    let config = WebhookConfig::default().backoff(BackoffPolicy::Scheduled(ScheduledBackoff::new([
        Duration::from_millis(20),
        Duration::from_millis(40),
    ])));
    let system = system(config);
    let sub = system
        .create_subscription(NewSubscription::new(
            "shipper",
            format!("http://{addr}/broken"),
            ["shipment.status_updated"],
        ))
        .await
        .unwrap();

    system.dispatch(&bag123()).await.unwrap();
    let record = wait_for_terminal(&system, &sub.id).await;

    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.last_response.unwrap().status_code, 500);
    assert_eq!(system.get_subscription(&sub.id).await.unwrap().consecutive_failures, 1);
}

#[tokio::test]
async fn slow_endpoint_is_cut_off() {
    let (addr, _) = serve().await;
    let system = system(WebhookConfig::default().request_timeout(Duration::from_millis(200)));
    let sub = system
        .create_subscription(
            NewSubscription::new("shipper", format!("http://{addr}/slow"), ["shipment.status_updated"])
                .max_retries(1),
        )
        .await
        .unwrap();

    let outcomes = system.dispatch_and_wait(&bag123()).await.unwrap();
    assert_eq!(outcomes, vec![DeliveryOutcome::Failed]);

    let record = &system.events_for_subscription(&sub.id, 1).await.unwrap()[0];
    assert!(record.last_response.is_none());
    assert!(record.last_error.as_ref().unwrap().to_lowercase().contains("time"));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_failure() {
    let system = system(WebhookConfig::default());
    let sub = system
        .create_subscription(
            NewSubscription::new("shipper", "http://127.0.0.1:9/hooks", ["shipment.status_updated"])
                .max_retries(1),
        )
        .await
        .unwrap();

    let outcomes = system.dispatch_and_wait(&bag123()).await.unwrap();
    assert_eq!(outcomes, vec![DeliveryOutcome::Failed]);
    let record = &system.events_for_subscription(&sub.id, 1).await.unwrap()[0];
    assert!(record.last_error.is_some());
}
