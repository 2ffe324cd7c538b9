//! REST routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use freightline_assignments::{Assignment, Handoff, NewAssignment};
use freightline_events::{Event, EventPayload};
use freightline_webhooks::{
    DeliveryStats, NewSubscription, Subscription, SubscriptionUpdate, WebhookEvent,
};

use crate::AppState;
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

const DEFAULT_STATS_DAYS: u32 = 7;
const DEFAULT_EVENTS_LIMIT: usize = 50;
const MAX_EVENTS_LIMIT: usize = 500;

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/subscriptions",
            post(create_subscription).get(list_subscriptions),
        )
        .route(
            "/subscriptions/{id}",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .route("/subscriptions/{id}/stats", get(subscription_stats))
        .route("/subscriptions/{id}/events", get(subscription_events))
        .route("/deliveries/{id}", get(get_delivery))
        .route("/events", post(publish_event))
        .route("/assignments", post(create_assignment))
        .route("/assignments/{id}", get(get_assignment))
        .route("/assignments/{id}/accept", post(accept_assignment))
        .route("/assignments/{id}/decline", post(decline_assignment))
        .route("/assignments/{id}/complete", post(complete_assignment))
        .route("/shipments/{id}/assignments", get(shipment_assignments))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "armed_timers": state.assignments.armed_timers().await,
    }))
}

/// Creation response. The only place a secret is ever returned.
#[derive(Debug, Serialize)]
struct CreatedSubscription {
    #[serde(flatten)]
    subscription: Subscription,
    secret: String,
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<CreatedSubscription>)> {
    let subscription = state.webhooks.create_subscription(request).await?;
    let secret = subscription.secret.clone();
    Ok((
        StatusCode::CREATED,
        Json(CreatedSubscription {
            subscription,
            secret,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    owner_id: String,
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.webhooks.list_subscriptions(&query.owner_id).await?))
}

async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.webhooks.get_subscription(&id).await?))
}

async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<SubscriptionUpdate>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.webhooks.update_subscription(&id, update).await?))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.webhooks.delete_subscription(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    days: Option<u32>,
}

async fn subscription_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<DeliveryStats>> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    Ok(Json(state.webhooks.delivery_stats(&id, days).await?))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn subscription_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .min(MAX_EVENTS_LIMIT);
    Ok(Json(
        state.webhooks.events_for_subscription(&id, limit).await?,
    ))
}

async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookEvent>> {
    Ok(Json(state.webhooks.get_event(&id).await?))
}

#[derive(Debug, Deserialize)]
struct PublishEvent {
    event_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    owner_id: Option<String>,
}

/// Publishes a business event onto the bus. Delivery happens in the background.
async fn publish_event(
    State(state): State<AppState>,
    Json(request): Json<PublishEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let payload = EventPayload::parse(&request.event_type, request.data)?;
    let mut event = Event::new(payload);
    if let Some(owner_id) = request.owner_id {
        event = event.with_owner(owner_id);
    }

    let body = serde_json::json!({
        "id": event.id,
        "event_type": event.event_type,
    });
    state.bus.emit(event).await;
    Ok((StatusCode::ACCEPTED, Json(body)))
}

async fn create_assignment(
    State(state): State<AppState>,
    Json(request): Json<NewAssignment>,
) -> ApiResult<(StatusCode, Json<Assignment>)> {
    let assignment = state.assignments.create_assignment(request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn get_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Assignment>> {
    Ok(Json(state.assignments.get(&id).await?))
}

#[derive(Debug, Deserialize)]
struct CarrierResponse {
    carrier_id: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn accept_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CarrierResponse>,
) -> ApiResult<Json<Assignment>> {
    Ok(Json(
        state.assignments.accept(&id, &request.carrier_id).await?,
    ))
}

async fn decline_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CarrierResponse>,
) -> ApiResult<Json<Handoff>> {
    Ok(Json(
        state
            .assignments
            .decline(&id, &request.carrier_id, request.reason)
            .await?,
    ))
}

async fn complete_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Assignment>> {
    Ok(Json(state.assignments.complete(&id).await?))
}

async fn shipment_assignments(
    State(state): State<AppState>,
    Path(shipment_id): Path<String>,
) -> ApiResult<Json<Vec<Assignment>>> {
    Ok(Json(
        state.assignments.chain_for_shipment(&shipment_id).await?,
    ))
}
