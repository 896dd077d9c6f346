use super::{AppState, InstanceView, Result, WebError, data};
use crate::core::Instance;
use crate::queue::QueueEvent;
use crate::ratelimit::{limit_by_ip, limit_by_token};
use crate::session::{ConnectionEvent, InstanceRepository};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/instances", post(create_instance).get(list_instances))
        .route("/instances/:id", get(get_instance).delete(delete_instance))
        .route("/instances/:id/connection-events", post(connection_event))
        .route("/instances/:id/events", post(enqueue_event))
        .route("/queue", get(queue_stats))
        // Applied bottom-up: IP quota first, then token quota.
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.token_limiter),
            limit_by_token,
        ))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.ip_limiter),
            limit_by_ip,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Response {
    data(StatusCode::OK, json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInstanceRequest {
    id: Option<String>,
    name: String,
    webhook_url: Option<String>,
}

async fn create_instance(
    State(state): State<AppState>,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<Response> {
    if request.name.trim().is_empty() {
        return Err(WebError::Input("name is required".to_string()));
    }
    let id = request
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut instance = Instance::new(id, request.name.trim());
    instance.webhook_url = request.webhook_url.filter(|url| !url.trim().is_empty());
    let instance = state.instances.create(instance).await?;
    let watchdog = state.watchdogs.start(&instance.id).await;
    info!(instance_id = %instance.id, poll_secs = watchdog.poll_interval().as_secs(), "instance created");

    Ok(data(
        StatusCode::CREATED,
        InstanceView {
            connected: instance.is_connected(),
            instance,
            watched: true,
        },
    ))
}

async fn list_instances(State(state): State<AppState>) -> Result<Response> {
    let mut views = Vec::new();
    for instance in state.instances.list().await {
        let watched = state.watchdogs.get(&instance.id).await.is_some();
        views.push(InstanceView {
            connected: instance.is_connected(),
            instance,
            watched,
        });
    }
    Ok(data(StatusCode::OK, views))
}

async fn get_instance(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    let instance = state.instances.get_by_id(&id).await?;
    let watched = state.watchdogs.get(&id).await.is_some();
    Ok(data(
        StatusCode::OK,
        InstanceView {
            connected: instance.is_connected(),
            instance,
            watched,
        },
    ))
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.watchdogs.stop(&id).await;
    state.instances.delete(&id).await?;
    info!(instance_id = %id, "instance deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ConnectionEventRequest {
    #[serde(rename = "type")]
    kind: String,
    reason: Option<String>,
}

/// Entry point for an out-of-process protocol client reporting
/// connectivity changes.
async fn connection_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ConnectionEventRequest>,
) -> Result<Response> {
    let Some(event) = ConnectionEvent::from_kind(&request.kind, request.reason) else {
        return Ok(data(StatusCode::ACCEPTED, json!({ "applied": false })));
    };

    state.watchdogs.dispatch(&id, &event).await?;

    let update = QueueEvent::new(
        id.as_str(),
        "connection.update",
        serde_json::to_value(&event).map_err(crate::core::GatewayError::from)?,
    );
    if let Err(err) = state.queue.enqueue(&update).await {
        warn!(instance_id = %id, error = %err, "failed to enqueue connection webhook");
    }

    Ok(data(StatusCode::ACCEPTED, json!({ "applied": true, "event": event.kind() })))
}

#[derive(Debug, Deserialize)]
struct EnqueueEventRequest {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn enqueue_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EnqueueEventRequest>,
) -> Result<Response> {
    if request.event_type.trim().is_empty() {
        return Err(WebError::Input("type is required".to_string()));
    }
    // Fail fast for unknown instances rather than queueing undeliverable work.
    state.instances.get_by_id(&id).await?;

    let event = QueueEvent::new(id, request.event_type.trim(), request.payload);
    state.queue.enqueue(&event).await?;
    Ok(data(StatusCode::ACCEPTED, json!({ "id": event.id })))
}

async fn queue_stats(State(state): State<AppState>) -> Result<Response> {
    let size = state.queue.size().await?;
    Ok(data(
        StatusCode::OK,
        json!({ "key": state.queue.key(), "size": size }),
    ))
}
