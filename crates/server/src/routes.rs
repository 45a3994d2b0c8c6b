use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    advance_counter, enqueue_run, parse_counter_range, parse_counter_value, parse_node_id,
    read_counter, read_text, remove_node, start_run, write_counter, write_text,
};
use shared::{
    domain::CounterMode,
    error::{ApiError, ErrorCode},
    protocol::{
        CounterResponse, RemoveResponse, RunEnqueuedResponse, RunReport, RunRequest, ServerEvent,
        TextResponse, TextWriteRequest, WriteResponse, COUNTER_ADVANCE_ROUTE, COUNTER_ROUTE,
        NODE_STATE_ROUTE, RUNS_ROUTE, TEXT_ROUTE,
    },
};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::app_state::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// Slack on top of the text limit for the JSON envelope.
const BODY_ENVELOPE_BYTES: usize = 4 * 1024;

#[derive(Debug, Deserialize)]
struct NodeQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CounterWriteQuery {
    id: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdvanceQuery {
    id: Option<String>,
    mode: Option<String>,
    min: Option<i64>,
    max: Option<i64>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.api.max_text_bytes.saturating_add(BODY_ENVELOPE_BYTES);
    Router::new()
        .route("/healthz", get(healthz))
        .route(COUNTER_ROUTE, get(http_read_counter).post(http_write_counter))
        .route(COUNTER_ADVANCE_ROUTE, post(http_advance_counter))
        .route(TEXT_ROUTE, get(http_read_text).post(http_write_text))
        .route(NODE_STATE_ROUTE, delete(http_remove_node))
        .route(RUNS_ROUTE, post(http_enqueue_run))
        .route("/pipeline/runs/:run_id/start", post(http_start_run))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(message = %err.message, "request failed");
    }
    (status, Json(err))
}

/// Malformed or invalid JSON bodies are validation errors. Oversized bodies
/// keep the status the body limit layer assigned.
fn json_payload<T>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, (StatusCode, Json<ApiError>)> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => Err((
            rejection.status(),
            Json(ApiError::new(ErrorCode::Validation, rejection.body_text())),
        )),
        Err(rejection) => Err(reject(ApiError::new(
            ErrorCode::Validation,
            rejection.body_text(),
        ))),
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_read_counter(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NodeQuery>,
) -> ApiResult<CounterResponse> {
    let node_id = parse_node_id(q.id.as_deref()).map_err(reject)?;
    let response = read_counter(&state.api, &node_id).await.map_err(reject)?;
    Ok(Json(response))
}

async fn http_write_counter(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CounterWriteQuery>,
) -> ApiResult<WriteResponse> {
    let node_id = parse_node_id(q.id.as_deref()).map_err(reject)?;
    let raw_value = parse_counter_value(q.value.as_deref()).map_err(reject)?;
    let outcome = write_counter(&state.api, &node_id, raw_value)
        .await
        .map_err(reject)?;
    state.publish(outcome.event);
    Ok(Json(outcome.response))
}

async fn http_advance_counter(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AdvanceQuery>,
) -> ApiResult<CounterResponse> {
    let node_id = parse_node_id(q.id.as_deref()).map_err(reject)?;
    let mode = q
        .mode
        .as_deref()
        .unwrap_or_default()
        .parse::<CounterMode>()
        .map_err(|e| reject(e.into()))?;
    let range = parse_counter_range(q.min, q.max).map_err(reject)?;
    let outcome = advance_counter(&state.api, &node_id, mode, range)
        .await
        .map_err(reject)?;
    state.publish(outcome.event);
    Ok(Json(outcome.response))
}

async fn http_read_text(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NodeQuery>,
) -> ApiResult<TextResponse> {
    let node_id = parse_node_id(q.id.as_deref()).map_err(reject)?;
    let response = read_text(&state.api, &node_id).await.map_err(reject)?;
    Ok(Json(response))
}

async fn http_write_text(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NodeQuery>,
    payload: Result<Json<TextWriteRequest>, JsonRejection>,
) -> ApiResult<WriteResponse> {
    let node_id = parse_node_id(q.id.as_deref()).map_err(reject)?;
    let req = json_payload(payload)?;
    let outcome = write_text(&state.api, &node_id, req.text)
        .await
        .map_err(reject)?;
    state.publish(outcome.event);
    Ok(Json(outcome.response))
}

async fn http_remove_node(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NodeQuery>,
) -> ApiResult<RemoveResponse> {
    let node_id = parse_node_id(q.id.as_deref()).map_err(reject)?;
    let outcome = remove_node(&state.api, &node_id).await.map_err(reject)?;
    for event in outcome.events {
        state.publish(event);
    }
    Ok(Json(outcome.response))
}

async fn http_enqueue_run(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<RunEnqueuedResponse> {
    let req = json_payload(payload)?;
    let (run_id, event) = enqueue_run(&state.api, req).await.map_err(reject)?;
    state.publish(event);
    Ok(Json(RunEnqueuedResponse { run_id }))
}

async fn http_start_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<RunReport> {
    let report = start_run(&state.api, run_id, |event| state.publish(event))
        .await
        .map_err(reject)?;
    Ok(Json(report))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};
    use tokio_stream::wrappers::BroadcastStream;

    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events.subscribe());

    let send_task = tokio::spawn(async move {
        while let Some(next) = events.next().await {
            let event = feed_event(next);
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

/// A lagged subscriber still gets a frame, so its clients know to resync.
fn feed_event(next: Result<ServerEvent, BroadcastStreamRecvError>) -> ServerEvent {
    match next {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "websocket subscriber lagged; events dropped");
            ServerEvent::EventsDropped { skipped }
        }
    }
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;
