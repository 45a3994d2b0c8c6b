use std::{collections::HashMap, sync::Arc};

use counter_policy::advance_with;
use shared::{
    domain::{clamp_counter, CounterMode, CounterRange, NodeId, StateKey, StateValue},
    error::{ApiError, ErrorCode},
    protocol::{CounterResponse, RemoveResponse, RunRequest, ServerEvent, TextResponse, WriteResponse},
};
use storage::Storage;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

mod runs;

pub use runs::{enqueue_run, start_run};

pub const DEFAULT_MAX_TEXT_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub max_text_bytes: usize,
    pending_runs: Arc<Mutex<HashMap<Uuid, RunRequest>>>,
}

impl ApiContext {
    pub fn new(storage: Storage, max_text_bytes: usize) -> Self {
        Self {
            storage,
            max_text_bytes,
            pending_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// A successful write plus the feedback event announcing it.
#[derive(Debug, Clone)]
pub struct WriteOutcome<T> {
    pub response: T,
    pub event: ServerEvent,
}

pub struct RemoveOutcome {
    pub response: RemoveResponse,
    pub events: Vec<ServerEvent>,
}

pub fn parse_node_id(raw: Option<&str>) -> Result<NodeId, ApiError> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(NodeId::new)
        .ok_or_else(|| ApiError::new(ErrorCode::Validation, "missing node id"))
}

pub fn parse_counter_value(raw: Option<&str>) -> Result<i64, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::new(ErrorCode::Validation, "missing counter value"))?;
    raw.parse::<i64>().map_err(|_| {
        ApiError::new(
            ErrorCode::Validation,
            format!("counter value '{raw}' is not an integer"),
        )
    })
}

pub fn parse_counter_range(
    min: Option<i64>,
    max: Option<i64>,
) -> Result<Option<CounterRange>, ApiError> {
    match (min, max) {
        (None, None) => Ok(None),
        (Some(min), Some(max)) => CounterRange::new(clamp_counter(min), clamp_counter(max))
            .map(Some)
            .map_err(ApiError::from),
        _ => Err(ApiError::new(
            ErrorCode::Validation,
            "counter range needs both min and max",
        )),
    }
}

pub async fn read_counter(ctx: &ApiContext, node_id: &NodeId) -> Result<CounterResponse, ApiError> {
    let entry = ctx
        .storage
        .get(node_id, StateKey::Counter)
        .await
        .map_err(internal)?;
    Ok(CounterResponse {
        value: entry.value.as_counter().unwrap_or_default(),
        version: entry.version,
    })
}

/// Writes a counter, clamping out-of-domain input into `[0, COUNTER_MAX]`.
pub async fn write_counter(
    ctx: &ApiContext,
    node_id: &NodeId,
    raw_value: i64,
) -> Result<WriteOutcome<WriteResponse>, ApiError> {
    let value = clamp_counter(raw_value);
    if i64::from(value) != raw_value {
        info!(node_id = %node_id, raw_value, value, "counter write clamped");
    }
    let version = ctx
        .storage
        .set(node_id, StateValue::Counter(value))
        .await
        .map_err(internal)?;
    Ok(WriteOutcome {
        response: WriteResponse {
            success: true,
            version,
        },
        event: state_changed(node_id, StateKey::Counter, version),
    })
}

pub async fn advance_counter(
    ctx: &ApiContext,
    node_id: &NodeId,
    mode: CounterMode,
    range: Option<CounterRange>,
) -> Result<WriteOutcome<CounterResponse>, ApiError> {
    let entry = ctx
        .storage
        .update_counter(node_id, |current| advance_with(mode, current, range))
        .await
        .map_err(internal)?;
    let value = entry.value.as_counter().unwrap_or_default();
    info!(node_id = %node_id, %mode, value, version = entry.version, "counter advanced");
    Ok(WriteOutcome {
        response: CounterResponse {
            value,
            version: entry.version,
        },
        event: state_changed(node_id, StateKey::Counter, entry.version),
    })
}

pub async fn read_text(ctx: &ApiContext, node_id: &NodeId) -> Result<TextResponse, ApiError> {
    let entry = ctx
        .storage
        .get(node_id, StateKey::CacheText)
        .await
        .map_err(internal)?;
    Ok(TextResponse {
        text: entry.value.as_text().unwrap_or_default().to_string(),
        version: entry.version,
    })
}

pub async fn write_text(
    ctx: &ApiContext,
    node_id: &NodeId,
    text: String,
) -> Result<WriteOutcome<WriteResponse>, ApiError> {
    if text.len() > ctx.max_text_bytes {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("text exceeds {} bytes", ctx.max_text_bytes),
        ));
    }
    let version = ctx
        .storage
        .set(node_id, StateValue::Text(text))
        .await
        .map_err(internal)?;
    Ok(WriteOutcome {
        response: WriteResponse {
            success: true,
            version,
        },
        event: state_changed(node_id, StateKey::CacheText, version),
    })
}

/// Removal bumps each removed key's version, so live mirrors accept the reset.
pub async fn remove_node(ctx: &ApiContext, node_id: &NodeId) -> Result<RemoveOutcome, ApiError> {
    let reset = ctx
        .storage
        .remove_node(node_id)
        .await
        .map_err(internal)?;
    info!(node_id = %node_id, removed = reset.len(), "node state removed");
    Ok(RemoveOutcome {
        response: RemoveResponse {
            success: true,
            removed: reset.len() as u64,
        },
        events: reset
            .iter()
            .map(|entry| state_changed(node_id, entry.state_key, entry.version))
            .collect(),
    })
}

fn state_changed(node_id: &NodeId, state_key: StateKey, version: u64) -> ServerEvent {
    ServerEvent::StateChanged {
        node_id: node_id.clone(),
        state_key,
        version,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
