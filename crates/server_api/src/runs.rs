//! Host stand-in for the pipeline executor. A run is queued, then started;
//! each node consumes (and may advance) its stored state while the caller
//! receives the lifecycle events to broadcast.

use counter_policy::advance_with;
use shared::{
    domain::{CounterMode, CounterRange, NodeId, StateKey},
    error::{ApiError, ErrorCode},
    protocol::{NodeOutput, NodeRun, RunReport, RunRequest, ServerEvent},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{internal, state_changed, write_text, ApiContext};

pub async fn enqueue_run(
    ctx: &ApiContext,
    request: RunRequest,
) -> Result<(Uuid, ServerEvent), ApiError> {
    if request.nodes.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "run must contain at least one node",
        ));
    }
    if request.nodes.iter().any(|node| node.node_id().as_str().trim().is_empty()) {
        return Err(ApiError::new(ErrorCode::Validation, "missing node id"));
    }

    let run_id = Uuid::new_v4();
    let node_ids = request
        .nodes
        .iter()
        .map(|node| node.node_id().clone())
        .collect::<Vec<_>>();
    ctx.pending_runs.lock().await.insert(run_id, request);
    info!(%run_id, nodes = node_ids.len(), "run enqueued");
    Ok((run_id, ServerEvent::RunEnqueued { run_id, node_ids }))
}

/// Executes a queued run in node order. Node failures are reported through
/// `emit` and never abort the run.
pub async fn start_run<F>(ctx: &ApiContext, run_id: Uuid, mut emit: F) -> Result<RunReport, ApiError>
where
    F: FnMut(ServerEvent),
{
    let request = ctx
        .pending_runs
        .lock()
        .await
        .remove(&run_id)
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "run not found"))?;

    info!(%run_id, "run started");
    emit(ServerEvent::RunStarted { run_id });

    let mut outputs = Vec::with_capacity(request.nodes.len());
    for node in request.nodes {
        let node_id = node.node_id().clone();
        let output = match execute_node(ctx, &node).await {
            Ok((output, changed)) => {
                if let Some(event) = changed {
                    emit(event);
                }
                output
            }
            Err(err) => {
                warn!(%run_id, node_id = %node_id, error = %err.message, "node execution failed");
                emit(ServerEvent::Error(err));
                String::new()
            }
        };
        emit(ServerEvent::NodeExecuted {
            run_id,
            node_id: node_id.clone(),
            output: output.clone(),
        });
        outputs.push(NodeOutput { node_id, output });
    }

    info!(%run_id, nodes = outputs.len(), "run completed");
    Ok(RunReport { run_id, outputs })
}

async fn execute_node(
    ctx: &ApiContext,
    node: &NodeRun,
) -> Result<(String, Option<ServerEvent>), ApiError> {
    match node {
        NodeRun::Counter {
            id,
            prefix,
            suffix,
            advance,
            range,
        } => execute_counter(ctx, id, prefix, suffix, *advance, *range).await,
        NodeRun::TextCache { id, input_text } => execute_text_cache(ctx, id, input_text).await,
    }
}

/// Formats the current value, then advances it for the next run when the
/// node is configured to advance after use.
async fn execute_counter(
    ctx: &ApiContext,
    node_id: &NodeId,
    prefix: &str,
    suffix: &str,
    advance: Option<CounterMode>,
    range: Option<CounterRange>,
) -> Result<(String, Option<ServerEvent>), ApiError> {
    let Some(mode) = advance else {
        let entry = ctx
            .storage
            .get(node_id, StateKey::Counter)
            .await
            .map_err(internal)?;
        let current = entry.value.as_counter().unwrap_or_default();
        return Ok((format!("{prefix}{current}{suffix}"), None));
    };

    let mut used = 0;
    let entry = ctx
        .storage
        .update_counter(node_id, |current| {
            used = match range {
                Some(range) => range.clamp(current),
                None => current,
            };
            advance_with(mode, used, range)
        })
        .await
        .map_err(internal)?;
    info!(
        node_id = %node_id,
        used,
        next = entry.value.as_counter().unwrap_or_default(),
        "counter consumed"
    );
    Ok((
        format!("{prefix}{used}{suffix}"),
        Some(state_changed(node_id, StateKey::Counter, entry.version)),
    ))
}

/// Non-blank upstream input replaces the cache; otherwise the cache is replayed.
async fn execute_text_cache(
    ctx: &ApiContext,
    node_id: &NodeId,
    input_text: &str,
) -> Result<(String, Option<ServerEvent>), ApiError> {
    if !input_text.trim().is_empty() {
        let outcome = write_text(ctx, node_id, input_text.to_string()).await?;
        return Ok((input_text.to_string(), Some(outcome.event)));
    }

    let entry = ctx
        .storage
        .get(node_id, StateKey::CacheText)
        .await
        .map_err(internal)?;
    Ok((entry.value.as_text().unwrap_or_default().to_string(), None))
}

#[cfg(test)]
#[path = "tests/runs_tests.rs"]
mod tests;
