use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{CounterMode, CounterRange, NodeId, StateKey},
    error::ApiError,
};

pub const COUNTER_ROUTE: &str = "/state/counter";
pub const COUNTER_ADVANCE_ROUTE: &str = "/state/counter/advance";
pub const TEXT_ROUTE: &str = "/state/text";
pub const NODE_STATE_ROUTE: &str = "/state";
pub const RUNS_ROUTE: &str = "/pipeline/runs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterResponse {
    pub value: u32,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextWriteRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub success: bool,
    pub removed: u64,
}

/// One node's work inside a queued run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRun {
    Counter {
        id: NodeId,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
        /// Applied by the executor after the value has been used.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        advance: Option<CounterMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<CounterRange>,
    },
    TextCache {
        id: NodeId,
        #[serde(default)]
        input_text: String,
    },
}

impl NodeRun {
    pub fn node_id(&self) -> &NodeId {
        match self {
            NodeRun::Counter { id, .. } | NodeRun::TextCache { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub nodes: Vec<NodeRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnqueuedResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub node_id: NodeId,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outputs: Vec<NodeOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    RunEnqueued {
        run_id: Uuid,
        node_ids: Vec<NodeId>,
    },
    RunStarted {
        run_id: Uuid,
    },
    NodeExecuted {
        run_id: Uuid,
        node_id: NodeId,
        output: String,
    },
    StateChanged {
        node_id: NodeId,
        state_key: StateKey,
        version: u64,
    },
    /// The feed fell behind and `skipped` events were discarded. Subscribers
    /// must treat every node as possibly stale.
    EventsDropped {
        skipped: u64,
    },
    Error(ApiError),
}
