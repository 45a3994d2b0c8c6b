use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::join_all;
use shared::domain::{NodeId, StateKey};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::sync_client::SyncClient;

/// Host pipeline signals, narrowed to the nodes they concern when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// `None` when the host cannot say which nodes the run contains.
    Enqueued { node_ids: Option<Vec<NodeId>> },
    Started,
    Executed { node_id: Option<NodeId> },
    StateChanged {
        node_id: NodeId,
        state_key: StateKey,
        version: u64,
    },
}

/// Routes lifecycle signals to the live sync clients they concern.
#[derive(Default)]
pub struct ReconciliationScheduler {
    clients: Mutex<Vec<Weak<SyncClient>>>,
}

impl ReconciliationScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clients are held weakly; a dropped widget simply stops being reconciled.
    pub fn register(&self, client: &Arc<SyncClient>) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(client));
    }

    pub fn live_clients(&self) -> usize {
        self.matching(|_| true).len()
    }

    fn matching(&self, scope: impl Fn(&SyncClient) -> bool) -> Vec<Arc<SyncClient>> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.retain(|weak| weak.strong_count() > 0);
        clients
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|client| scope(&**client))
            .collect()
    }

    /// Applies one signal. Returns how many widgets were overwritten.
    pub async fn handle(&self, signal: LifecycleSignal) -> usize {
        match signal {
            LifecycleSignal::Enqueued { node_ids } => {
                let clients = self.matching(|client| in_scope(node_ids.as_deref(), client));
                debug!(clients = clients.len(), "run enqueued");
                join_all(clients.iter().map(|client| client.on_enqueued())).await;
                0
            }
            LifecycleSignal::Started => {
                for client in self.matching(|_| true) {
                    client.on_started();
                }
                0
            }
            LifecycleSignal::Executed { node_id } => {
                let scope = node_id.map(|id| vec![id]);
                let clients = self.matching(|client| in_scope(scope.as_deref(), client));
                let changed = join_all(clients.iter().map(|client| client.on_executed()))
                    .await
                    .into_iter()
                    .filter(|changed| *changed)
                    .count();
                if changed > 0 {
                    info!(reconciled = clients.len(), changed, "widgets reconciled");
                }
                changed
            }
            LifecycleSignal::StateChanged {
                node_id,
                state_key,
                version,
            } => {
                let clients = self.matching(|client| {
                    client.node_id() == &node_id
                        && client.state_key() == state_key
                        && client.is_behind(version)
                });
                join_all(clients.iter().map(|client| client.reconcile()))
                    .await
                    .into_iter()
                    .filter(|changed| *changed)
                    .count()
            }
        }
    }

    /// Consumes signals until the sender side closes. A lagging receiver
    /// reconciles everything since it cannot know what it missed.
    pub async fn run(self: Arc<Self>, mut signals: broadcast::Receiver<LifecycleSignal>) {
        loop {
            match signals.recv().await {
                Ok(signal) => {
                    self.handle(signal).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle signals dropped; reconciling all clients");
                    self.handle(LifecycleSignal::Executed { node_id: None }).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

fn in_scope(node_ids: Option<&[NodeId]>, client: &SyncClient) -> bool {
    node_ids.map_or(true, |ids| ids.contains(client.node_id()))
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
