//! Per-widget synchronization: an optimistic mirror of one stored entry,
//! written through to the store in submission order and reconciled against
//! it at run boundaries.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use shared::domain::{CounterMode, CounterRange, NodeId, NodeStateEntry, StateKey, StateValue};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    retry::RetryPolicy,
    settings::SyncSettings,
    transport::StateTransport,
    widget::{ChangeOrigin, Widget},
};

/// When a counter's policy is applied relative to a run. Fixed per node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvanceTrigger {
    /// The client asks the store to advance as soon as the run is enqueued.
    OnEnqueue,
    /// The executor advances after using the value.
    #[default]
    ByExecutor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    #[default]
    Idle,
    Enqueued,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOptions {
    pub trigger: AdvanceTrigger,
    pub mode: CounterMode,
    pub range: Option<CounterRange>,
}

#[derive(Debug)]
struct Mirror {
    value: StateValue,
    version: u64,
}

/// State shared with the background writer. Holds no sender so the writer
/// stops once the client is gone.
struct WriteCore {
    node_id: NodeId,
    transport: Arc<dyn StateTransport>,
    retry: RetryPolicy,
    mirror: Mutex<Mirror>,
    pending: watch::Sender<usize>,
}

impl WriteCore {
    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_writes(&self) -> usize {
        *self.pending.borrow()
    }

    fn finish_write(&self, version: Option<u64>) {
        let mut mirror = self.mirror();
        if let Some(version) = version {
            mirror.version = mirror.version.max(version);
        }
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn flush(&self, value: StateValue) {
        let node_id = &self.node_id;
        let transport = &self.transport;
        let value = &value;
        match self
            .retry
            .run("set", node_id, move || transport.set(node_id, value))
            .await
        {
            Ok(version) => {
                debug!(node_id = %node_id, state_key = %value.key(), version, "write flushed");
                self.finish_write(Some(version));
            }
            // Already logged; the widget keeps its optimistic value.
            Err(_) => self.finish_write(None),
        }
    }
}

async fn write_loop(
    core: Arc<WriteCore>,
    mut writes: mpsc::UnboundedReceiver<StateValue>,
    debounce: Option<Duration>,
) {
    while let Some(mut value) = writes.recv().await {
        if let Some(window) = debounce {
            while let Ok(Some(next)) = tokio::time::timeout(window, writes.recv()).await {
                core.finish_write(None);
                value = next;
            }
        }
        core.flush(value).await;
    }
}

pub struct SyncClient {
    state_key: StateKey,
    widget: Arc<dyn Widget>,
    core: Arc<WriteCore>,
    writes: mpsc::UnboundedSender<StateValue>,
    trigger: AdvanceTrigger,
    range: Option<CounterRange>,
    mode: Mutex<CounterMode>,
    phase: Mutex<LifecyclePhase>,
    /// Set once a stored entry has been applied. Until then the widget may
    /// still show its own placeholder, so the first accepted read is forced.
    synced: AtomicBool,
}

impl SyncClient {
    /// Binds a widget to `(node_id, state_key)` and loads the stored value
    /// before returning, so the widget never shows a stale default while editable.
    pub async fn attach(
        node_id: NodeId,
        state_key: StateKey,
        widget: Arc<dyn Widget>,
        transport: Arc<dyn StateTransport>,
        settings: &SyncSettings,
        options: SyncOptions,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        let core = Arc::new(WriteCore {
            node_id,
            transport,
            retry: settings.retry_policy(),
            mirror: Mutex::new(Mirror {
                value: state_key.default_value(),
                version: 0,
            }),
            pending,
        });

        // Keystroke-driven text is debounced; counter clicks go out immediately.
        let debounce = (state_key == StateKey::CacheText).then(|| settings.debounce());
        tokio::spawn(write_loop(Arc::clone(&core), rx, debounce));

        let client = Arc::new(Self {
            state_key,
            widget,
            core,
            writes: tx,
            trigger: options.trigger,
            range: options.range,
            mode: Mutex::new(options.mode),
            phase: Mutex::new(LifecyclePhase::Idle),
            synced: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&client);
        client.widget.observe(Arc::new(move |value: &StateValue, origin: ChangeOrigin| {
            if origin != ChangeOrigin::User {
                return;
            }
            if let Some(client) = weak.upgrade() {
                client.record_edit(value.clone());
            }
        }));

        client.initialize().await;
        client
    }

    pub fn node_id(&self) -> &NodeId {
        &self.core.node_id
    }

    pub fn state_key(&self) -> StateKey {
        self.state_key
    }

    pub fn mirror_value(&self) -> StateValue {
        self.core.mirror().value.clone()
    }

    pub fn mirror_version(&self) -> u64 {
        self.core.mirror().version
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> CounterMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: CounterMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn range(&self) -> Option<CounterRange> {
        self.range
    }

    /// Mode the executor should apply after using the value, if this node
    /// leaves advancing to the executor.
    pub fn executor_advance(&self) -> Option<CounterMode> {
        let mode = self.mode();
        (self.state_key == StateKey::Counter
            && self.trigger == AdvanceTrigger::ByExecutor
            && mode != CounterMode::Fixed)
            .then_some(mode)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.core.pending_writes() > 0
    }

    /// Resolves once every submitted write has been flushed or given up on.
    pub async fn wait_for_writes(&self) {
        let mut pending = self.core.pending.subscribe();
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    pub async fn initialize(&self) {
        match self.fetch().await {
            Some(entry) => {
                self.apply(entry, true);
            }
            None => warn!(
                node_id = %self.core.node_id,
                state_key = %self.state_key,
                "initial read failed; showing default until next reconcile"
            ),
        }
    }

    /// Optimistic edit: the widget and mirror change now, the store later.
    pub fn on_user_edit(&self, value: StateValue) {
        self.widget.set_value(value, ChangeOrigin::User);
    }

    /// Re-reads the store and overwrites the widget only when the stored value
    /// differs from the mirror. Returns whether the widget changed.
    pub async fn reconcile(&self) -> bool {
        if self.has_pending_writes() {
            debug!(node_id = %self.core.node_id, "reconcile skipped; local writes pending");
            return false;
        }
        match self.fetch().await {
            Some(entry) => self.apply(entry, false),
            None => false,
        }
    }

    pub(crate) async fn on_enqueued(&self) {
        self.set_phase(LifecyclePhase::Enqueued);

        let mode = self.mode();
        if self.state_key != StateKey::Counter
            || self.trigger != AdvanceTrigger::OnEnqueue
            || mode == CounterMode::Fixed
        {
            return;
        }

        // An in-flight edit would otherwise land on top of the advanced value.
        self.wait_for_writes().await;

        // Not retried: a lost response may still have advanced the counter.
        match self
            .core
            .transport
            .advance_counter(&self.core.node_id, mode, self.range)
            .await
        {
            Ok(entry) => {
                info!(
                    node_id = %self.core.node_id,
                    %mode,
                    version = entry.version,
                    "counter advanced on enqueue"
                );
                self.apply(entry, false);
            }
            Err(err) => warn!(
                node_id = %self.core.node_id,
                %mode,
                error = %err,
                "advance on enqueue failed"
            ),
        }
    }

    pub(crate) fn on_started(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == LifecyclePhase::Enqueued {
            *phase = LifecyclePhase::Executing;
        }
    }

    pub(crate) async fn on_executed(&self) -> bool {
        let changed = self.reconcile().await;
        self.set_phase(LifecyclePhase::Idle);
        changed
    }

    pub(crate) fn is_behind(&self, version: u64) -> bool {
        self.core.mirror().version < version
    }

    fn set_phase(&self, next: LifecyclePhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn record_edit(&self, value: StateValue) {
        if value.key() != self.state_key {
            warn!(
                node_id = %self.core.node_id,
                expected = %self.state_key,
                got = %value.key(),
                "ignoring edit of the wrong kind"
            );
            return;
        }

        {
            let mut mirror = self.core.mirror();
            if mirror.value == value {
                return;
            }
            mirror.value = value.clone();
            self.core.pending.send_modify(|n| *n += 1);
        }

        if self.writes.send(value).is_err() {
            warn!(node_id = %self.core.node_id, "writer stopped; edit kept locally");
            self.core.finish_write(None);
        }
    }

    async fn fetch(&self) -> Option<NodeStateEntry> {
        let node_id = &self.core.node_id;
        let transport = &self.core.transport;
        let state_key = self.state_key;
        self.core
            .retry
            .run("get", node_id, move || transport.get(node_id, state_key))
            .await
            .ok()
    }

    /// Merges an authoritative entry into the mirror. Older versions and
    /// reads racing local edits are dropped.
    fn apply(&self, entry: NodeStateEntry, force: bool) -> bool {
        let value = {
            let mut mirror = self.core.mirror();
            if self.core.pending_writes() > 0 {
                debug!(node_id = %self.core.node_id, "keeping optimistic value");
                return false;
            }
            if entry.version < mirror.version {
                debug!(
                    node_id = %self.core.node_id,
                    stale = entry.version,
                    current = mirror.version,
                    "dropping stale read"
                );
                return false;
            }
            mirror.version = entry.version;
            let first_sync = !self.synced.swap(true, Ordering::SeqCst);
            if mirror.value == entry.value && !force && !first_sync {
                return false;
            }
            mirror.value = entry.value.clone();
            entry.value
        };
        self.widget.set_value(value, ChangeOrigin::Sync);
        true
    }
}

#[cfg(test)]
#[path = "tests/sync_client_tests.rs"]
mod tests;
