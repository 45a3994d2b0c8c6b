//! Client side of node-scoped state sync: widgets mirror stored state
//! optimistically and are reconciled against the store at run boundaries.

pub mod error;
pub mod events;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod sync_client;
pub mod transport;
pub mod widget;

pub use error::TransportError;
pub use events::{signal_for, spawn_signal_bridge};
pub use retry::RetryPolicy;
pub use scheduler::{LifecycleSignal, ReconciliationScheduler};
pub use settings::SyncSettings;
pub use sync_client::{AdvanceTrigger, LifecyclePhase, SyncClient, SyncOptions};
pub use transport::{HttpStateTransport, StateTransport};
pub use widget::{ChangeOrigin, MemoryWidget, Widget, WidgetObserver};

#[cfg(test)]
#[path = "tests/fake_transport.rs"]
mod fake_transport;
