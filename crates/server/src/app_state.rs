use server_api::ApiContext;
use shared::protocol::ServerEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub api: ApiContext,
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub fn new(api: ApiContext, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self { api, events }
    }

    /// Fire-and-forget; having no subscribers is not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}
