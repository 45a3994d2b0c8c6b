use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use shared::protocol::ServerEvent;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::scheduler::LifecycleSignal;

pub fn signal_for(event: &ServerEvent) -> Option<LifecycleSignal> {
    match event {
        ServerEvent::RunEnqueued { node_ids, .. } => Some(LifecycleSignal::Enqueued {
            node_ids: Some(node_ids.clone()),
        }),
        ServerEvent::RunStarted { .. } => Some(LifecycleSignal::Started),
        ServerEvent::NodeExecuted { node_id, .. } => Some(LifecycleSignal::Executed {
            node_id: Some(node_id.clone()),
        }),
        ServerEvent::StateChanged {
            node_id,
            state_key,
            version,
        } => Some(LifecycleSignal::StateChanged {
            node_id: node_id.clone(),
            state_key: *state_key,
            version: *version,
        }),
        ServerEvent::EventsDropped { .. } => Some(LifecycleSignal::Executed { node_id: None }),
        ServerEvent::Error(_) => None,
    }
}

pub fn websocket_url(server_url: &str) -> Result<String> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    Ok(format!("{ws_url}/ws"))
}

/// Subscribes to the server event feed and republishes it as lifecycle signals.
pub async fn spawn_signal_bridge(
    server_url: &str,
    signals: broadcast::Sender<LifecycleSignal>,
) -> Result<JoinHandle<()>> {
    let ws_url = websocket_url(server_url)?;
    let (ws_stream, _) = connect_async(&ws_url)
        .await
        .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
    let (_, mut ws_reader) = ws_stream.split();
    info!(%ws_url, "event feed connected");

    Ok(tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::Error(err)) => {
                        warn!(code = ?err.code, message = %err.message, "server reported error");
                    }
                    Ok(event) => {
                        if let Some(signal) = signal_for(&event) {
                            let _ = signals.send(signal);
                        }
                    }
                    Err(err) => warn!(error = %err, "invalid server event"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "websocket receive failed");
                    break;
                }
            }
        }
        info!("event feed closed");
    }))
}
