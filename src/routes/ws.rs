// WebSocket notification stream: each connected UI client is one more observer

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::event::Notification;
use crate::resource::ResourceSnapshot;

const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the connection count on drop (connect = +1, drop = -1).
struct WsConnectionGuard(Arc<AtomicUsize>);

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}

pub(super) async fn ws_notifications(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tx = state.notify_tx.clone();
    let conn_count = state.ws_connections.clone();
    let catalog = state.catalog.clone();
    ws.on_upgrade(move |socket| async move {
        // Subscribe before taking the snapshot so no notification falls in between.
        let mut rx = tx.subscribe();
        let snapshots = match catalog.snapshots(None).await {
            Ok(s) => s,
            Err(e) => {
                tracing::info!("Notification stream unavailable: {}", e);
                return;
            }
        };
        if let Err(e) = stream_notifications(socket, &mut rx, conn_count, snapshots).await {
            tracing::info!("Notification stream error: {}", e);
        }
    })
}

async fn stream_notifications(
    socket: WebSocket,
    rx: &mut broadcast::Receiver<Notification>,
    conn_count: Arc<AtomicUsize>,
    snapshots: Vec<ResourceSnapshot>,
) -> anyhow::Result<()> {
    conn_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let _guard = WsConnectionGuard(conn_count);
    tracing::info!("Client connected to notification stream");

    let (mut sender, mut receiver) = socket.split();

    let welcome = serde_json::json!({ "event": "snapshot", "resources": snapshots });
    let welcome_json = serde_json::to_string(&welcome)?;
    let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Text(welcome_json.into()))).await;
    if r.is_err() || r.unwrap_or(Ok(())).is_err() {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(notification) => {
                        let json = serde_json::to_string(&notification)?;
                        let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Text(json.into()))).await;
                        if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/notifications client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("Client disconnected from notification stream");
    Ok(())
}
