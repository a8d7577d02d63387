//! `GET /dashboard/ws` — the fan-out hub (C8). Each connection gets its own
//! subscription to the orchestrator's broadcast stream; the channel's fixed
//! capacity (`gateway.dashboard_ws_buffer`) is the "per-client bounded
//! buffer", and a client that falls behind sees `RecvError::Lagged` and is
//! disconnected rather than buffered further.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use pipeline_orchestrator::DashboardEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::state::AppState;

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.orchestrator.subscribe();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.trim() == "snapshot" => {
                        let states = state.orchestrator.list().await;
                        for snapshot in states.into_iter().filter(|s| !s.terminal) {
                            let Ok(text) = serde_json::to_string(&DashboardEvent::Snapshot { state: snapshot }) else {
                                continue;
                            };
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dashboard client fell behind, disconnecting");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
