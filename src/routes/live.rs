//! Live observer channel: a WebSocket through which dashboards receive the
//! pipeline's push events. Observers pick their scope by joining a session
//! channel, the global channel, or both.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WsIncoming {
    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LeaveSession { session_id: Uuid },
    JoinGlobal,
    Ping,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WsOutgoing {
    #[serde(rename_all = "camelCase")]
    Connected { observer_id: Uuid },
    Pong,
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (observer_id, mut events) = state.broadcaster.subscribe();
    let (mut sender, mut receiver) = socket.split();

    tracing::debug!(%observer_id, "live observer connected");

    let connected = WsOutgoing::Connected { observer_id };
    if let Ok(json) = serde_json::to_string(&connected) {
        let _ = sender.send(WsMessage::Text(json)).await;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(%observer_id, error = %e, "failed to serialize live event"),
                }
            }
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    WsMessage::Text(text) => {
                        match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(WsIncoming::JoinSession { session_id }) => {
                                state.broadcaster.join_session(observer_id, session_id);
                            }
                            Ok(WsIncoming::LeaveSession { session_id }) => {
                                state.broadcaster.leave_session(observer_id, session_id);
                            }
                            Ok(WsIncoming::JoinGlobal) => {
                                state.broadcaster.join_global(observer_id);
                            }
                            Ok(WsIncoming::Ping) => {
                                if let Ok(json) = serde_json::to_string(&WsOutgoing::Pong) {
                                    let _ = sender.send(WsMessage::Text(json)).await;
                                }
                            }
                            Err(e) => {
                                let error = WsOutgoing::Error {
                                    message: format!("Invalid message format: {}", e),
                                };
                                if let Ok(json) = serde_json::to_string(&error) {
                                    let _ = sender.send(WsMessage::Text(json)).await;
                                }
                            }
                        }
                    }
                    WsMessage::Ping(data) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.broadcaster.unsubscribe(observer_id);
    tracing::debug!(%observer_id, "live observer disconnected");
}
