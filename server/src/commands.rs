//! Command relay for robots: clients hold a WebSocket open on `/ws/commands`
//! and receive every command posted to `/commands` as a text message.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CommandQuery {
    cmd: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandReport {
    pub sent: String,
    pub clients: usize,
    pub removed_dead: usize,
}

/// POST /commands?cmd=... or a JSON array/object body.
pub async fn broadcast_command(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CommandQuery>,
    body: Bytes,
) -> Result<Json<CommandReport>, RelayError> {
    let command = resolve_command(query.cmd.as_deref(), &body).ok_or_else(|| {
        RelayError::BadRequest("Missing cmd (provide ?cmd=... or JSON body)".into())
    })?;

    let report = state.commands.broadcast(command.clone()).await;
    info!(
        command = %command,
        clients = report.targets,
        removed_dead = report.evicted,
        "command broadcast"
    );
    Ok(Json(CommandReport {
        sent: command,
        clients: report.targets,
        removed_dead: report.evicted,
    }))
}

/// A non-empty `cmd` query parameter wins; otherwise a JSON array or object
/// body is re-serialized compactly. Anything else yields no command.
fn resolve_command(query: Option<&str>, body: &[u8]) -> Option<String> {
    if let Some(cmd) = query.filter(|c| !c.is_empty()) {
        return Some(cmd.to_string());
    }
    match serde_json::from_slice::<Value>(body).ok()? {
        value @ (Value::Array(_) | Value::Object(_)) => serde_json::to_string(&value).ok(),
        _ => None,
    }
}

/// GET /ws/commands
pub async fn command_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| command_session(socket, state))
}

async fn command_session(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.commands.subscribe();
    let client = subscription.id();
    let mut shutdown = state.shutdown_listener();
    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|closing| *closing).await; } => {
                let _ = outbound.send(Message::Close(None)).await;
                break;
            }
            command = subscription.recv() => {
                let Some(command) = command else { break };
                if outbound.send(Message::Text(command)).await.is_err() {
                    break;
                }
            }
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => debug!(client, text = %text, "command client message"),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
