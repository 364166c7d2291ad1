//! WebSocket endpoint the agent dials into.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tabpilot_config::RelayConfig;
use tabpilot_protocols::{PilotError, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::client::PilotClient;

/// Create the router: the agent socket at `path` plus a health check.
pub fn create_router(client: Arc<PilotClient>, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .route("/health", get(health_check))
        .with_state(client)
}

/// Bind `config.bind_addr()` and serve in the background. Returns the bound
/// address, which differs from the configured one when port 0 is used.
pub async fn serve(client: Arc<PilotClient>, config: &RelayConfig) -> Result<SocketAddr> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PilotError::Transport(format!("failed to bind {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| PilotError::Transport(e.to_string()))?;

    let router = create_router(client, &config.path);
    info!("waiting for agents at ws://{}{}", local, config.path);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("relay server error: {}", e);
        }
    });
    Ok(local)
}

async fn ws_handler(ws: WebSocketUpgrade, State(client): State<Arc<PilotClient>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client))
}

async fn health_check(State(client): State<Arc<PilotClient>>) -> impl IntoResponse {
    let state = client.state();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "ok",
            "agent_connected": client.is_connected(),
            "pending": client.channel().pending_count(),
            "current_url": state.current_url,
        })
        .to_string(),
    )
}

/// Pump one agent connection. A newer connection replaces this one; when
/// the socket ends everything still pending on it is rejected.
async fn handle_socket(socket: WebSocket, client: Arc<PilotClient>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let generation = client.attach_transport(outbound_tx);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    trace!(generation, "send: {}", text);
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        warn!(generation, "failed to send to agent: {}", e);
                        break;
                    }
                }
                // Replaced by a newer connection.
                None => break,
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    client.handle_inbound(text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(generation, "agent connection closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(generation, "agent socket error: {}", e);
                    break;
                }
            },
        }
    }

    client.detach_transport(generation);
    debug!(generation, "agent connection removed");
}
