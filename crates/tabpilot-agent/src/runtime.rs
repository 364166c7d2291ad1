//! Agent connection loop.
//!
//! The agent dials the orchestrator, runs every inbound envelope through
//! the [`Coordinator`] and writes the responses back. The socket itself is
//! only bridged to a pair of string queues; [`serve_connection`] works on
//! those queues and is what the tests drive.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tabpilot_config::AgentConfig;
use tabpilot_protocols::{AgentResponse, Envelope, PilotError, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::coordinator::Coordinator;

pub struct AgentRuntime {
    config: AgentConfig,
    coordinator: Arc<Coordinator>,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Connect, serve until the socket drops, reconnect after a delay.
    ///
    /// Returns once `max_reconnect_attempts` consecutive attempts have failed
    /// (never, when it is 0).
    pub async fn run(&self) -> Result<()> {
        let _pump = self.coordinator.spawn_event_pump();
        let mut failures: u32 = 0;

        loop {
            match self.connect_once().await {
                Ok(()) => {
                    failures = 0;
                    info!("orchestrator connection closed");
                }
                Err(e) => {
                    failures += 1;
                    warn!(attempt = failures, "connection to {} failed: {}", self.config.orchestrator_url, e);
                    if self.config.max_reconnect_attempts > 0 && failures >= self.config.max_reconnect_attempts {
                        error!("giving up after {} failed attempts", failures);
                        return Err(e);
                    }
                }
            }
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let url = self.config.orchestrator_url.as_str();
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| PilotError::Transport(format!("websocket {url}: {e}")))?;
        info!("connected to orchestrator at {}", url);

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let serve = tokio::spawn(serve_connection(
            self.coordinator.clone(),
            inbound_rx,
            outbound_tx,
        ));

        loop {
            tokio::select! {
                msg = ws_source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!("recv: {}", text.as_str());
                        if inbound_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket error: {}", e);
                        break;
                    }
                },
                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                        warn!("failed to send response: {}", e);
                        break;
                    }
                }
            }
        }

        drop(inbound_tx);
        if let Err(e) = serve.await {
            warn!("connection task ended abnormally: {}", e);
        }
        let _ = ws_sink.close().await;
        Ok(())
    }
}

/// Serve one orchestrator connection.
///
/// Announces the configured viewport, answers each envelope on its own task
/// and resets the coordinator once `inbound` ends.
pub async fn serve_connection(
    coordinator: Arc<Coordinator>,
    mut inbound: UnboundedReceiver<String>,
    outbound: UnboundedSender<String>,
) {
    if let Some(viewport) = coordinator.viewport() {
        send(&outbound, &AgentResponse::viewport_sync(viewport));
    }

    let mut tasks = Vec::new();
    while let Some(text) = inbound.recv().await {
        let envelope = match Envelope::from_json(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping malformed envelope: {}", e);
                continue;
            }
        };
        let coordinator = coordinator.clone();
        let outbound = outbound.clone();
        tasks.push(tokio::spawn(async move {
            handle_message(&coordinator, &envelope, &outbound).await;
        }));
        tasks.retain(|task| !task.is_finished());
    }

    debug!(in_flight = tasks.len(), "inbound closed");
    for task in tasks {
        task.abort();
    }
    coordinator.on_disconnect().await;
}

async fn handle_message(coordinator: &Coordinator, envelope: &Envelope, outbound: &UnboundedSender<String>) {
    // Batches may change the viewport too, so compare instead of matching names.
    let before = coordinator.viewport();
    let response = coordinator.handle_envelope(envelope).await;
    let after = coordinator.viewport();
    send(outbound, &response);

    if after != before {
        if let Some(viewport) = after {
            send(outbound, &AgentResponse::viewport_sync(viewport));
        }
    }
}

fn send(outbound: &UnboundedSender<String>, response: &AgentResponse) {
    match response.to_json() {
        Ok(text) => {
            if outbound.send(text).is_err() {
                debug!(command = %response.command, "connection gone, response dropped");
            }
        }
        Err(e) => error!(command = %response.command, "failed to serialize response: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tabpilot_protocols::{ErrorKind, ResponseStatus, Viewport, VIEWPORT_SYNC};

    use crate::testing::{fast_timing, ScriptedHost};

    struct Harness {
        host: Arc<ScriptedHost>,
        coordinator: Arc<Coordinator>,
        to_agent: UnboundedSender<String>,
        from_agent: UnboundedReceiver<String>,
        serve: tokio::task::JoinHandle<()>,
    }

    fn harness(viewport: Option<Viewport>) -> Harness {
        let host = Arc::new(ScriptedHost::new());
        host.add_page("https://start.test");
        let coordinator = Arc::new(Coordinator::new(host.clone(), fast_timing(), viewport));
        coordinator.spawn_event_pump();
        let (to_agent, inbound) = mpsc::unbounded_channel();
        let (outbound, from_agent) = mpsc::unbounded_channel();
        let serve = tokio::spawn(serve_connection(coordinator.clone(), inbound, outbound));
        Harness {
            host,
            coordinator,
            to_agent,
            from_agent,
            serve,
        }
    }

    async fn next_response(rx: &mut UnboundedReceiver<String>) -> AgentResponse {
        let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        AgentResponse::from_json(&text).unwrap()
    }

    fn envelope(id: u64, command: &str, payload: serde_json::Value) -> String {
        let payload = payload.as_object().cloned().unwrap_or_default();
        Envelope::new(id, command, payload).to_json().unwrap()
    }

    #[tokio::test]
    async fn test_response_carries_request_id() {
        let mut h = harness(None);
        h.to_agent
            .send(envelope(3, "takeScreenshot", json!({})))
            .unwrap();

        let response = next_response(&mut h.from_agent).await;
        assert_eq!(response.request_id, Some(3));
        assert_eq!(response.status, ResponseStatus::Success);
        assert!(response.screenshot.is_some());
    }

    #[tokio::test]
    async fn test_announces_viewport_on_connect() {
        let mut h = harness(Some(Viewport::new(800, 600)));
        let sync = next_response(&mut h.from_agent).await;
        assert_eq!(sync.command, VIEWPORT_SYNC);
        assert_eq!(sync.request_id, None);
        assert_eq!(sync.viewport, Some(Viewport::new(800, 600)));
    }

    #[tokio::test]
    async fn test_viewport_change_is_followed_by_sync() {
        let mut h = harness(None);
        h.to_agent
            .send(envelope(
                1,
                "setViewportConfig",
                json!({"viewport": {"width": 1024, "height": 768}}),
            ))
            .unwrap();

        let ack = next_response(&mut h.from_agent).await;
        assert_eq!(ack.request_id, Some(1));
        let sync = next_response(&mut h.from_agent).await;
        assert_eq!(sync.command, VIEWPORT_SYNC);
        assert_eq!(sync.viewport, Some(Viewport::new(1024, 768)));
    }

    #[tokio::test]
    async fn test_viewport_change_inside_batch_is_followed_by_sync() {
        let mut h = harness(None);
        h.to_agent
            .send(envelope(
                2,
                "batch",
                json!({"operations": [
                    {"name": "setViewportConfig", "parameters": {"viewport": {"width": 900, "height": 700}}},
                    {"name": "wait", "parameters": {"seconds": 0.01}}
                ]}),
            ))
            .unwrap();

        let done = next_response(&mut h.from_agent).await;
        assert_eq!(done.request_id, Some(2));
        let sync = next_response(&mut h.from_agent).await;
        assert_eq!(sync.command, VIEWPORT_SYNC);
        assert_eq!(sync.viewport, Some(Viewport::new(900, 700)));
    }

    #[tokio::test]
    async fn test_unchanged_viewport_sends_no_sync() {
        let mut h = harness(Some(Viewport::new(800, 600)));
        next_response(&mut h.from_agent).await;
        h.to_agent
            .send(envelope(
                1,
                "setViewportConfig",
                json!({"viewport": {"width": 800, "height": 600}}),
            ))
            .unwrap();
        h.to_agent.send(envelope(2, "listTabs", json!({}))).unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let response = next_response(&mut h.from_agent).await;
            assert_ne!(response.command, VIEWPORT_SYNC);
            ids.push(response.request_id);
        }
        ids.sort();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_malformed_input_is_dropped() {
        let mut h = harness(None);
        h.to_agent.send("{not json".to_string()).unwrap();
        h.to_agent.send(envelope(9, "listTabs", json!({}))).unwrap();

        let response = next_response(&mut h.from_agent).await;
        assert_eq!(response.request_id, Some(9));
        assert_eq!(response.tabs.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_answers_with_error() {
        let mut h = harness(None);
        h.to_agent.send(envelope(4, "fly", json!({}))).unwrap();

        let response = next_response(&mut h.from_agent).await;
        assert_eq!(response.request_id, Some(4));
        assert_eq!(response.error_kind, Some(ErrorKind::UnknownCommand));
    }

    #[tokio::test]
    async fn test_disconnect_releases_session() {
        let mut h = harness(None);
        h.to_agent
            .send(envelope(1, "takeScreenshot", json!({})))
            .unwrap();
        next_response(&mut h.from_agent).await;
        assert!(h.host.attached().is_some());

        drop(h.to_agent);
        h.serve.await.unwrap();
        assert!(h.host.attached().is_none());
        assert!(h.coordinator.attached_target().is_none());
    }
}
