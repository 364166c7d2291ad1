//! Typed command API over the correlated channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tabpilot_channel::{CorrelatedChannel, InboundOutcome};
use tabpilot_config::RelayConfig;
use tabpilot_protocols::{
    AgentResponse, BatchOperation, Command, Coordinate, PilotError, Result, ScrollDirection,
    TabSummary, Viewport,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::state::SessionState;

/// Orchestrator-side peer of one agent.
///
/// Transport code feeds raw inbound text through [`handle_inbound`] and
/// binds/unbinds the writer half with [`attach_transport`] and
/// [`detach_transport`]. Everything else is typed command calls.
///
/// [`handle_inbound`]: PilotClient::handle_inbound
/// [`attach_transport`]: PilotClient::attach_transport
/// [`detach_transport`]: PilotClient::detach_transport
pub struct PilotClient {
    channel: Arc<CorrelatedChannel>,
    state: RwLock<SessionState>,
    request_timeout: Duration,
    batch_timeout: Duration,
    generation: AtomicU64,
    connected: watch::Sender<bool>,
}

impl PilotClient {
    pub fn new(request_timeout: Duration, batch_timeout: Duration) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            channel: Arc::new(CorrelatedChannel::new()),
            state: RwLock::new(SessionState::default()),
            request_timeout,
            batch_timeout,
            generation: AtomicU64::new(0),
            connected,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.request_timeout(), config.batch_timeout())
    }

    pub fn channel(&self) -> &Arc<CorrelatedChannel> {
        &self.channel
    }

    pub fn state(&self) -> SessionState {
        let mut state = self.state.read().clone();
        if state.current_url.is_none() {
            state.current_url = self.channel.current_url();
        }
        state
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Bind a new agent connection. Returns its generation, which the
    /// transport hands back to [`detach_transport`](Self::detach_transport).
    pub fn attach_transport(&self, outbound: mpsc::UnboundedSender<String>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.channel.connect(outbound);
        self.connected.send_replace(true);
        info!(generation, "agent connected");
        generation
    }

    /// Tear down the connection of `generation`, rejecting everything still
    /// pending. A stale generation (already replaced) is ignored.
    pub fn detach_transport(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "ignoring teardown of a replaced connection");
            return;
        }
        let rejected = self.channel.disconnect();
        self.connected.send_replace(false);
        info!(generation, rejected, "agent disconnected");
    }

    /// Wait until an agent is connected.
    pub async fn wait_for_agent(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.connected.subscribe();
        let wait = rx.wait_for(|connected| *connected);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(PilotError::Disconnected),
            Err(_) => Err(PilotError::Timeout(format!(
                "no agent connected within {timeout:?}"
            ))),
        }
    }

    pub fn handle_inbound(&self, text: &str) -> InboundOutcome {
        let outcome = self.channel.handle_inbound(text);
        if let InboundOutcome::Unsolicited(response) = &outcome {
            if SessionState::is_viewport_sync(response) {
                debug!(viewport = ?response.viewport, "agent announced its viewport");
                self.state.write().record(response);
            } else {
                warn!(command = %response.command, "unsolicited message ignored");
            }
        }
        outcome
    }

    /// Send any command and return the agent's response, error responses
    /// included.
    pub async fn execute_raw(&self, command: &Command) -> Result<AgentResponse> {
        let timeout = match command {
            Command::Batch { .. } => self.batch_timeout,
            _ => self.request_timeout,
        };
        let response = self.channel.request(command, timeout).await?;
        self.state.write().record(&response);
        Ok(response)
    }

    /// Like [`execute_raw`](Self::execute_raw) but error responses become `Err`.
    pub async fn execute(&self, command: &Command) -> Result<AgentResponse> {
        self.execute_raw(command).await?.into_result()
    }

    pub async fn navigate(&self, url: &str) -> Result<AgentResponse> {
        self.execute(&Command::NavigateToUrl {
            url: url.to_string(),
        })
        .await
    }

    pub async fn click(&self, x: u32, y: u32) -> Result<AgentResponse> {
        self.execute(&Command::Click {
            coordinate: Coordinate::new(x, y),
        })
        .await
    }

    pub async fn type_text(&self, text: &str) -> Result<AgentResponse> {
        self.execute(&Command::Type {
            text: text.to_string(),
        })
        .await
    }

    pub async fn press_key(&self, key: &str) -> Result<AgentResponse> {
        self.execute(&Command::PressKey {
            key: key.to_string(),
        })
        .await
    }

    /// `combination` looks like `"Control+Shift+T"`.
    pub async fn press_key_combination(&self, combination: &str) -> Result<AgentResponse> {
        self.execute(&Command::PressKeyCombination {
            combination: combination.parse()?,
        })
        .await
    }

    pub async fn scroll(&self, direction: ScrollDirection, selector: Option<&str>) -> Result<AgentResponse> {
        self.execute(&Command::Scroll {
            direction,
            selector: selector.map(str::to_string),
        })
        .await
    }

    pub async fn screenshot(&self) -> Result<AgentResponse> {
        self.execute(&Command::TakeScreenshot).await
    }

    pub async fn area_screenshot(&self, top_left: Coordinate, bottom_right: Coordinate) -> Result<AgentResponse> {
        self.execute(&Command::TakeAreaScreenshot {
            top_left,
            bottom_right,
        })
        .await
    }

    pub async fn full_html(&self) -> Result<String> {
        let response = self.execute(&Command::GetFullHtml).await?;
        response
            .html_content
            .ok_or_else(|| PilotError::CommandFailed("agent returned no HTML".to_string()))
    }

    pub async fn wait(&self, seconds: f64) -> Result<AgentResponse> {
        self.execute(&Command::Wait { seconds }).await
    }

    pub async fn list_tabs(&self) -> Result<Vec<TabSummary>> {
        let response = self.execute(&Command::ListTabs).await?;
        Ok(response.tabs.unwrap_or_default())
    }

    pub async fn new_tab(&self, url: Option<&str>) -> Result<AgentResponse> {
        self.execute(&Command::NewTab {
            url: url.map(str::to_string),
        })
        .await
    }

    pub async fn select_tab(&self, index: usize) -> Result<AgentResponse> {
        self.execute(&Command::SelectTab { index }).await
    }

    pub async fn close_tab(&self, index: Option<usize>) -> Result<AgentResponse> {
        self.execute(&Command::CloseTab { index }).await
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<AgentResponse> {
        let viewport = Viewport::new(width, height);
        if viewport.width == 0 || viewport.height == 0 {
            return Err(PilotError::InvalidParameter(
                "viewport width and height must be positive".to_string(),
            ));
        }
        self.execute(&Command::SetViewportConfig { viewport }).await
    }

    /// Run a batch. Step failures come back inside the response, so this
    /// returns the raw response rather than converting the error status.
    pub async fn batch(&self, operations: Vec<BatchOperation>, interval_ms: Option<u64>) -> Result<AgentResponse> {
        self.execute_raw(&Command::Batch {
            operations,
            interval_ms,
        })
        .await
    }

    pub async fn close(&self) -> Result<AgentResponse> {
        self.execute(&Command::Close).await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
