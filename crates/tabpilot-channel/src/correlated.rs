//! The correlated channel itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tabpilot_protocols::{AgentResponse, Command, Envelope, PilotError, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::pending::{PendingEntry, PendingMap};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Completed the pending request with this correlation id.
    Resolved(u64),
    /// A control message nobody was waiting for.
    Unsolicited(AgentResponse),
    /// Unparseable, late or duplicate.
    Dropped,
}

/// Handle to one outstanding request.
///
/// Dropping a ticket without awaiting it removes its pending entry.
pub struct Ticket {
    pub request_id: u64,
    pub command: String,
    rx: Option<oneshot::Receiver<Result<AgentResponse>>>,
    pending: Arc<Mutex<PendingMap>>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.pending.lock().remove(self.request_id).is_some() {
            debug!(request_id = self.request_id, "removed abandoned pending request");
        }
    }
}

/// Orchestrator-side request/response correlation over any text transport.
pub struct CorrelatedChannel {
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    /// Writer half of the live transport; `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    current_url: RwLock<Option<String>>,
}

impl Default for CorrelatedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelatedChannel {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(PendingMap::default())),
            outbound: Mutex::new(None),
            current_url: RwLock::new(None),
        }
    }

    /// Bind a fresh transport. Anything still pending from a previous
    /// connection is rejected first.
    pub fn connect(&self, outbound: mpsc::UnboundedSender<String>) {
        self.disconnect();
        *self.outbound.lock() = Some(outbound);
        debug!("correlated channel connected");
    }

    /// Transport lost: reject every pending request with `Disconnected`.
    pub fn disconnect(&self) -> usize {
        let had_transport = self.outbound.lock().take().is_some();
        let drained = self.pending.lock().drain();
        let count = drained.len();
        for (id, entry) in drained {
            trace!(request_id = id, command = %entry.command, "rejecting on disconnect");
            entry.complete(Err(PilotError::Disconnected));
        }
        if had_transport || count > 0 {
            debug!(rejected = count, "correlated channel disconnected");
        }
        count
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, request_id: u64) -> bool {
        self.pending.lock().contains(request_id)
    }

    /// Last URL reported by any resolved response.
    pub fn current_url(&self) -> Option<String> {
        self.current_url.read().clone()
    }

    /// Send `payload` under `command_name` with a fresh correlation id.
    pub fn send(&self, command_name: &str, payload: Map<String, Value>) -> Result<Ticket> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(PilotError::Disconnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = Envelope::new(id, command_name, payload).to_json()?;

        let (done_tx, done_rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(id, PendingEntry::new(command_name, done_tx));

        trace!(request_id = id, command = command_name, "send: {}", json);
        if tx.send(json).is_err() {
            self.pending.lock().remove(id);
            return Err(PilotError::Disconnected);
        }

        Ok(Ticket {
            request_id: id,
            command: command_name.to_string(),
            rx: Some(done_rx),
            pending: Arc::clone(&self.pending),
        })
    }

    pub fn send_command(&self, command: &Command) -> Result<Ticket> {
        self.send(command.name(), command.to_payload())
    }

    /// Wait for the ticket's response, failing with `Timeout` after `timeout`.
    pub async fn await_response(&self, mut ticket: Ticket, timeout: Duration) -> Result<AgentResponse> {
        let rx = ticket
            .rx
            .take()
            .ok_or_else(|| PilotError::Transport("ticket already awaited".to_string()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PilotError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(ticket.request_id);
                warn!(
                    request_id = ticket.request_id,
                    command = %ticket.command,
                    "no response within {:?}",
                    timeout
                );
                Err(PilotError::Timeout(format!(
                    "{} (request {}) got no response within {}ms",
                    ticket.command,
                    ticket.request_id,
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Send a command and wait for its response.
    pub async fn request(&self, command: &Command, timeout: Duration) -> Result<AgentResponse> {
        let ticket = self.send_command(command)?;
        self.await_response(ticket, timeout).await
    }

    /// Feed one raw inbound message from the transport.
    pub fn handle_inbound(&self, text: &str) -> InboundOutcome {
        match AgentResponse::from_json(text) {
            Ok(response) => self.handle_response(response),
            Err(e) => {
                warn!("dropping unparseable message: {}", e);
                InboundOutcome::Dropped
            }
        }
    }

    pub fn handle_response(&self, response: AgentResponse) -> InboundOutcome {
        let id = match response.request_id {
            Some(id) => id,
            None => match self.pending.lock().newest_matching(&response.command) {
                Some(id) => {
                    debug!(request_id = id, command = %response.command, "matched uncorrelated message by command name");
                    id
                }
                None => return InboundOutcome::Unsolicited(response),
            },
        };

        let Some(entry) = self.pending.lock().remove(id) else {
            debug!(request_id = id, command = %response.command, "dropping late or duplicate response");
            return InboundOutcome::Dropped;
        };

        if let Some(url) = response.current_url.as_ref().filter(|u| !u.is_empty()) {
            *self.current_url.write() = Some(url.clone());
        }

        trace!(
            request_id = id,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "resolved"
        );
        if !entry.complete(Ok(response)) {
            debug!(request_id = id, "caller stopped waiting before the response arrived");
        }
        InboundOutcome::Resolved(id)
    }
}

#[cfg(test)]
#[path = "correlated_tests.rs"]
mod tests;
