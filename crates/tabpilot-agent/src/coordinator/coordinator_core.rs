//! Coordinator core: struct definition, command entry points, busy-state
//! guard and host event bookkeeping.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tabpilot_config::TimingConfig;
use tabpilot_protocols::{
    AgentResponse, BrowserHost, Command, Envelope, HostEvent, PilotError, Result, TabSummary,
    Viewport,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{TargetProcessingState, TargetRegistry};
use crate::session::{AttachStatus, InstrumentationSessionManager};
use crate::stability::StabilityDetector;

/// Owns the target registry, the instrumentation session and the timers.
pub struct Coordinator {
    pub(crate) host: Arc<dyn BrowserHost>,
    pub(crate) registry: Mutex<TargetRegistry>,
    pub(crate) sessions: InstrumentationSessionManager,
    pub(crate) detector: StabilityDetector,
    pub(crate) timing: TimingConfig,
    pub(crate) viewport: RwLock<Option<Viewport>>,
    /// Serializes top-level commands.
    gate: tokio::sync::Mutex<()>,
    /// Signalled on every processing-state change.
    state_changed: Notify,
}

impl Coordinator {
    pub fn new(host: Arc<dyn BrowserHost>, timing: TimingConfig, viewport: Option<Viewport>) -> Self {
        Self {
            registry: Mutex::new(TargetRegistry::new(timing.busy_wait())),
            sessions: InstrumentationSessionManager::new(host.clone(), timing.attach_cache()),
            detector: StabilityDetector::new(host.clone()),
            host,
            timing,
            viewport: RwLock::new(viewport),
            gate: tokio::sync::Mutex::new(()),
            state_changed: Notify::new(),
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        *self.viewport.read()
    }

    pub fn active_target(&self) -> Option<String> {
        self.registry.lock().active_id()
    }

    pub fn target_state(&self, target_id: &str) -> Option<TargetProcessingState> {
        self.registry.lock().state(target_id)
    }

    pub fn tabs(&self) -> Vec<TabSummary> {
        self.registry.lock().summaries()
    }

    pub fn attached_target(&self) -> Option<String> {
        self.sessions.attached_target()
    }

    /// Parse and run one request. Always produces a response.
    pub async fn handle_envelope(&self, envelope: &Envelope) -> AgentResponse {
        match Command::from_envelope(envelope) {
            Ok(command) => self.execute(&command, envelope.request_id).await,
            Err(e) => {
                warn!(
                    request_id = envelope.request_id,
                    command = %envelope.command,
                    "rejected before execution: {}",
                    e
                );
                AgentResponse::error(envelope.command.as_str(), &e).with_request_id(envelope.request_id)
            }
        }
    }

    /// Run one top-level command. Errors become `status: "error"` responses.
    pub async fn execute(&self, command: &Command, request_id: Option<u64>) -> AgentResponse {
        let _gate = self.gate.lock().await;

        let reclaimed = self.registry.lock().reclaim_expired(Instant::now());
        if !reclaimed.is_empty() {
            warn!(?reclaimed, "reclaimed targets with expired leases");
            self.state_changed.notify_waiters();
        }

        let started = Instant::now();
        debug!(request_id, command = command.name(), "executing");

        let result = match command {
            Command::Batch {
                operations,
                interval_ms,
            } => {
                let interval = interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.timing.batch_interval());
                self.run_batch(operations, interval).await
            }
            other => self.dispatch(other, false).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.reset_busy();
                warn!(request_id, command = command.name(), "command failed: {}", e);
                AgentResponse::error(command.name(), &e)
            }
        };

        info!(
            request_id,
            command = command.name(),
            status = ?response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "command finished"
        );
        response.with_request_id(request_id)
    }

    /// Channel lost: release the instrumentation session and clear busy
    /// states so the next connection starts clean.
    pub async fn on_disconnect(&self) {
        self.sessions.detach_if_needed().await;
        let reset = self.registry.lock().reset_busy();
        self.state_changed.notify_waiters();
        info!(reset, "agent state reset after disconnect");
    }

    /// Keep the registry in sync with host events until the host goes away.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.host.subscribe();
        let this: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match this.upgrade() {
                        Some(coordinator) => coordinator.observe(&event),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "host event pump lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("host event pump stopped");
        })
    }

    fn observe(&self, event: &HostEvent) {
        match event {
            HostEvent::TargetCreated(info) => self.registry.lock().observe(info),
            HostEvent::TargetInfoChanged(info) => self.registry.lock().update(info),
            HostEvent::LoadCompleted { target_id, url } => {
                self.registry.lock().set_url(target_id, url);
            }
            HostEvent::TargetClosed { target_id } => {
                let removed = self.registry.lock().remove(target_id);
                self.sessions.forget(target_id);
                if removed.is_some_and(|r| r.tracked) {
                    info!(target_id = %target_id, "tracked target closed");
                }
                self.state_changed.notify_waiters();
            }
            HostEvent::InstrumentationDetached { target_id } => {
                if self.sessions.forget(target_id) {
                    debug!(target_id = %target_id, "host dropped the instrumentation session");
                }
            }
            HostEvent::TargetActivated { .. } => {}
        }
    }

    pub(crate) fn set_state(&self, target_id: &str, state: TargetProcessingState) {
        self.registry.lock().set_state(target_id, state, Instant::now());
        self.state_changed.notify_waiters();
    }

    pub(crate) fn reset_busy(&self) {
        if self.registry.lock().reset_busy() > 0 {
            self.state_changed.notify_waiters();
        }
    }

    /// Wait for `target_id` to leave any busy state, then mark it `Idle`.
    pub(crate) async fn begin(&self, target_id: &str) {
        self.wait_until_idle(target_id).await;
        self.set_state(target_id, TargetProcessingState::Idle);
    }

    /// Bounded by the busy wait; on expiry the target is reclaimed instead of
    /// failing the command.
    async fn wait_until_idle(&self, target_id: &str) {
        let deadline = tokio::time::Instant::now() + self.timing.busy_wait();
        loop {
            let notified = self.state_changed.notified();
            let busy = self
                .registry
                .lock()
                .state(target_id)
                .is_some_and(|s| s.is_busy());
            if !busy {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if self.registry.lock().reclaim(target_id) {
                    warn!(
                        target_id,
                        "target still busy after {:?}, forcing it idle",
                        self.timing.busy_wait()
                    );
                }
                self.state_changed.notify_waiters();
                return;
            }
        }
    }

    /// The target commands should land on. A vanished active target is
    /// dropped; with no active target the first regular page is adopted, or
    /// a blank one is created when `create` is set.
    pub(crate) async fn ensure_active(&self, create: bool) -> Result<String> {
        loop {
            let active = self.registry.lock().active_id();
            let Some(target_id) = active else { break };
            match self.host.target_info(&target_id).await? {
                Some(info) => {
                    self.registry.lock().update(&info);
                    return Ok(target_id);
                }
                None => {
                    debug!(target_id = %target_id, "active target is gone");
                    self.registry.lock().remove(&target_id);
                    self.sessions.forget(&target_id);
                }
            }
        }

        let existing = self
            .host
            .list_targets()
            .await?
            .into_iter()
            .find(|t| !t.is_system());
        let info = match existing {
            Some(info) => info,
            None if create => self.host.create_target(None).await?,
            None => {
                return Err(PilotError::CommandFailed(
                    "no tab available; navigate or open a tab first".to_string(),
                ))
            }
        };

        {
            let mut registry = self.registry.lock();
            registry.track(&info);
            registry.set_active(&info.target_id);
        }
        info!(target_id = %info.target_id, url = %info.url, "adopted target");
        Ok(info.target_id)
    }

    /// Acquire the instrumentation session, retrying with a fixed delay.
    pub(crate) async fn attach_with_retries(&self, target_id: &str) -> Result<AttachStatus> {
        let attempts = self.timing.attach_retries.max(1);
        for attempt in 1..=attempts {
            if let Some(status) = self.sessions.ensure_attached(target_id).await {
                return Ok(status);
            }
            debug!(target_id, attempt, "attach attempt failed");
            if attempt < attempts {
                tokio::time::sleep(self.timing.attach_retry_delay()).await;
            }
        }
        Err(PilotError::AttachFailed {
            target_id: target_id.to_string(),
            attempts,
        })
    }
}
