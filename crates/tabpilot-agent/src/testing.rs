//! In-memory browser model for tests.
//!
//! [`ScriptedHost`] keeps a list of targets, a single instrumentation
//! session, a call log and a queue of scripted input effects. Everything a
//! real browser would announce asynchronously is broadcast as a
//! [`HostEvent`] from inside the call that caused it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tabpilot_config::{StabilityConfig, TimingConfig};
use tabpilot_protocols::{
    BrowserHost, Clip, HostEvent, InputOp, PilotError, Result, TargetInfo, Viewport,
};
use tokio::sync::broadcast;

use crate::scripts::{PAGE_HTML, STABILITY_SAMPLE, VIEWPORT_SIZE};

/// Bytes returned by every capture.
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nscripted";

/// Timers short enough for tests that drive a [`ScriptedHost`].
pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        fast_detect_ms: 60,
        long_wait_ms: 400,
        busy_wait_ms: 200,
        attach_retry_delay_ms: 5,
        settle_ms: 10,
        navigation_timeout_ms: 500,
        batch_interval_ms: 10,
        max_wait_seconds: 1,
        stability_new: StabilityConfig {
            timeout_ms: 200,
            poll_interval_ms: 10,
            required_samples: 2,
        },
        stability_existing: StabilityConfig {
            timeout_ms: 100,
            poll_interval_ms: 10,
            required_samples: 2,
        },
        ..TimingConfig::default()
    }
}

/// What a click or key press does to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEffect {
    /// Same-target navigation.
    Navigate(String),
    /// A new context opens and comes to the foreground.
    OpenTarget { url: String, with_opener: bool },
    /// Some unrelated context (devtools, another window's popup) appears.
    OpenForeign { url: String, opener_id: Option<String> },
    /// A new context opens behind the current one and is never activated.
    OpenBackground { url: String },
}

#[derive(Default)]
struct Script {
    targets: Vec<TargetInfo>,
    next_id: u32,
    attached: Option<String>,
    attach_failures: u32,
    noop_attaches: u32,
    detach_failures: u32,
    attach_delay: Option<Duration>,
    sample_failures: u32,
    samples: HashMap<String, VecDeque<u64>>,
    effects: VecDeque<InputEffect>,
    viewport_override: Option<(String, Viewport)>,
    handoff_violations: u32,
    calls: Vec<String>,
}

impl Script {
    fn find(&self, target_id: &str) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.target_id == target_id)
    }

    fn find_mut(&mut self, target_id: &str) -> Option<&mut TargetInfo> {
        self.targets.iter_mut().find(|t| t.target_id == target_id)
    }

    fn create(&mut self, url: &str, opener_id: Option<String>) -> TargetInfo {
        self.next_id += 1;
        let mut info = TargetInfo::page(format!("tab-{}", self.next_id), url);
        info.opener_id = opener_id;
        self.targets.push(info.clone());
        info
    }

    fn require(&self, target_id: &str) -> Result<&TargetInfo> {
        self.find(target_id)
            .ok_or_else(|| PilotError::TargetVanished(target_id.to_string()))
    }
}

pub struct ScriptedHost {
    script: Mutex<Script>,
    events: broadcast::Sender<HostEvent>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            script: Mutex::new(Script::default()),
            events,
        }
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    fn log(&self, call: String) {
        self.script.lock().calls.push(call);
    }

    /// Add an existing page without announcing it.
    pub fn add_page(&self, url: &str) -> String {
        self.script.lock().create(url, None).target_id
    }

    /// Add an incidental system context (devtools) without announcing it.
    pub fn add_system_page(&self) -> String {
        self.script
            .lock()
            .create("devtools://devtools/bundled/inspector.html", None)
            .target_id
    }

    pub fn queue_effect(&self, effect: InputEffect) {
        self.script.lock().effects.push_back(effect);
    }

    /// Content sizes reported by the next stability samples of `target_id`.
    pub fn queue_samples(&self, target_id: &str, sizes: impl IntoIterator<Item = u64>) {
        self.script
            .lock()
            .samples
            .entry(target_id.to_string())
            .or_default()
            .extend(sizes);
    }

    pub fn fail_next_attaches(&self, count: u32) {
        self.script.lock().attach_failures = count;
    }

    /// Attach calls that report success but leave nothing attached.
    pub fn noop_next_attaches(&self, count: u32) {
        self.script.lock().noop_attaches = count;
    }

    /// The next successful attach takes effect at once but its reply is
    /// held back for `delay`.
    pub fn delay_next_attach(&self, delay: Duration) {
        self.script.lock().attach_delay = Some(delay);
    }

    pub fn fail_next_detaches(&self, count: u32) {
        self.script.lock().detach_failures = count;
    }

    pub fn fail_next_samples(&self, count: u32) {
        self.script.lock().sample_failures = count;
    }

    /// Pretend some other tool already attached to `target_id`.
    pub fn force_attached(&self, target_id: &str) {
        self.script.lock().attached = Some(target_id.to_string());
    }

    /// Tear the session down host-side without telling anyone.
    pub fn drop_session(&self) {
        self.script.lock().attached = None;
    }

    /// Close a target as if the user did it.
    pub fn close_externally(&self, target_id: &str) {
        {
            let mut script = self.script.lock();
            script.targets.retain(|t| t.target_id != target_id);
            if script.attached.as_deref() == Some(target_id) {
                script.attached = None;
            }
        }
        self.emit(HostEvent::TargetClosed {
            target_id: target_id.to_string(),
        });
    }

    pub fn attached(&self) -> Option<String> {
        self.script.lock().attached.clone()
    }

    pub fn viewport_override(&self) -> Option<(String, Viewport)> {
        self.script.lock().viewport_override.clone()
    }

    pub fn target_url(&self, target_id: &str) -> Option<String> {
        self.script.lock().find(target_id).map(|t| t.url.clone())
    }

    pub fn target_ids(&self) -> Vec<String> {
        self.script
            .lock()
            .targets
            .iter()
            .map(|t| t.target_id.clone())
            .collect()
    }

    /// Attaches made while another target still held the session.
    pub fn handoff_violations(&self) -> u32 {
        self.script.lock().handoff_violations
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn navigate_in_place(&self, target_id: &str, url: &str) {
        let info = {
            let mut script = self.script.lock();
            let Some(target) = script.find_mut(target_id) else {
                return;
            };
            target.url = url.to_string();
            target.clone()
        };
        self.emit(HostEvent::TargetInfoChanged(info));
        self.emit(HostEvent::LoadCompleted {
            target_id: target_id.to_string(),
            url: url.to_string(),
        });
    }

    fn open(&self, url: &str, opener_id: Option<String>) {
        let info = self.script.lock().create(url, opener_id.clone());
        self.emit(HostEvent::TargetCreated(info.clone()));
        self.emit(HostEvent::TargetActivated {
            target_id: info.target_id.clone(),
            opener_id,
        });
        self.emit(HostEvent::LoadCompleted {
            target_id: info.target_id,
            url: url.to_string(),
        });
    }

    fn apply_effect(&self, target_id: &str) {
        let effect = self.script.lock().effects.pop_front();
        match effect {
            Some(InputEffect::Navigate(url)) => self.navigate_in_place(target_id, &url),
            Some(InputEffect::OpenTarget { url, with_opener }) => {
                self.open(&url, with_opener.then(|| target_id.to_string()))
            }
            Some(InputEffect::OpenForeign { url, opener_id }) => self.open(&url, opener_id),
            Some(InputEffect::OpenBackground { url }) => {
                let info = self.script.lock().create(&url, Some(target_id.to_string()));
                self.emit(HostEvent::TargetCreated(info.clone()));
                self.emit(HostEvent::LoadCompleted {
                    target_id: info.target_id,
                    url,
                });
            }
            None => {}
        }
    }
}

fn html_for(url: &str) -> String {
    format!("<html><head></head><body><p>{url}</p></body></html>")
}

#[async_trait]
impl BrowserHost for ScriptedHost {
    async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        self.log("list_targets".to_string());
        Ok(self.script.lock().targets.clone())
    }

    async fn target_info(&self, target_id: &str) -> Result<Option<TargetInfo>> {
        Ok(self.script.lock().find(target_id).cloned())
    }

    async fn create_target(&self, url: Option<&str>) -> Result<TargetInfo> {
        self.log(format!("create_target:{}", url.unwrap_or("")));
        let info = self.script.lock().create(url.unwrap_or("about:blank"), None);
        self.emit(HostEvent::TargetCreated(info.clone()));
        if let Some(url) = url {
            self.emit(HostEvent::LoadCompleted {
                target_id: info.target_id.clone(),
                url: url.to_string(),
            });
        }
        Ok(info)
    }

    async fn close_target(&self, target_id: &str) -> Result<()> {
        self.log(format!("close_target:{target_id}"));
        self.script.lock().require(target_id)?;
        self.close_externally(target_id);
        Ok(())
    }

    async fn activate_target(&self, target_id: &str) -> Result<()> {
        self.log(format!("activate:{target_id}"));
        self.script.lock().require(target_id)?;
        Ok(())
    }

    async fn navigate(&self, target_id: &str, url: &str) -> Result<()> {
        self.log(format!("navigate:{target_id}:{url}"));
        self.script.lock().require(target_id)?;
        self.navigate_in_place(target_id, url);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn is_attached(&self, target_id: &str) -> Result<bool> {
        Ok(self.script.lock().attached.as_deref() == Some(target_id))
    }

    async fn attach(&self, target_id: &str) -> Result<()> {
        self.log(format!("attach:{target_id}"));
        let delay = {
            let mut script = self.script.lock();
            script.require(target_id)?;
            if script.attach_failures > 0 {
                script.attach_failures -= 1;
                return Err(PilotError::CommandFailed(format!(
                    "another debugger is already attached to {target_id}"
                )));
            }
            if script.noop_attaches > 0 {
                script.noop_attaches -= 1;
                return Ok(());
            }
            if script.attached.as_deref().is_some_and(|t| t != target_id) {
                script.handoff_violations += 1;
            }
            script.attached = Some(target_id.to_string());
            script.attach_delay.take()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn detach(&self, target_id: &str) -> Result<()> {
        self.log(format!("detach:{target_id}"));
        let mut script = self.script.lock();
        if script.detach_failures > 0 {
            script.detach_failures -= 1;
            return Err(PilotError::CommandFailed(format!("detach from {target_id} refused")));
        }
        if script.attached.as_deref() == Some(target_id) {
            script.attached = None;
        }
        Ok(())
    }

    async fn set_viewport_override(&self, target_id: &str, viewport: Viewport) -> Result<()> {
        self.log(format!("set_viewport:{target_id}"));
        self.script.lock().viewport_override = Some((target_id.to_string(), viewport));
        Ok(())
    }

    async fn clear_viewport_override(&self, target_id: &str) -> Result<()> {
        self.log(format!("clear_viewport:{target_id}"));
        let mut script = self.script.lock();
        if script
            .viewport_override
            .as_ref()
            .is_some_and(|(t, _)| t == target_id)
        {
            script.viewport_override = None;
        }
        Ok(())
    }

    async fn dispatch_input(&self, target_id: &str, op: &InputOp) -> Result<()> {
        let kind = match op {
            InputOp::Click { .. } => "click",
            InputOp::InsertText { .. } => "insert_text",
            InputOp::KeyPress { .. } => "key",
            InputOp::Scroll { .. } => "scroll",
        };
        self.log(format!("dispatch:{target_id}:{kind}"));
        {
            let script = self.script.lock();
            script.require(target_id)?;
            if script.attached.as_deref() != Some(target_id) {
                return Err(PilotError::CommandFailed(format!("not attached to {target_id}")));
            }
        }
        if matches!(op, InputOp::Click { .. } | InputOp::KeyPress { .. }) {
            self.apply_effect(target_id);
        }
        Ok(())
    }

    async fn capture(&self, target_id: &str, clip: Option<Clip>) -> Result<Vec<u8>> {
        let suffix = if clip.is_some() { ":clip" } else { "" };
        self.log(format!("capture:{target_id}{suffix}"));
        let script = self.script.lock();
        script.require(target_id)?;
        if script.attached.as_deref() != Some(target_id) {
            return Err(PilotError::CommandFailed(format!("not attached to {target_id}")));
        }
        Ok(FAKE_PNG.to_vec())
    }

    async fn evaluate(&self, target_id: &str, expression: &str) -> Result<Value> {
        self.log(format!("evaluate:{target_id}"));
        let mut script = self.script.lock();
        let url = script.require(target_id)?.url.clone();

        if expression == STABILITY_SAMPLE {
            if script.sample_failures > 0 {
                script.sample_failures -= 1;
                return Err(PilotError::CommandFailed(
                    "Execution context was destroyed".to_string(),
                ));
            }
            let length = script
                .samples
                .get_mut(target_id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(html_for(&url).len() as u64);
            return Ok(json!({"readyState": "complete", "length": length}));
        }
        if expression == PAGE_HTML {
            return Ok(Value::String(html_for(&url)));
        }
        if expression == VIEWPORT_SIZE {
            let viewport = script
                .viewport_override
                .as_ref()
                .map(|(_, v)| *v)
                .unwrap_or(Viewport::new(1280, 720));
            return Ok(json!({"width": viewport.width, "height": viewport.height}));
        }
        Ok(Value::Null)
    }
}
