//! The instrumentation channel the agent drives.
//!
//! [`BrowserHost`] is the only seam between the coordination layer and a real
//! browser. Implementations translate these calls into whatever the browser
//! exposes (CDP, an extension API, a scripted model in tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

/// Content-area size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (u32, u32) {
        (self.width / 2, self.height / 2)
    }
}

/// Rectangle to capture, in content-area pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Page,
    BackgroundPage,
    ServiceWorker,
    Other,
}

impl TargetKind {
    pub fn from_cdp(kind: &str) -> Self {
        match kind {
            "page" => TargetKind::Page,
            "background_page" => TargetKind::BackgroundPage,
            "service_worker" => TargetKind::ServiceWorker,
            _ => TargetKind::Other,
        }
    }
}

/// One browsing context as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_id: Option<String>,
}

const SYSTEM_SCHEMES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "devtools://",
    "edge://",
    "about:devtools",
];

impl TargetInfo {
    pub fn page(target_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            title: String::new(),
            kind: TargetKind::Page,
            opener_id: None,
        }
    }

    /// Incidental contexts (devtools, extension pages, workers) that must
    /// never become the active target.
    pub fn is_system(&self) -> bool {
        self.kind != TargetKind::Page || SYSTEM_SCHEMES.iter().any(|s| self.url.starts_with(s))
    }
}

/// Low-level input operation dispatched through the instrumentation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputOp {
    Click { x: u32, y: u32 },
    InsertText { text: String },
    KeyPress { key: String, modifiers: u8 },
    Scroll {
        x: u32,
        y: u32,
        delta_x: i32,
        delta_y: i32,
        selector: Option<String>,
    },
}

/// Asynchronous notifications from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    TargetCreated(TargetInfo),
    /// A context became the foreground one.
    TargetActivated {
        target_id: String,
        opener_id: Option<String>,
    },
    TargetInfoChanged(TargetInfo),
    /// The context finished loading its document.
    LoadCompleted { target_id: String, url: String },
    TargetClosed { target_id: String },
    /// The host tore the instrumentation session down on its own.
    InstrumentationDetached { target_id: String },
}

/// Browser-side primitives: target management plus the instrumentation
/// channel (`dispatch_input`, `capture`, `evaluate`).
///
/// Host failures are reported as [`crate::PilotError::CommandFailed`] unless
/// a more specific kind applies.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<TargetInfo>>;

    /// `Ok(None)` when the target no longer exists.
    async fn target_info(&self, target_id: &str) -> Result<Option<TargetInfo>>;

    async fn create_target(&self, url: Option<&str>) -> Result<TargetInfo>;

    async fn close_target(&self, target_id: &str) -> Result<()>;

    async fn activate_target(&self, target_id: &str) -> Result<()>;

    /// Start a navigation. Completion is signalled by [`HostEvent::LoadCompleted`].
    async fn navigate(&self, target_id: &str, url: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;

    /// Whether an instrumentation session is attached to `target_id` right now.
    async fn is_attached(&self, target_id: &str) -> Result<bool>;

    async fn attach(&self, target_id: &str) -> Result<()>;

    async fn detach(&self, target_id: &str) -> Result<()>;

    async fn set_viewport_override(&self, target_id: &str, viewport: Viewport) -> Result<()>;

    async fn clear_viewport_override(&self, target_id: &str) -> Result<()>;

    async fn dispatch_input(&self, target_id: &str, op: &InputOp) -> Result<()>;

    /// PNG bytes of the content area, or of `clip` when given.
    async fn capture(&self, target_id: &str, clip: Option<Clip>) -> Result<Vec<u8>>;

    async fn evaluate(&self, target_id: &str, expression: &str) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_targets() {
        assert!(!TargetInfo::page("t1", "https://example.com").is_system());
        assert!(TargetInfo::page("t2", "chrome://newtab-internals").is_system());
        assert!(TargetInfo::page("t3", "devtools://devtools/bundled").is_system());

        let mut worker = TargetInfo::page("t4", "https://example.com/sw.js");
        worker.kind = TargetKind::ServiceWorker;
        assert!(worker.is_system());
    }

    #[test]
    fn test_target_kind_from_cdp() {
        assert_eq!(TargetKind::from_cdp("page"), TargetKind::Page);
        assert_eq!(TargetKind::from_cdp("service_worker"), TargetKind::ServiceWorker);
        assert_eq!(TargetKind::from_cdp("iframe"), TargetKind::Other);
    }

    #[test]
    fn test_viewport_center() {
        assert_eq!(Viewport::new(1280, 720).center(), (640, 360));
    }
}
