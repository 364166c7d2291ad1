//! Instrumentation session manager.
//!
//! At most one instrumentation session exists at a time. Acquiring it for a
//! target releases it (best effort) from whichever target held it before.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tabpilot_protocols::BrowserHost;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStatus {
    /// A verified session was already in place.
    Reused,
    /// The session was created by this call.
    Fresh,
}

/// `verified_at` stays `None` while an attach is still in flight, so an
/// aborted attach can still be released.
#[derive(Debug, Clone)]
struct AttachedSession {
    target_id: String,
    verified_at: Option<Instant>,
}

pub struct InstrumentationSessionManager {
    host: Arc<dyn BrowserHost>,
    current: Mutex<Option<AttachedSession>>,
    cache_ttl: Duration,
}

impl InstrumentationSessionManager {
    pub fn new(host: Arc<dyn BrowserHost>, cache_ttl: Duration) -> Self {
        Self {
            host,
            current: Mutex::new(None),
            cache_ttl,
        }
    }

    /// Target currently holding the session, as far as this manager knows.
    pub fn attached_target(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .filter(|s| s.verified_at.is_some())
            .map(|s| s.target_id.clone())
    }

    /// Attach to `target_id`, handing the session over from any other target.
    pub async fn attach(&self, target_id: &str) -> bool {
        self.acquire(target_id).await.is_some()
    }

    /// Like [`attach`](Self::attach) but reports whether the session was
    /// created or already present. `None` means the attach failed and no
    /// session is recorded.
    pub async fn acquire(&self, target_id: &str) -> Option<AttachStatus> {
        // The previous holder stays recorded until it is released.
        let previous = self.current.lock().as_ref().map(|s| s.target_id.clone());
        if let Some(previous) = previous.filter(|p| p != target_id) {
            self.release(&previous).await;
        }
        self.claim(target_id);

        match self.host.is_attached(target_id).await {
            Ok(true) => {
                debug!(target_id, "instrumentation already attached");
                self.record(target_id);
                return Some(AttachStatus::Reused);
            }
            Ok(false) => {}
            Err(e) => debug!(target_id, "attachment probe failed: {}", e),
        }

        if let Err(e) = self.host.attach(target_id).await {
            warn!(target_id, "attach failed: {}", e);
            self.forget(target_id);
            return None;
        }

        // The attach call's own success is not trusted.
        match self.host.is_attached(target_id).await {
            Ok(true) => {
                debug!(target_id, "instrumentation attached");
                self.record(target_id);
                Some(AttachStatus::Fresh)
            }
            Ok(false) => {
                warn!(target_id, "attach reported success but no session is present");
                self.forget(target_id);
                None
            }
            Err(e) => {
                warn!(target_id, "could not verify attachment: {}", e);
                self.forget(target_id);
                None
            }
        }
    }

    /// Reuse a recently verified session when the host still confirms it,
    /// otherwise acquire a new one.
    pub async fn ensure_attached(&self, target_id: &str) -> Option<AttachStatus> {
        let cached = self
            .current
            .lock()
            .as_ref()
            .is_some_and(|s| {
                s.target_id == target_id
                    && s.verified_at.is_some_and(|at| at.elapsed() < self.cache_ttl)
            });

        if cached {
            if let Ok(true) = self.host.is_attached(target_id).await {
                return Some(AttachStatus::Reused);
            }
            debug!(target_id, "cached session is gone, re-attaching");
            self.forget(target_id);
        }
        self.acquire(target_id).await
    }

    /// Release the session on channel loss, including one whose attach was
    /// interrupted. Never fails.
    pub async fn detach_if_needed(&self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            self.release(&previous.target_id).await;
        }
    }

    /// Drop the local record for a target whose session the host tore down.
    pub fn forget(&self, target_id: &str) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|s| s.target_id == target_id) {
            *current = None;
            true
        } else {
            false
        }
    }

    fn claim(&self, target_id: &str) {
        *self.current.lock() = Some(AttachedSession {
            target_id: target_id.to_string(),
            verified_at: None,
        });
    }

    fn record(&self, target_id: &str) {
        *self.current.lock() = Some(AttachedSession {
            target_id: target_id.to_string(),
            verified_at: Some(Instant::now()),
        });
    }

    /// Clear any viewport override, then detach. Failures are logged only.
    async fn release(&self, target_id: &str) {
        if let Err(e) = self.host.clear_viewport_override(target_id).await {
            debug!(target_id, "viewport reset before detach failed: {}", e);
        }
        match self.host.detach(target_id).await {
            Ok(()) => debug!(target_id, "instrumentation detached"),
            Err(e) => warn!(target_id, "detach failed: {}", e),
        }
    }
}
