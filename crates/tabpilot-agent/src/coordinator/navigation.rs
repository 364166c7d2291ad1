//! Commands whose completion is gated on a later "finished loading" signal.

use std::time::Duration;

use tabpilot_protocols::HostEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::debug;

/// A navigation waiting for [`HostEvent::LoadCompleted`] on its target.
///
/// Create it (which subscribes) before starting the navigation so the load
/// signal cannot be missed.
pub(crate) struct PendingNavigation {
    target_id: String,
    deadline: Instant,
    events: broadcast::Receiver<HostEvent>,
}

impl PendingNavigation {
    pub(crate) fn new(target_id: &str, timeout: Duration, events: broadcast::Receiver<HostEvent>) -> Self {
        Self {
            target_id: target_id.to_string(),
            deadline: Instant::now() + timeout,
            events,
        }
    }

    /// The loaded URL, or `None` if the deadline passed or the target closed.
    pub(crate) async fn wait(mut self) -> Option<String> {
        loop {
            match tokio::time::timeout_at(self.deadline, self.events.recv()).await {
                Ok(Ok(HostEvent::LoadCompleted { target_id, url })) if target_id == self.target_id => {
                    return Some(url);
                }
                Ok(Ok(HostEvent::TargetClosed { target_id })) if target_id == self.target_id => {
                    debug!(target_id = %self.target_id, "target closed during navigation");
                    return None;
                }
                Ok(Ok(_)) => {}
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!(skipped, "navigation wait lagged behind host events");
                }
                Ok(Err(RecvError::Closed)) | Err(_) => return None,
            }
        }
    }
}
