//! Did this input land on the original target or open a new one?

use tabpilot_protocols::{HostEvent, TargetInfo};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::Coordinator;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Detection {
    Original { navigated: bool },
    /// `activated` is false when the long wait picked a candidate the
    /// browser never brought to the foreground.
    NewTarget { info: TargetInfo, activated: bool },
}

impl Coordinator {
    /// Race the fast timer against activation of a new, attributable target.
    ///
    /// Returns exactly once. A created-but-not-yet-active candidate holds
    /// the fast path open until activation or the long wait, at which point
    /// the most current candidate wins.
    pub(crate) async fn detect_new_target(
        &self,
        original: &str,
        original_url: &str,
        events: &mut broadcast::Receiver<HostEvent>,
    ) -> Detection {
        let fast = tokio::time::sleep(self.timing.fast_detect());
        let long = tokio::time::sleep(self.timing.long_wait());
        tokio::pin!(fast);
        tokio::pin!(long);

        let mut fast_elapsed = false;
        let mut events_open = true;
        let mut navigated = false;
        let mut candidate: Option<TargetInfo> = None;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Ok(HostEvent::TargetCreated(info)) => {
                        if self.is_attributable(&info, original) {
                            debug!(original, candidate = %info.target_id, "new target created");
                            candidate = Some(info);
                        }
                    }
                    Ok(HostEvent::TargetActivated { target_id, opener_id }) => {
                        if let Some(info) = self.activated_candidate(&target_id, opener_id, candidate.as_ref()).await {
                            if self.is_attributable(&info, original) {
                                return Detection::NewTarget { info, activated: true };
                            }
                        }
                    }
                    Ok(HostEvent::LoadCompleted { target_id, .. }) => {
                        if target_id == original {
                            navigated = true;
                        }
                    }
                    Ok(HostEvent::TargetInfoChanged(info)) => {
                        if info.target_id == original && info.url != original_url {
                            navigated = true;
                        }
                    }
                    Ok(HostEvent::TargetClosed { target_id }) => {
                        if candidate.as_ref().is_some_and(|c| c.target_id == target_id) {
                            candidate = None;
                        }
                    }
                    Ok(HostEvent::InstrumentationDetached { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "target detection lagged"),
                    Err(RecvError::Closed) => events_open = false,
                },
                _ = &mut fast, if !fast_elapsed => {
                    fast_elapsed = true;
                    match candidate.as_ref() {
                        None => return Detection::Original { navigated },
                        Some(c) => debug!(candidate = %c.target_id, "waiting for candidate activation"),
                    }
                }
                _ = &mut long => {
                    return match candidate {
                        Some(info) => Detection::NewTarget { info, activated: false },
                        None => Detection::Original { navigated },
                    };
                }
            }
        }
    }

    async fn activated_candidate(
        &self,
        target_id: &str,
        opener_id: Option<String>,
        candidate: Option<&TargetInfo>,
    ) -> Option<TargetInfo> {
        if let Some(known) = candidate.filter(|c| c.target_id == target_id) {
            return Some(known.clone());
        }
        let mut info = self.host.target_info(target_id).await.ok().flatten()?;
        if info.opener_id.is_none() {
            info.opener_id = opener_id;
        }
        Some(info)
    }

    /// Untracked regular page opened by `original`, or with no opener at all.
    fn is_attributable(&self, info: &TargetInfo, original: &str) -> bool {
        info.target_id != original
            && !info.is_system()
            && !self.registry.lock().is_tracked(&info.target_id)
            && info.opener_id.as_deref().is_none_or(|opener| opener == original)
    }
}
