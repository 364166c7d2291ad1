//! Shared completion stages: stabilize, verify, attach, capture.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use tabpilot_protocols::{AgentResponse, Clip, PilotError, ResponseStatus, Result};
use tracing::{debug, warn};

use super::Coordinator;
use crate::registry::TargetProcessingState;
use crate::session::AttachStatus;
use crate::stability::StabilityOutcome;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CaptureMode {
    Full,
    Area(Clip),
    Skip,
}

/// Fresh navigations get the longer stability budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    NewTarget,
    Existing,
}

#[derive(Debug, Clone)]
pub(crate) struct TabOutcome {
    pub target_id: String,
    pub url: String,
    pub screenshot: Option<String>,
}

impl TabOutcome {
    pub(crate) fn into_response(self, status: ResponseStatus, command: &str) -> AgentResponse {
        let mut response = AgentResponse::new(status, command);
        response.current_url = Some(self.url);
        response.screenshot = self.screenshot;
        response.tab_id = Some(self.target_id);
        response
    }
}

impl Coordinator {
    /// Run the completion stages on `target_id` and leave it `Completed`.
    /// In batch mode the capture is suppressed.
    pub(crate) async fn process_tab_core(
        &self,
        target_id: &str,
        freshness: Freshness,
        capture: CaptureMode,
        batch_mode: bool,
    ) -> Result<TabOutcome> {
        self.set_state(target_id, TargetProcessingState::Stabilizing);
        let config = match freshness {
            Freshness::NewTarget => &self.timing.stability_new,
            Freshness::Existing => &self.timing.stability_existing,
        };
        match self.detector.wait_for_stable(target_id, config).await {
            StabilityOutcome::TargetGone => {
                return Err(PilotError::TargetVanished(target_id.to_string()));
            }
            StabilityOutcome::TimedOut => debug!(target_id, "proceeding without stable content"),
            StabilityOutcome::Stable { .. } => {}
        }

        let info = self
            .host
            .target_info(target_id)
            .await
            .inspect_err(|e| warn!(target_id, "target lookup failed: {}", e))?
            .ok_or_else(|| PilotError::TargetVanished(target_id.to_string()))?;
        self.registry.lock().update(&info);

        self.instrument(target_id).await?;

        let capture = if batch_mode { CaptureMode::Skip } else { capture };
        let screenshot = match capture {
            CaptureMode::Skip => None,
            CaptureMode::Full => Some(self.capture(target_id, None).await?),
            CaptureMode::Area(clip) => Some(self.capture(target_id, Some(clip)).await?),
        };

        self.set_state(target_id, TargetProcessingState::Completed);
        Ok(TabOutcome {
            target_id: target_id.to_string(),
            url: info.url,
            screenshot,
        })
    }

    /// Hold the instrumentation session on `target_id`, reapplying the
    /// viewport when the session is fresh. Input is only dispatched after this.
    pub(crate) async fn instrument(&self, target_id: &str) -> Result<AttachStatus> {
        self.set_state(target_id, TargetProcessingState::AttachingInstrumentation);
        let attach = self
            .attach_with_retries(target_id)
            .await
            .inspect_err(|e| warn!(target_id, "{}", e))?;
        if attach == AttachStatus::Fresh {
            if let Some(viewport) = self.viewport() {
                if let Err(e) = self.host.set_viewport_override(target_id, viewport).await {
                    warn!(target_id, "could not reapply viewport: {}", e);
                }
            }
        }
        Ok(attach)
    }

    async fn capture(&self, target_id: &str, clip: Option<Clip>) -> Result<String> {
        self.set_state(target_id, TargetProcessingState::Capturing);
        let bytes = self
            .host
            .capture(target_id, clip)
            .await
            .inspect_err(|e| warn!(target_id, "capture failed: {}", e))?;
        Ok(format!("data:image/png;base64,{}", BASE64_STANDARD.encode(bytes)))
    }
}
