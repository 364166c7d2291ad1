//! Tab management: list, create, select, close.
//!
//! Each performs its host-level action and then runs the shared completion
//! stages on whichever target is active afterwards.

use tabpilot_protocols::{AgentResponse, PilotError, ResponseStatus, Result};
use tracing::{debug, info, warn};

use super::completion::{CaptureMode, Freshness};
use super::coordinator_commands::validate_url;
use super::navigation::PendingNavigation;
use super::Coordinator;

impl Coordinator {
    /// Drop tracked targets the host no longer has and refresh the rest.
    async fn refresh_tracked(&self) -> Result<()> {
        let live = self.host.list_targets().await?;
        let gone: Vec<String> = {
            let mut registry = self.registry.lock();
            let gone: Vec<String> = registry
                .tracked()
                .iter()
                .filter(|r| !live.iter().any(|t| t.target_id == r.target_id))
                .map(|r| r.target_id.clone())
                .collect();
            for target_id in &gone {
                registry.remove(target_id);
            }
            for info in &live {
                registry.update(info);
            }
            gone
        };
        for target_id in &gone {
            debug!(target_id = %target_id, "tracked target no longer exists");
            self.sessions.forget(target_id);
        }
        Ok(())
    }

    fn tracked_target_at(&self, index: usize) -> Result<String> {
        let registry = self.registry.lock();
        match registry.tracked_at(index) {
            Some(record) => Ok(record.target_id.clone()),
            None => Err(PilotError::InvalidParameter(format!(
                "tab index {index} out of range, {} tab(s) open",
                registry.tracked().len()
            ))),
        }
    }

    pub(super) async fn list_tabs(&self, name: &str, batch_mode: bool) -> Result<AgentResponse> {
        self.refresh_tracked().await?;

        let mut response = match self.ensure_active(false).await {
            Ok(target) => {
                self.begin(&target).await;
                self.process_tab_core(&target, Freshness::Existing, CaptureMode::Skip, batch_mode)
                    .await?
                    .into_response(ResponseStatus::Success, name)
            }
            Err(e) => {
                debug!("listing tabs without an active target: {}", e);
                AgentResponse::success(name)
            }
        };
        response.tabs = Some(self.registry.lock().summaries());
        Ok(response)
    }

    pub(super) async fn new_tab(&self, name: &str, url: Option<&str>, batch_mode: bool) -> Result<AgentResponse> {
        if let Some(url) = url {
            validate_url(url)?;
        }

        let events = self.host.subscribe();
        let info = self.host.create_target(url).await?;
        let target = info.target_id.clone();
        {
            let mut registry = self.registry.lock();
            if !registry.track(&info) {
                return Err(PilotError::CommandFailed(format!(
                    "new tab {target} is a system page and cannot be driven"
                )));
            }
            registry.set_active(&target);
        }
        self.host.activate_target(&target).await?;
        info!(target_id = %target, "opened new tab");

        if url.is_some() {
            let pending = PendingNavigation::new(&target, self.timing.navigation_timeout(), events);
            match pending.wait().await {
                Some(loaded) => self.registry.lock().set_url(&target, &loaded),
                None => warn!(target_id = %target, "new tab did not report a load"),
            }
        }

        self.begin(&target).await;
        let outcome = self
            .process_tab_core(&target, Freshness::NewTarget, CaptureMode::Full, batch_mode)
            .await?;
        let mut response = outcome.into_response(ResponseStatus::Success, name);
        response.new_tab_opened = Some(true);
        response.new_tab_id = Some(target);
        response.new_tab_url = response.current_url.clone();
        response.navigation_occurred = Some(url.is_some());
        Ok(response)
    }

    pub(super) async fn select_tab(&self, name: &str, index: usize, batch_mode: bool) -> Result<AgentResponse> {
        self.refresh_tracked().await?;
        let target = self.tracked_target_at(index)?;

        self.begin(&target).await;
        self.host.activate_target(&target).await?;
        self.registry.lock().set_active(&target);
        debug!(target_id = %target, index, "selected tab");

        let outcome = self
            .process_tab_core(&target, Freshness::Existing, CaptureMode::Full, batch_mode)
            .await?;
        Ok(outcome.into_response(ResponseStatus::Success, name))
    }

    /// Close the tab at `index`, or the active one. The active pointer moves
    /// to the neighbouring tab.
    pub(super) async fn close_tab(
        &self,
        name: &str,
        index: Option<usize>,
        batch_mode: bool,
    ) -> Result<AgentResponse> {
        self.refresh_tracked().await?;
        let index = match index {
            Some(index) => index,
            None => {
                let registry = self.registry.lock();
                registry
                    .active_id()
                    .and_then(|id| registry.position(&id))
                    .ok_or_else(|| PilotError::InvalidParameter("no active tab to close".to_string()))?
            }
        };
        let target = self.tracked_target_at(index)?;

        self.begin(&target).await;
        if self.sessions.attached_target().as_deref() == Some(target.as_str()) {
            self.sessions.detach_if_needed().await;
        }
        self.host.close_target(&target).await?;
        self.sessions.forget(&target);
        let next = {
            let mut registry = self.registry.lock();
            registry.remove(&target);
            registry.active_id()
        };
        info!(target_id = %target, index, "closed tab");

        let mut response = match next {
            Some(next) => {
                self.host.activate_target(&next).await?;
                self.begin(&next).await;
                self.process_tab_core(&next, Freshness::Existing, CaptureMode::Full, batch_mode)
                    .await?
                    .into_response(ResponseStatus::Success, name)
            }
            None => AgentResponse::success(name),
        };
        response.message = Some(format!("closed tab {index}"));
        Ok(response)
    }
}
