//! Per-command handlers: navigation, racing input, simple operations,
//! capture and viewport configuration.

use std::time::Duration;

use tabpilot_protocols::{
    AgentResponse, Clip, Command, Coordinate, InputOp, PilotError, ResponseStatus, Result,
    ScrollDirection, Viewport,
};
use tracing::{debug, info, warn};
use url::Url;

use super::completion::{CaptureMode, Freshness};
use super::detection::Detection;
use super::navigation::PendingNavigation;
use super::Coordinator;
use crate::registry::TargetProcessingState;
use crate::scripts::{PAGE_HTML, VIEWPORT_SIZE};

const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: 720,
};

/// Operations that never navigate.
enum SimpleOp<'a> {
    Input(InputOp),
    Scroll {
        direction: ScrollDirection,
        selector: Option<&'a str>,
    },
    Wait(Duration),
}

pub(crate) fn validate_url(url: &str) -> Result<()> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| PilotError::InvalidParameter(format!("invalid url {url:?}: {e}")))
}

fn area_clip(top_left: Coordinate, bottom_right: Coordinate) -> Clip {
    Clip {
        x: f64::from(top_left.x),
        y: f64::from(top_left.y),
        width: f64::from(bottom_right.x - top_left.x),
        height: f64::from(bottom_right.y - top_left.y),
    }
}

impl Coordinator {
    /// Route one command. `batch_mode` suppresses per-step capture.
    pub(crate) async fn dispatch(&self, command: &Command, batch_mode: bool) -> Result<AgentResponse> {
        let name = command.name();
        match command {
            Command::NavigateToUrl { url } => self.navigate_to_url(url, batch_mode).await,
            Command::Click { coordinate } => {
                let op = InputOp::Click {
                    x: coordinate.x,
                    y: coordinate.y,
                };
                self.perform_navigating_input(name, op, batch_mode).await
            }
            Command::PressKey { key } => {
                let op = InputOp::KeyPress {
                    key: key.clone(),
                    modifiers: 0,
                };
                self.perform_navigating_input(name, op, batch_mode).await
            }
            Command::PressKeyCombination { combination } => {
                let op = InputOp::KeyPress {
                    key: combination.key.clone(),
                    modifiers: combination.modifier_flags(),
                };
                if command.may_open_target() {
                    self.perform_navigating_input(name, op, batch_mode).await
                } else {
                    self.perform_simple_operation(name, SimpleOp::Input(op), batch_mode)
                        .await
                }
            }
            Command::Type { text } => {
                let op = InputOp::InsertText { text: text.clone() };
                self.perform_simple_operation(name, SimpleOp::Input(op), batch_mode)
                    .await
            }
            Command::Scroll {
                direction,
                selector,
            } => {
                let op = SimpleOp::Scroll {
                    direction: *direction,
                    selector: selector.as_deref(),
                };
                self.perform_simple_operation(name, op, batch_mode).await
            }
            Command::Wait { seconds } => self.wait(name, *seconds, batch_mode).await,
            Command::TakeScreenshot => self.snapshot(name, CaptureMode::Full, batch_mode).await,
            Command::TakeAreaScreenshot {
                top_left,
                bottom_right,
            } => {
                let clip = area_clip(*top_left, *bottom_right);
                self.snapshot(name, CaptureMode::Area(clip), batch_mode).await
            }
            Command::GetFullHtml => self.full_html(name, batch_mode).await,
            Command::ListTabs => self.list_tabs(name, batch_mode).await,
            Command::NewTab { url } => self.new_tab(name, url.as_deref(), batch_mode).await,
            Command::SelectTab { index } => self.select_tab(name, *index, batch_mode).await,
            Command::CloseTab { index } => self.close_tab(name, *index, batch_mode).await,
            Command::SetViewportConfig { viewport } => self.set_viewport_config(name, *viewport).await,
            Command::Batch { .. } => Err(PilotError::InvalidParameter(
                "batch operations cannot be nested".to_string(),
            )),
            Command::Close => self.close(name).await,
        }
    }

    async fn navigate_to_url(&self, url: &str, batch_mode: bool) -> Result<AgentResponse> {
        validate_url(url)?;
        let target = self.ensure_active(true).await?;
        self.begin(&target).await;
        self.set_state(&target, TargetProcessingState::NavigationPending);

        let pending = PendingNavigation::new(
            &target,
            self.timing.navigation_timeout(),
            self.host.subscribe(),
        );
        self.host.navigate(&target, url).await?;
        match pending.wait().await {
            Some(loaded) => self.registry.lock().set_url(&target, &loaded),
            None => warn!(
                target_id = %target,
                "no load signal within {:?}, continuing",
                self.timing.navigation_timeout()
            ),
        }

        let outcome = self
            .process_tab_core(&target, Freshness::NewTarget, CaptureMode::Full, batch_mode)
            .await?;
        let mut response = outcome.into_response(ResponseStatus::Success, "navigateToUrl");
        response.navigation_occurred = Some(true);
        Ok(response)
    }

    /// Dispatch input that may navigate or open a new target, then process
    /// whichever target the race settles on.
    async fn perform_navigating_input(
        &self,
        name: &str,
        op: InputOp,
        batch_mode: bool,
    ) -> Result<AgentResponse> {
        let original = self.ensure_active(false).await?;
        self.begin(&original).await;
        let url_before = self
            .registry
            .lock()
            .get(&original)
            .map(|r| r.url.clone())
            .unwrap_or_default();
        self.instrument(&original).await?;
        self.set_state(&original, TargetProcessingState::NavigationPending);

        let mut events = self.host.subscribe();
        self.host.dispatch_input(&original, &op).await?;

        match self.detect_new_target(&original, &url_before, &mut events).await {
            Detection::Original { navigated } => {
                let freshness = if navigated {
                    Freshness::NewTarget
                } else {
                    Freshness::Existing
                };
                let outcome = self
                    .process_tab_core(&original, freshness, CaptureMode::Full, batch_mode)
                    .await?;
                let navigation_occurred = navigated || outcome.url != url_before;
                let mut response = outcome.into_response(ResponseStatus::Success, name);
                response.navigation_occurred = Some(navigation_occurred);
                Ok(response)
            }
            Detection::NewTarget { info, activated } => {
                let new_id = info.target_id.clone();
                info!(original = %original, new_target = %new_id, "{} opened a new target", name);
                if !activated {
                    if let Err(e) = self.host.activate_target(&new_id).await {
                        warn!(target_id = %new_id, "could not bring new target forward: {}", e);
                    }
                }
                {
                    let mut registry = self.registry.lock();
                    registry.track(&info);
                    registry.set_active(&new_id);
                }
                self.set_state(&original, TargetProcessingState::Completed);

                let outcome = self
                    .process_tab_core(&new_id, Freshness::NewTarget, CaptureMode::Full, batch_mode)
                    .await?;
                let mut response = outcome.into_response(ResponseStatus::Success, name);
                response.navigation_occurred = Some(true);
                response.new_tab_opened = Some(true);
                response.new_tab_id = Some(new_id);
                response.new_tab_url = response.current_url.clone();
                response.original_tab_id = Some(original);
                Ok(response)
            }
        }
    }

    /// Execute, settle briefly, then complete on the same target. Reports
    /// `ack` since no navigation is awaited.
    async fn perform_simple_operation(
        &self,
        name: &str,
        op: SimpleOp<'_>,
        batch_mode: bool,
    ) -> Result<AgentResponse> {
        let target = self.ensure_active(false).await?;
        self.begin(&target).await;

        match op {
            SimpleOp::Input(op) => {
                self.instrument(&target).await?;
                self.host.dispatch_input(&target, &op).await?;
            }
            SimpleOp::Scroll {
                direction,
                selector,
            } => {
                self.instrument(&target).await?;
                let viewport = self.content_viewport(&target).await;
                let (x, y) = viewport.center();
                let (delta_x, delta_y) = direction.delta(self.timing.scroll_step);
                let op = InputOp::Scroll {
                    x,
                    y,
                    delta_x,
                    delta_y,
                    selector: selector.map(str::to_string),
                };
                self.host.dispatch_input(&target, &op).await?;
            }
            SimpleOp::Wait(duration) => tokio::time::sleep(duration).await,
        }
        tokio::time::sleep(self.timing.settle()).await;

        let outcome = self
            .process_tab_core(&target, Freshness::Existing, CaptureMode::Full, batch_mode)
            .await?;
        Ok(outcome.into_response(ResponseStatus::Ack, name))
    }

    async fn wait(&self, name: &str, seconds: f64, batch_mode: bool) -> Result<AgentResponse> {
        let max = self.timing.max_wait_seconds as f64;
        let seconds = if seconds > max {
            warn!(requested = seconds, max, "wait clamped");
            max
        } else {
            seconds
        };
        let duration = Duration::from_secs_f64(seconds);

        if let Err(e) = self.ensure_active(false).await {
            debug!("waiting without a target: {}", e);
            tokio::time::sleep(duration).await;
            return Ok(AgentResponse::ack(name).with_message(format!("waited {seconds}s")));
        }
        self.perform_simple_operation(name, SimpleOp::Wait(duration), batch_mode)
            .await
    }

    async fn snapshot(&self, name: &str, capture: CaptureMode, batch_mode: bool) -> Result<AgentResponse> {
        let target = self.ensure_active(false).await?;
        self.begin(&target).await;
        let outcome = self
            .process_tab_core(&target, Freshness::Existing, capture, batch_mode)
            .await?;
        Ok(outcome.into_response(ResponseStatus::Success, name))
    }

    async fn full_html(&self, name: &str, batch_mode: bool) -> Result<AgentResponse> {
        let target = self.ensure_active(false).await?;
        self.begin(&target).await;
        let outcome = self
            .process_tab_core(&target, Freshness::Existing, CaptureMode::Skip, batch_mode)
            .await?;

        let html = match self.host.evaluate(&target, PAGE_HTML).await? {
            serde_json::Value::String(html) => html,
            other => {
                return Err(PilotError::CommandFailed(format!(
                    "page returned {other} instead of HTML"
                )))
            }
        };
        let mut response = outcome.into_response(ResponseStatus::Success, name);
        response.html_content = Some(html);
        Ok(response)
    }

    async fn set_viewport_config(&self, name: &str, viewport: Viewport) -> Result<AgentResponse> {
        *self.viewport.write() = Some(viewport);

        let active = self.registry.lock().active_id();
        if let Some(target) = active.as_deref() {
            self.begin(target).await;
            self.set_state(target, TargetProcessingState::AttachingInstrumentation);
            self.attach_with_retries(target).await?;
            self.host.set_viewport_override(target, viewport).await?;
            self.set_state(target, TargetProcessingState::Completed);
        } else {
            debug!("no active target, viewport stored for the next attach");
        }

        let mut response = AgentResponse::success(name)
            .with_message(format!("viewport set to {}x{}", viewport.width, viewport.height));
        response.viewport = Some(viewport);
        response.tab_id = active;
        Ok(response)
    }

    /// Release the instrumentation session and forget every target.
    async fn close(&self, name: &str) -> Result<AgentResponse> {
        self.sessions.detach_if_needed().await;
        let forgotten = {
            let mut registry = self.registry.lock();
            let count = registry.tracked().len();
            registry.clear();
            count
        };
        info!(forgotten, "agent session closed");
        Ok(AgentResponse::success(name).with_message(format!(
            "instrumentation released, {forgotten} tab(s) forgotten"
        )))
    }

    /// Content-area size: the configured override, else what the page reports.
    async fn content_viewport(&self, target_id: &str) -> Viewport {
        if let Some(viewport) = self.viewport() {
            return viewport;
        }
        match self.host.evaluate(target_id, VIEWPORT_SIZE).await {
            Ok(value) => serde_json::from_value(value).unwrap_or(DEFAULT_VIEWPORT),
            Err(e) => {
                debug!(target_id, "viewport probe failed: {}", e);
                DEFAULT_VIEWPORT
            }
        }
    }
}
