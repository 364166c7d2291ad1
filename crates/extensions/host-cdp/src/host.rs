//! [`BrowserHost`] over one browser-level CDP connection.

use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tabpilot_config::HostConfig;
use tabpilot_protocols::{BrowserHost, Clip, HostEvent, InputOp, Result, TargetInfo, Viewport};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::connection::CdpConnection;
use crate::error::CdpError;
use crate::input::{click_events, element_center_script, key_events, wheel_event};
use crate::protocol::{CdpEvent, CdpTargetInfo};
use crate::sessions::{PageSession, SessionTable};

const EVENT_CAPACITY: usize = 256;

/// Chrome driven through the DevTools protocol.
///
/// ```rust,ignore
/// let host = CdpHost::connect(&config.host).await?;
/// let coordinator = Coordinator::new(Arc::new(host), config.timing.clone(), None);
/// ```
pub struct CdpHost {
    connection: Arc<CdpConnection>,
    sessions: Arc<Mutex<SessionTable>>,
    events: broadcast::Sender<HostEvent>,
    _pump: tokio::task::JoinHandle<()>,
}

impl CdpHost {
    /// Discover the browser behind `config.cdp_endpoint` and connect to it.
    pub async fn connect(config: &HostConfig) -> std::result::Result<Self, CdpError> {
        let version = CdpConnection::discover(&config.cdp_endpoint).await?;
        info!("Connected to browser: {}", version.browser);
        Self::open(&version.web_socket_debugger_url, config).await
    }

    /// Connect straight to a browser WebSocket URL.
    pub async fn open(ws_url: &str, config: &HostConfig) -> std::result::Result<Self, CdpError> {
        let (connection, event_rx) = CdpConnection::open(ws_url, config.call_timeout()).await?;
        let connection = Arc::new(connection);
        let sessions = Arc::new(Mutex::new(SessionTable::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let pump = tokio::spawn(Self::pump(event_rx, sessions.clone(), events.clone()));

        connection
            .call("Target.setDiscoverTargets", Some(json!({"discover": true})), None)
            .await?;

        Ok(Self {
            connection,
            sessions,
            events,
            _pump: pump,
        })
    }

    async fn pump(
        mut event_rx: mpsc::UnboundedReceiver<CdpEvent>,
        sessions: Arc<Mutex<SessionTable>>,
        events: broadcast::Sender<HostEvent>,
    ) {
        while let Some(event) = event_rx.recv().await {
            let translated = sessions.lock().translate(&event);
            for host_event in translated {
                let _ = events.send(host_event);
            }
        }
        sessions.lock().clear();
        warn!("browser event stream ended");
    }

    async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> std::result::Result<Value, CdpError> {
        self.connection.call(method, Some(params), session_id).await
    }

    /// The target's session, opening a control session when there is none.
    async fn session(&self, target_id: &str) -> std::result::Result<String, CdpError> {
        if let Some(session) = self.sessions.lock().get(target_id) {
            return Ok(session.session_id.clone());
        }
        self.open_session(target_id, false).await
    }

    async fn open_session(&self, target_id: &str, instrumented: bool) -> std::result::Result<String, CdpError> {
        let result = self
            .call(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("Missing sessionId".to_string()))?
            .to_string();

        let (kept, loser) = self.sessions.lock().insert(
            target_id,
            PageSession {
                session_id: session_id.clone(),
                instrumented,
            },
        );
        if let Some(loser) = loser {
            debug!(target_id, "dropping duplicate session {}", loser);
            let _ = self
                .call("Target.detachFromTarget", json!({"sessionId": loser}), None)
                .await;
            return Ok(kept);
        }

        self.call("Page.enable", json!({}), Some(&kept)).await?;
        self.call("Runtime.enable", json!({}), Some(&kept)).await?;
        debug!(target_id, instrumented, "session {} open", kept);
        Ok(kept)
    }

    async fn element_center(&self, session_id: &str, selector: &str) -> std::result::Result<(f64, f64), CdpError> {
        let value = self.evaluate_in(session_id, &element_center_script(selector)).await?;
        match (value["x"].as_f64(), value["y"].as_f64()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(CdpError::ElementNotFound(selector.to_string())),
        }
    }

    async fn evaluate_in(&self, session_id: &str, expression: &str) -> std::result::Result<Value, CdpError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                Some(session_id),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let message = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("Unknown error");
            return Err(CdpError::JavaScript(message.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn list_cdp_targets(&self) -> std::result::Result<Vec<CdpTargetInfo>, CdpError> {
        let result = self.call("Target.getTargets", json!({}), None).await?;
        Ok(serde_json::from_value(result["targetInfos"].clone())?)
    }
}

impl Drop for CdpHost {
    fn drop(&mut self) {
        self._pump.abort();
    }
}

#[async_trait]
impl BrowserHost for CdpHost {
    async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let targets = self.list_cdp_targets().await?;
        Ok(targets.into_iter().map(TargetInfo::from).collect())
    }

    async fn target_info(&self, target_id: &str) -> Result<Option<TargetInfo>> {
        let targets = self.list_cdp_targets().await?;
        Ok(targets
            .into_iter()
            .find(|t| t.target_id == target_id)
            .map(TargetInfo::from))
    }

    async fn create_target(&self, url: Option<&str>) -> Result<TargetInfo> {
        let url = url.unwrap_or("about:blank");
        let result = self.call("Target.createTarget", json!({"url": url}), None).await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("Missing targetId".to_string()))?
            .to_string();
        debug!(target_id = %target_id, "created target for {}", url);

        match self.target_info(&target_id).await? {
            Some(info) => Ok(info),
            None => Ok(TargetInfo::page(target_id, url)),
        }
    }

    async fn close_target(&self, target_id: &str) -> Result<()> {
        self.sessions.lock().remove(target_id);
        self.call("Target.closeTarget", json!({"targetId": target_id}), None)
            .await?;
        Ok(())
    }

    async fn activate_target(&self, target_id: &str) -> Result<()> {
        self.call("Target.activateTarget", json!({"targetId": target_id}), None)
            .await?;
        Ok(())
    }

    async fn navigate(&self, target_id: &str, url: &str) -> Result<()> {
        let session_id = self.session(target_id).await?;
        let result = self.call("Page.navigate", json!({"url": url}), Some(&session_id)).await?;
        if let Some(error) = result["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(CdpError::NavigationFailed(format!("{}: {}", url, error)).into());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn is_attached(&self, target_id: &str) -> Result<bool> {
        let instrumented = self
            .sessions
            .lock()
            .get(target_id)
            .is_some_and(|s| s.instrumented);
        if !instrumented {
            return Ok(false);
        }
        // Trust the browser over the table.
        match self
            .call("Target.getTargetInfo", json!({"targetId": target_id}), None)
            .await
        {
            Ok(result) => Ok(result["targetInfo"]["attached"].as_bool().unwrap_or(false)),
            Err(CdpError::Protocol { message, .. }) => {
                debug!(target_id, "target lookup failed: {}", message);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attach(&self, target_id: &str) -> Result<()> {
        let promoted = self.sessions.lock().promote(target_id);
        match promoted {
            Some(session_id) => debug!(target_id, "instrumenting existing session {}", session_id),
            None => {
                self.open_session(target_id, true).await?;
            }
        }
        Ok(())
    }

    async fn detach(&self, target_id: &str) -> Result<()> {
        let removed = self.sessions.lock().remove(target_id);
        if let Some(session) = removed {
            self.call(
                "Target.detachFromTarget",
                json!({"sessionId": session.session_id}),
                None,
            )
            .await?;
        }
        Ok(())
    }

    async fn set_viewport_override(&self, target_id: &str, viewport: Viewport) -> Result<()> {
        let session_id = self.session(target_id).await?;
        self.call(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": 0,
                "mobile": false,
            }),
            Some(&session_id),
        )
        .await?;
        Ok(())
    }

    async fn clear_viewport_override(&self, target_id: &str) -> Result<()> {
        let session_id = self.sessions.lock().get(target_id).map(|s| s.session_id.clone());
        if let Some(session_id) = session_id {
            self.call("Emulation.clearDeviceMetricsOverride", json!({}), Some(&session_id))
                .await?;
        }
        Ok(())
    }

    async fn dispatch_input(&self, target_id: &str, op: &InputOp) -> Result<()> {
        let session_id = self.session(target_id).await?;
        let session = Some(session_id.as_str());
        match op {
            InputOp::Click { x, y } => {
                for event in click_events(*x, *y) {
                    self.call("Input.dispatchMouseEvent", event, session).await?;
                }
            }
            InputOp::InsertText { text } => {
                self.call("Input.insertText", json!({"text": text}), session).await?;
            }
            InputOp::KeyPress { key, modifiers } => {
                for event in key_events(key, *modifiers) {
                    self.call("Input.dispatchKeyEvent", event, session).await?;
                }
            }
            InputOp::Scroll {
                x,
                y,
                delta_x,
                delta_y,
                selector,
            } => {
                let (x, y) = match selector {
                    Some(selector) => self.element_center(&session_id, selector).await?,
                    None => (f64::from(*x), f64::from(*y)),
                };
                self.call("Input.dispatchMouseEvent", wheel_event(x, y, *delta_x, *delta_y), session)
                    .await?;
            }
        }
        Ok(())
    }

    async fn capture(&self, target_id: &str, clip: Option<Clip>) -> Result<Vec<u8>> {
        let session_id = self.session(target_id).await?;
        let mut params = json!({"format": "png"});
        if let Some(clip) = clip {
            params["clip"] = json!({
                "x": clip.x,
                "y": clip.y,
                "width": clip.width,
                "height": clip.height,
                "scale": 1,
            });
        }
        let result = self.call("Page.captureScreenshot", params, Some(&session_id)).await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("Missing screenshot data".to_string()))?;
        let bytes = BASE64_STANDARD
            .decode(data)
            .map_err(|e| CdpError::InvalidResponse(format!("screenshot is not base64: {}", e)))?;
        Ok(bytes)
    }

    async fn evaluate(&self, target_id: &str, expression: &str) -> Result<Value> {
        let session_id = self.session(target_id).await?;
        Ok(self.evaluate_in(&session_id, expression).await?)
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
