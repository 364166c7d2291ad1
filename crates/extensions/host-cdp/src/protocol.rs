//! CDP protocol types and message definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabpilot_protocols::{TargetInfo, TargetKind};

/// CDP request message.
#[derive(Debug, Serialize)]
pub struct CdpRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Anything the browser sends: a call result or an event.
#[derive(Debug, Deserialize)]
pub struct CdpResponse {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<CdpErrorResponse>,
    pub method: Option<String>,
    pub params: Option<Value>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// CDP error in response.
#[derive(Debug, Deserialize)]
pub struct CdpErrorResponse {
    pub code: i64,
    pub message: String,
}

/// An event, split out of a [`CdpResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

impl CdpResponse {
    pub fn into_event(self) -> Option<CdpEvent> {
        let method = self.method?;
        Some(CdpEvent {
            method,
            params: self.params.unwrap_or(Value::Null),
            session_id: self.session_id,
        })
    }
}

/// `TargetInfo` as the Target domain reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpTargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
    pub opener_id: Option<String>,
    pub browser_context_id: Option<String>,
}

impl From<CdpTargetInfo> for TargetInfo {
    fn from(info: CdpTargetInfo) -> Self {
        TargetInfo {
            kind: TargetKind::from_cdp(&info.target_type),
            target_id: info.target_id,
            url: info.url,
            title: info.title,
            opener_id: info.opener_id,
        }
    }
}

/// Browser version info.
///
/// Note: Chrome returns PascalCase field names for this endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Mouse event type for `Input.dispatchMouseEvent`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventType {
    MousePressed,
    MouseReleased,
    MouseWheel,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    None,
    Left,
}

/// Key event type for `Input.dispatchKeyEvent`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
    RawKeyDown,
}

/// Key code and inserted text for the named keys that need them.
///
/// Without `text` a key such as Enter produces no default action
/// (no form submission, no newline).
pub fn key_definition(key: &str) -> (Option<u32>, Option<&'static str>) {
    match key {
        "Enter" => (Some(13), Some("\r")),
        "Tab" => (Some(9), None),
        "Backspace" => (Some(8), None),
        "Escape" => (Some(27), None),
        "Delete" => (Some(46), None),
        "Space" | " " => (Some(32), Some(" ")),
        "ArrowLeft" => (Some(37), None),
        "ArrowUp" => (Some(38), None),
        "ArrowRight" => (Some(39), None),
        "ArrowDown" => (Some(40), None),
        "PageUp" => (Some(33), None),
        "PageDown" => (Some(34), None),
        "Home" => (Some(36), None),
        "End" => (Some(35), None),
        _ => (None, None),
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
