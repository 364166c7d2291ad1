//! Messages exchanged between the orchestrator and the agent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, PilotError, Result};
use crate::host::Viewport;

/// Unsolicited agent -> orchestrator message announcing the viewport.
pub const VIEWPORT_SYNC: &str = "viewportSync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    Orchestrator,
    Agent,
}

/// Orchestrator -> agent request: `{requestId, command, <payload>, source}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub command: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    pub source: MessageSource,
}

impl Envelope {
    pub fn new(request_id: u64, command: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            request_id: Some(request_id),
            command: command.into(),
            payload,
            source: MessageSource::Orchestrator,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Fire-and-confirm: the operation ran but no navigation was awaited.
    Ack,
    #[default]
    Success,
    Error,
}

/// One tracked browsing context as listed by `listTabs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSummary {
    pub index: usize,
    pub tab_id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub active: bool,
}

/// Outcome of one step of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStepReport {
    pub index: usize,
    pub name: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_occurred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tab_opened: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tab_id: Option<String>,
}

/// Agent -> orchestrator message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub status: ResponseStatus,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Data URI (`data:image/png;base64,...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabs: Option<Vec<TabSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_occurred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tab_opened: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tab_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<BatchStepReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MessageSource>,
}

impl AgentResponse {
    pub fn new(status: ResponseStatus, command: impl Into<String>) -> Self {
        Self {
            status,
            command: command.into(),
            source: Some(MessageSource::Agent),
            ..Default::default()
        }
    }

    pub fn success(command: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Success, command)
    }

    pub fn ack(command: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Ack, command)
    }

    pub fn error(command: impl Into<String>, error: &PilotError) -> Self {
        let mut response = Self::new(ResponseStatus::Error, command);
        response.message = Some(error.to_string());
        response.error_kind = Some(error.kind());
        response
    }

    pub fn viewport_sync(viewport: Viewport) -> Self {
        let mut response = Self::success(VIEWPORT_SYNC);
        response.viewport = Some(viewport);
        response
    }

    pub fn with_request_id(mut self, request_id: Option<u64>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// The error this response reports, if any.
    pub fn as_error(&self) -> Option<PilotError> {
        self.is_error().then(|| {
            PilotError::from_wire(
                self.error_kind,
                self.message.clone().unwrap_or_else(|| format!("{} failed", self.command)),
            )
        })
    }

    /// Turn an error response into `Err`, leaving ack/success untouched.
    pub fn into_result(self) -> Result<Self> {
        match self.as_error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
