//! Typed command model.
//!
//! Commands arrive as an [`Envelope`] whose payload fields sit next to the
//! command name. Parsing happens before any host call, so malformed input
//! never touches the browser.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{PilotError, Result};
use crate::host::Viewport;
use crate::message::Envelope;

/// `"x,y"` point in content-area pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub x: u32,
    pub y: u32,
}

impl Coordinate {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl FromStr for Coordinate {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PilotError::InvalidParameter(format!("coordinate must be \"x,y\", got {s:?}"));
        let (x, y) = s.split_once(',').ok_or_else(invalid)?;
        let x = x.trim().parse().map_err(|_| invalid())?;
        let y = y.trim().parse().map_err(|_| invalid())?;
        Ok(Self { x, y })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Wheel delta for one scroll step.
    pub fn delta(&self, step: i32) -> (i32, i32) {
        match self {
            ScrollDirection::Up => (0, -step),
            ScrollDirection::Down => (0, step),
            ScrollDirection::Left => (-step, 0),
            ScrollDirection::Right => (step, 0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(PilotError::InvalidParameter(format!(
                "scroll direction must be up, down, left or right, got {other:?}"
            ))),
        }
    }
}

/// `"Mod+Mod+Key"`, e.g. `"Control+Shift+t"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombination {
    pub modifiers: Vec<String>,
    pub key: String,
}

impl KeyCombination {
    /// CDP-style modifier bit mask: Alt=1, Control=2, Meta=4, Shift=8.
    pub fn modifier_flags(&self) -> u8 {
        self.modifiers
            .iter()
            .map(|m| modifier_flag(m).unwrap_or(0))
            .fold(0, |acc, flag| acc | flag)
    }

    /// Whether this combination can open or navigate a context.
    pub fn may_navigate(&self) -> bool {
        let key = self.key.to_ascii_lowercase();
        if key == "enter" || key == "return" {
            return true;
        }
        let command_modifier = self.modifier_flags() & (2 | 4) != 0;
        command_modifier && matches!(key.as_str(), "t" | "n" | "l")
    }
}

fn modifier_flag(name: &str) -> Option<u8> {
    match name.to_ascii_lowercase().as_str() {
        "alt" | "option" => Some(1),
        "control" | "ctrl" => Some(2),
        "meta" | "command" | "cmd" => Some(4),
        "shift" => Some(8),
        _ => None,
    }
}

impl FromStr for KeyCombination {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('+').map(str::trim).collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(PilotError::InvalidParameter(format!(
                "key combination must look like \"Mod+Key\", got {s:?}"
            )));
        }
        let (key, modifiers) = parts.split_last().ok_or_else(|| {
            PilotError::InvalidParameter("empty key combination".to_string())
        })?;
        if let Some(unknown) = modifiers.iter().find(|m| modifier_flag(m).is_none()) {
            return Err(PilotError::InvalidParameter(format!("unknown modifier {unknown:?}")));
        }
        Ok(Self {
            modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{m}+")?;
        }
        write!(f, "{}", self.key)
    }
}

/// One step of a batch, validated lazily when the step is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl BatchOperation {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Parse the step into a command. Nested batches are rejected.
    pub fn to_command(&self) -> Result<Command> {
        let payload = match &self.parameters {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(PilotError::InvalidParameter(format!(
                    "parameters for {} must be an object, got {other}",
                    self.name
                )))
            }
        };
        let command = Command::parse(&self.name, &payload)?;
        if matches!(command, Command::Batch { .. }) {
            return Err(PilotError::InvalidParameter("batch cannot be nested".to_string()));
        }
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NavigateToUrl { url: String },
    Click { coordinate: Coordinate },
    Type { text: String },
    PressKey { key: String },
    PressKeyCombination { combination: KeyCombination },
    Scroll {
        direction: ScrollDirection,
        selector: Option<String>,
    },
    TakeScreenshot,
    TakeAreaScreenshot {
        top_left: Coordinate,
        bottom_right: Coordinate,
    },
    GetFullHtml,
    Wait { seconds: f64 },
    ListTabs,
    NewTab { url: Option<String> },
    SelectTab { index: usize },
    CloseTab { index: Option<usize> },
    SetViewportConfig { viewport: Viewport },
    Batch {
        operations: Vec<BatchOperation>,
        interval_ms: Option<u64>,
    },
    Close,
}

#[derive(Deserialize)]
struct UrlParams {
    url: String,
}

#[derive(Deserialize)]
struct CoordinateParams {
    coordinate: String,
}

#[derive(Deserialize)]
struct TextParams {
    text: String,
}

#[derive(Deserialize)]
struct KeyParams {
    key: String,
}

#[derive(Deserialize)]
struct CombinationParams {
    combination: String,
}

#[derive(Deserialize)]
struct ScrollParams {
    direction: String,
    #[serde(default)]
    selector: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AreaParams {
    top_left: String,
    bottom_right: String,
}

#[derive(Deserialize)]
struct WaitParams {
    seconds: f64,
}

#[derive(Deserialize)]
struct NewTabParams {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct IndexParams {
    index: usize,
}

#[derive(Deserialize)]
struct OptionalIndexParams {
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct ViewportParams {
    viewport: Viewport,
}

#[derive(Deserialize)]
struct BatchParams {
    operations: Vec<BatchOperation>,
    #[serde(default)]
    interval_ms: Option<u64>,
}

fn params<T: DeserializeOwned>(command: &str, payload: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| PilotError::InvalidParameter(format!("{command}: {e}")))
}

impl Command {
    pub const NAMES: &'static [&'static str] = &[
        "navigateToUrl",
        "click",
        "type",
        "pressKey",
        "pressKeyCombination",
        "scroll",
        "takeScreenshot",
        "takeAreaScreenshot",
        "getFullHtml",
        "wait",
        "listTabs",
        "newTab",
        "selectTab",
        "closeTab",
        "setViewportConfig",
        "batch",
        "close",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::NavigateToUrl { .. } => "navigateToUrl",
            Command::Click { .. } => "click",
            Command::Type { .. } => "type",
            Command::PressKey { .. } => "pressKey",
            Command::PressKeyCombination { .. } => "pressKeyCombination",
            Command::Scroll { .. } => "scroll",
            Command::TakeScreenshot => "takeScreenshot",
            Command::TakeAreaScreenshot { .. } => "takeAreaScreenshot",
            Command::GetFullHtml => "getFullHtml",
            Command::Wait { .. } => "wait",
            Command::ListTabs => "listTabs",
            Command::NewTab { .. } => "newTab",
            Command::SelectTab { .. } => "selectTab",
            Command::CloseTab { .. } => "closeTab",
            Command::SetViewportConfig { .. } => "setViewportConfig",
            Command::Batch { .. } => "batch",
            Command::Close => "close",
        }
    }

    /// Parse a command from its wire name and payload fields.
    pub fn parse(name: &str, payload: &Map<String, Value>) -> Result<Self> {
        let command = match name {
            "navigateToUrl" => {
                let p: UrlParams = params(name, payload)?;
                if p.url.trim().is_empty() {
                    return Err(PilotError::InvalidParameter("url must not be empty".into()));
                }
                Command::NavigateToUrl { url: p.url }
            }
            "click" => {
                let p: CoordinateParams = params(name, payload)?;
                Command::Click {
                    coordinate: p.coordinate.parse()?,
                }
            }
            "type" => {
                let p: TextParams = params(name, payload)?;
                Command::Type { text: p.text }
            }
            "pressKey" => {
                let p: KeyParams = params(name, payload)?;
                if p.key.is_empty() {
                    return Err(PilotError::InvalidParameter("key must not be empty".into()));
                }
                Command::PressKey { key: p.key }
            }
            "pressKeyCombination" => {
                let p: CombinationParams = params(name, payload)?;
                Command::PressKeyCombination {
                    combination: p.combination.parse()?,
                }
            }
            "scroll" => {
                let p: ScrollParams = params(name, payload)?;
                Command::Scroll {
                    direction: p.direction.parse()?,
                    selector: p.selector.filter(|s| !s.trim().is_empty()),
                }
            }
            "takeScreenshot" => Command::TakeScreenshot,
            "takeAreaScreenshot" => {
                let p: AreaParams = params(name, payload)?;
                let top_left: Coordinate = p.top_left.parse()?;
                let bottom_right: Coordinate = p.bottom_right.parse()?;
                if bottom_right.x <= top_left.x || bottom_right.y <= top_left.y {
                    return Err(PilotError::InvalidParameter(format!(
                        "bottomRight {bottom_right} must be below and right of topLeft {top_left}"
                    )));
                }
                Command::TakeAreaScreenshot {
                    top_left,
                    bottom_right,
                }
            }
            "getFullHtml" => Command::GetFullHtml,
            "wait" => {
                let p: WaitParams = params(name, payload)?;
                if !p.seconds.is_finite() || p.seconds < 0.0 {
                    return Err(PilotError::InvalidParameter(format!(
                        "seconds must be a non-negative number, got {}",
                        p.seconds
                    )));
                }
                Command::Wait { seconds: p.seconds }
            }
            "listTabs" => Command::ListTabs,
            "newTab" => {
                let p: NewTabParams = params(name, payload)?;
                Command::NewTab {
                    url: p.url.filter(|u| !u.trim().is_empty()),
                }
            }
            "selectTab" => {
                let p: IndexParams = params(name, payload)?;
                Command::SelectTab { index: p.index }
            }
            "closeTab" => {
                let p: OptionalIndexParams = params(name, payload)?;
                Command::CloseTab { index: p.index }
            }
            "setViewportConfig" => {
                let p: ViewportParams = params(name, payload)?;
                if p.viewport.width == 0 || p.viewport.height == 0 {
                    return Err(PilotError::InvalidParameter(
                        "viewport width and height must be positive".into(),
                    ));
                }
                Command::SetViewportConfig {
                    viewport: p.viewport,
                }
            }
            "batch" => {
                let p: BatchParams = params(name, payload)?;
                if p.operations.is_empty() {
                    return Err(PilotError::InvalidParameter("batch has no operations".into()));
                }
                Command::Batch {
                    operations: p.operations,
                    interval_ms: p.interval_ms,
                }
            }
            "close" => Command::Close,
            other => return Err(PilotError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Self::parse(&envelope.command, &envelope.payload)
    }

    /// Payload fields as they appear on the wire.
    pub fn to_payload(&self) -> Map<String, Value> {
        let value = match self {
            Command::NavigateToUrl { url } => json!({ "url": url }),
            Command::Click { coordinate } => json!({ "coordinate": coordinate.to_string() }),
            Command::Type { text } => json!({ "text": text }),
            Command::PressKey { key } => json!({ "key": key }),
            Command::PressKeyCombination { combination } => {
                json!({ "combination": combination.to_string() })
            }
            Command::Scroll {
                direction,
                selector,
            } => match selector {
                Some(selector) => json!({ "direction": direction.as_str(), "selector": selector }),
                None => json!({ "direction": direction.as_str() }),
            },
            Command::TakeAreaScreenshot {
                top_left,
                bottom_right,
            } => json!({
                "topLeft": top_left.to_string(),
                "bottomRight": bottom_right.to_string(),
            }),
            Command::Wait { seconds } => json!({ "seconds": seconds }),
            Command::NewTab { url: Some(url) } => json!({ "url": url }),
            Command::SelectTab { index } => json!({ "index": index }),
            Command::CloseTab { index: Some(index) } => json!({ "index": index }),
            Command::SetViewportConfig { viewport } => json!({ "viewport": viewport }),
            Command::Batch {
                operations,
                interval_ms,
            } => match interval_ms {
                Some(ms) => json!({ "operations": operations, "interval_ms": ms }),
                None => json!({ "operations": operations }),
            },
            Command::TakeScreenshot
            | Command::GetFullHtml
            | Command::ListTabs
            | Command::NewTab { url: None }
            | Command::CloseTab { index: None }
            | Command::Close => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn to_envelope(&self, request_id: u64) -> Envelope {
        Envelope::new(request_id, self.name(), self.to_payload())
    }

    /// Commands whose effects may land on a newly opened context.
    pub fn may_open_target(&self) -> bool {
        match self {
            Command::Click { .. } | Command::PressKey { .. } => true,
            Command::PressKeyCombination { combination } => combination.may_navigate(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
