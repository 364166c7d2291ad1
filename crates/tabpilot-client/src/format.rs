//! Turning agent responses into presentable content blocks.

use std::fmt::Write as _;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use tabpilot_protocols::{AgentResponse, PilotError, ResponseStatus, Result};

/// One piece of formatted output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    Image { data: Vec<u8>, mime_type: String },
}

/// Split a `data:<mime>;base64,<payload>` URI into MIME type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| PilotError::Serialization("not a data URI".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| PilotError::Serialization("data URI has no payload".to_string()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| PilotError::Serialization("data URI is not base64 encoded".to_string()))?;
    let data = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| PilotError::Serialization(format!("invalid base64 payload: {e}")))?;
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    Ok((mime_type.to_string(), data))
}

fn status_label(status: ResponseStatus) -> &'static str {
    match status {
        ResponseStatus::Ack => "ack",
        ResponseStatus::Success => "success",
        ResponseStatus::Error => "error",
    }
}

/// A text block with status, message and metadata, plus an image block when
/// the response carries a screenshot.
pub fn format_response(response: &AgentResponse) -> Vec<ContentBlock> {
    let mut text = format!("{}: {}", response.command, status_label(response.status));
    if let Some(kind) = response.error_kind {
        let _ = write!(text, " ({kind:?})");
    }
    if let Some(message) = response.message.as_deref() {
        let _ = write!(text, "\n{message}");
    }
    if let Some(url) = response.current_url.as_deref() {
        let _ = write!(text, "\nurl: {url}");
    }
    if let Some(tab_id) = response.tab_id.as_deref() {
        let _ = write!(text, "\ntab: {tab_id}");
    }
    if response.navigation_occurred == Some(true) {
        text.push_str("\nnavigation occurred");
    }
    if response.new_tab_opened == Some(true) {
        let _ = write!(
            text,
            "\nnew tab opened: {} ({})",
            response.new_tab_id.as_deref().unwrap_or("?"),
            response.new_tab_url.as_deref().unwrap_or("?")
        );
    }
    if let Some(viewport) = response.viewport {
        let _ = write!(text, "\nviewport: {}x{}", viewport.width, viewport.height);
    }
    if let Some(tabs) = response.tabs.as_ref() {
        for tab in tabs {
            let marker = if tab.active { "*" } else { " " };
            let _ = write!(text, "\n{marker}[{}] {} {}", tab.index, tab.title, tab.url);
        }
    }
    if let Some(steps) = response.steps.as_ref() {
        for step in steps {
            let _ = write!(text, "\n  step {} {}: {}", step.index, step.name, status_label(step.status));
            if let Some(message) = step.message.as_deref().filter(|_| step.status == ResponseStatus::Error) {
                let _ = write!(text, " ({message})");
            }
        }
    }
    if let Some(html) = response.html_content.as_deref() {
        let _ = write!(text, "\nhtml: {} bytes", html.len());
    }

    let mut blocks = Vec::with_capacity(2);
    let image = response.screenshot.as_deref().map(decode_data_uri);
    if let Some(Err(e)) = &image {
        let _ = write!(text, "\nscreenshot unreadable: {e}");
    }
    blocks.push(ContentBlock::Text { text });
    if let Some(Ok((mime_type, data))) = image {
        blocks.push(ContentBlock::Image { data, mime_type });
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabpilot_protocols::{BatchStepReport, ErrorKind, TabSummary};

    fn png_uri(bytes: &[u8]) -> String {
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(bytes))
    }

    #[test]
    fn test_decode_data_uri() {
        let (mime, data) = decode_data_uri(&png_uri(b"abc")).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, b"abc");

        assert!(decode_data_uri("image/png;base64,AAAA").is_err());
        assert!(decode_data_uri("data:image/png,AAAA").is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn test_text_and_image() {
        let mut response = AgentResponse::success("click");
        response.current_url = Some("https://a.test".into());
        response.new_tab_opened = Some(true);
        response.new_tab_id = Some("t2".into());
        response.new_tab_url = Some("https://b.test".into());
        response.screenshot = Some(png_uri(b"png-bytes"));

        let blocks = format_response(&response);
        assert_eq!(blocks.len(), 2);
        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected text first");
        };
        assert!(text.starts_with("click: success"));
        assert!(text.contains("url: https://a.test"));
        assert!(text.contains("new tab opened: t2 (https://b.test)"));
        assert_eq!(
            blocks[1],
            ContentBlock::Image {
                data: b"png-bytes".to_vec(),
                mime_type: "image/png".into()
            }
        );
    }

    #[test]
    fn test_error_without_image() {
        let response = AgentResponse::error("click", &PilotError::InvalidParameter("bad coordinate".into()));
        let blocks = format_response(&response);
        assert_eq!(blocks.len(), 1);
        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected text");
        };
        assert!(text.contains("error (InvalidParameter)"));
        assert!(text.contains("bad coordinate"));
    }

    #[test]
    fn test_tabs_and_steps() {
        let mut response = AgentResponse::error("batch", &PilotError::UnknownCommand("badOp".into()));
        response.tabs = Some(vec![TabSummary {
            index: 0,
            tab_id: "t1".into(),
            url: "https://a.test".into(),
            title: "A".into(),
            active: true,
        }]);
        response.steps = Some(vec![
            BatchStepReport {
                index: 0,
                name: "type".into(),
                status: ResponseStatus::Ack,
                ..Default::default()
            },
            BatchStepReport {
                index: 1,
                name: "badOp".into(),
                status: ResponseStatus::Error,
                message: Some("unknown command: badOp".into()),
                error_kind: Some(ErrorKind::UnknownCommand),
                ..Default::default()
            },
        ]);

        let blocks = format_response(&response);
        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected text");
        };
        assert!(text.contains("*[0] A https://a.test"));
        assert!(text.contains("step 0 type: ack"));
        assert!(text.contains("step 1 badOp: error (unknown command: badOp)"));
    }

    #[test]
    fn test_broken_screenshot_is_reported() {
        let mut response = AgentResponse::success("takeScreenshot");
        response.screenshot = Some("garbage".into());
        let blocks = format_response(&response);
        assert_eq!(blocks.len(), 1);
        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected text");
        };
        assert!(text.contains("screenshot unreadable"));
    }
}
