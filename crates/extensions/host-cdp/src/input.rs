//! `Input.*` parameter builders.

use serde_json::{json, Value};

use crate::protocol::{key_definition, KeyEventType, MouseButton, MouseEventType};

/// Press and release of the left button.
pub fn click_events(x: u32, y: u32) -> [Value; 2] {
    [MouseEventType::MousePressed, MouseEventType::MouseReleased].map(|kind| {
        json!({
            "type": kind,
            "x": x,
            "y": y,
            "button": MouseButton::Left,
            "clickCount": 1,
        })
    })
}

pub fn wheel_event(x: f64, y: f64, delta_x: i32, delta_y: i32) -> Value {
    json!({
        "type": MouseEventType::MouseWheel,
        "x": x,
        "y": y,
        "button": MouseButton::None,
        "deltaX": delta_x,
        "deltaY": delta_y,
    })
}

/// Key down and key up for `key` with CDP modifier flags.
///
/// Keys that produce text (printable characters, Enter) carry it on the
/// key-down so the page sees the default action; with Alt, Control or Meta
/// held they become raw shortcuts instead.
pub fn key_events(key: &str, modifiers: u8) -> [Value; 2] {
    let (mut code, text) = key_definition(key);
    let mut text = text.map(str::to_string);

    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphanumeric() {
            code = Some(c.to_ascii_uppercase() as u32);
        }
        text = Some(c.to_string());
    }
    if modifiers & (1 | 2 | 4) != 0 {
        text = None;
    }

    let mut down = json!({
        "type": if text.is_some() { KeyEventType::KeyDown } else { KeyEventType::RawKeyDown },
        "key": key,
        "modifiers": modifiers,
    });
    let mut up = json!({
        "type": KeyEventType::KeyUp,
        "key": key,
        "modifiers": modifiers,
    });
    if let Some(code) = code {
        down["windowsVirtualKeyCode"] = json!(code);
        up["windowsVirtualKeyCode"] = json!(code);
    }
    if let Some(text) = text {
        down["text"] = json!(text);
    }
    [down, up]
}

/// Script returning the viewport centre of the first element matching
/// `selector`, or `null`.
pub fn element_center_script(selector: &str) -> String {
    let literal = Value::String(selector.to_string()).to_string();
    format!(
        "(() => {{ const el = document.querySelector({literal}); \
         if (!el) return null; \
         const r = el.getBoundingClientRect(); \
         return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }}; }})()"
    )
}
