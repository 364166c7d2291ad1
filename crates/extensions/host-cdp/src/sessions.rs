//! Flattened page sessions and the CDP event -> [`HostEvent`] mapping.

use std::collections::HashMap;

use serde_json::Value;
use tabpilot_protocols::{HostEvent, TargetInfo};
use tracing::{debug, trace, warn};

use crate::protocol::{CdpEvent, CdpTargetInfo};

/// A flattened session on one target.
///
/// Sessions are opened lazily for navigation and evaluation; `instrumented`
/// marks the one the agent explicitly attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSession {
    pub session_id: String,
    pub instrumented: bool,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, PageSession>,
    urls: HashMap<String, String>,
}

impl SessionTable {
    pub fn get(&self, target_id: &str) -> Option<&PageSession> {
        self.sessions.get(target_id)
    }

    /// Record a freshly opened session. If another session for the target
    /// won the race, that one is kept and the loser's id is returned so it
    /// can be detached.
    pub fn insert(&mut self, target_id: &str, session: PageSession) -> (String, Option<String>) {
        match self.sessions.get_mut(target_id) {
            Some(existing) => {
                existing.instrumented |= session.instrumented;
                (existing.session_id.clone(), Some(session.session_id))
            }
            None => {
                let session_id = session.session_id.clone();
                self.sessions.insert(target_id.to_string(), session);
                (session_id, None)
            }
        }
    }

    /// Mark the target's session as the instrumentation session.
    pub fn promote(&mut self, target_id: &str) -> Option<String> {
        let session = self.sessions.get_mut(target_id)?;
        session.instrumented = true;
        Some(session.session_id.clone())
    }

    pub fn remove(&mut self, target_id: &str) -> Option<PageSession> {
        self.sessions.remove(target_id)
    }

    pub fn target_for_session(&self, session_id: &str) -> Option<String> {
        self.sessions
            .iter()
            .find(|(_, s)| s.session_id == session_id)
            .map(|(target_id, _)| target_id.clone())
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Translate one CDP event, updating the table on the way.
    pub fn translate(&mut self, event: &CdpEvent) -> Vec<HostEvent> {
        match event.method.as_str() {
            "Target.targetCreated" => {
                let Some(info) = parse_target_info(&event.params) else {
                    return Vec::new();
                };
                self.urls.insert(info.target_id.clone(), info.url.clone());
                let mut events = vec![HostEvent::TargetCreated(info.clone())];
                // Chrome foregrounds pages opened by another page.
                if info.opener_id.is_some() && !info.is_system() {
                    events.push(HostEvent::TargetActivated {
                        target_id: info.target_id,
                        opener_id: info.opener_id,
                    });
                }
                events
            }
            "Target.targetInfoChanged" => {
                let Some(info) = parse_target_info(&event.params) else {
                    return Vec::new();
                };
                self.urls.insert(info.target_id.clone(), info.url.clone());
                vec![HostEvent::TargetInfoChanged(info)]
            }
            "Target.targetDestroyed" | "Target.targetCrashed" => {
                let Some(target_id) = event.params["targetId"].as_str() else {
                    return Vec::new();
                };
                self.sessions.remove(target_id);
                self.urls.remove(target_id);
                vec![HostEvent::TargetClosed {
                    target_id: target_id.to_string(),
                }]
            }
            "Target.detachedFromTarget" => {
                let Some(session_id) = event.params["sessionId"].as_str() else {
                    return Vec::new();
                };
                // Sessions this side detached were removed beforehand.
                let Some(target_id) = self.target_for_session(session_id) else {
                    return Vec::new();
                };
                let removed = self.sessions.remove(&target_id);
                debug!(target_id = %target_id, "browser dropped session {}", session_id);
                match removed {
                    Some(session) if session.instrumented => {
                        vec![HostEvent::InstrumentationDetached { target_id }]
                    }
                    _ => Vec::new(),
                }
            }
            "Page.frameNavigated" => {
                let frame = &event.params["frame"];
                let is_main = frame.get("parentId").is_none_or(Value::is_null);
                if let (true, Some(target_id), Some(url)) =
                    (is_main, self.session_target(event), frame["url"].as_str())
                {
                    self.urls.insert(target_id, url.to_string());
                }
                Vec::new()
            }
            "Page.loadEventFired" => match self.session_target(event) {
                Some(target_id) => {
                    let url = self.urls.get(&target_id).cloned().unwrap_or_default();
                    vec![HostEvent::LoadCompleted { target_id, url }]
                }
                None => Vec::new(),
            },
            other => {
                trace!("ignoring CDP event {}", other);
                Vec::new()
            }
        }
    }

    fn session_target(&self, event: &CdpEvent) -> Option<String> {
        let session_id = event.session_id.as_deref()?;
        self.target_for_session(session_id)
    }
}

fn parse_target_info(params: &Value) -> Option<TargetInfo> {
    match serde_json::from_value::<CdpTargetInfo>(params["targetInfo"].clone()) {
        Ok(info) => Some(info.into()),
        Err(e) => {
            warn!("malformed targetInfo: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value, session_id: Option<&str>) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        }
    }

    fn target_info(target_id: &str, url: &str, opener: Option<&str>) -> Value {
        let mut info = json!({
            "targetId": target_id,
            "type": "page",
            "title": "",
            "url": url,
            "attached": false,
        });
        if let Some(opener) = opener {
            info["openerId"] = json!(opener);
        }
        json!({"targetInfo": info})
    }

    fn session(id: &str, instrumented: bool) -> PageSession {
        PageSession {
            session_id: id.to_string(),
            instrumented,
        }
    }

    #[test]
    fn test_popup_is_created_and_activated() {
        let mut table = SessionTable::default();
        let events = table.translate(&event(
            "Target.targetCreated",
            target_info("T2", "https://b.test", Some("T1")),
            None,
        ));

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], HostEvent::TargetCreated(info) if info.opener_id.as_deref() == Some("T1")));
        assert_eq!(
            events[1],
            HostEvent::TargetActivated {
                target_id: "T2".into(),
                opener_id: Some("T1".into()),
            }
        );
    }

    #[test]
    fn test_plain_target_is_only_created() {
        let mut table = SessionTable::default();
        let events = table.translate(&event(
            "Target.targetCreated",
            target_info("T3", "about:blank", None),
            None,
        ));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_load_carries_latest_url() {
        let mut table = SessionTable::default();
        table.insert("T1", session("S1", false));
        table.translate(&event(
            "Target.targetInfoChanged",
            target_info("T1", "https://a.test/start", None),
            None,
        ));
        table.translate(&event(
            "Page.frameNavigated",
            json!({"frame": {"id": "F1", "url": "https://a.test/next"}}),
            Some("S1"),
        ));
        // Subframe navigations leave the page URL alone.
        table.translate(&event(
            "Page.frameNavigated",
            json!({"frame": {"id": "F2", "parentId": "F1", "url": "https://ads.test"}}),
            Some("S1"),
        ));

        let events = table.translate(&event("Page.loadEventFired", json!({"timestamp": 2.0}), Some("S1")));
        assert_eq!(
            events,
            vec![HostEvent::LoadCompleted {
                target_id: "T1".into(),
                url: "https://a.test/next".into(),
            }]
        );
    }

    #[test]
    fn test_load_from_unknown_session_is_dropped() {
        let mut table = SessionTable::default();
        let events = table.translate(&event("Page.loadEventFired", json!({}), Some("S404")));
        assert!(events.is_empty());
    }

    #[test]
    fn test_destroyed_target_forgets_session() {
        let mut table = SessionTable::default();
        table.insert("T1", session("S1", true));

        let events = table.translate(&event("Target.targetDestroyed", json!({"targetId": "T1"}), None));

        assert_eq!(events, vec![HostEvent::TargetClosed { target_id: "T1".into() }]);
        assert!(table.get("T1").is_none());
    }

    #[test]
    fn test_browser_detach_of_instrumented_session() {
        let mut table = SessionTable::default();
        table.insert("T1", session("S1", true));
        table.insert("T2", session("S2", false));

        let events = table.translate(&event(
            "Target.detachedFromTarget",
            json!({"sessionId": "S1", "targetId": "T1"}),
            None,
        ));
        assert_eq!(events, vec![HostEvent::InstrumentationDetached { target_id: "T1".into() }]);

        // A control session going away is not an instrumentation loss.
        let events = table.translate(&event(
            "Target.detachedFromTarget",
            json!({"sessionId": "S2", "targetId": "T2"}),
            None,
        ));
        assert!(events.is_empty());
        assert!(table.get("T2").is_none());
    }

    #[test]
    fn test_insert_race_keeps_first_session() {
        let mut table = SessionTable::default();
        assert_eq!(table.insert("T1", session("S1", false)), ("S1".to_string(), None));

        let (kept, loser) = table.insert("T1", session("S2", true));
        assert_eq!(kept, "S1");
        assert_eq!(loser.as_deref(), Some("S2"));
        assert!(table.get("T1").unwrap().instrumented);
    }

    #[test]
    fn test_promote() {
        let mut table = SessionTable::default();
        assert!(table.promote("T1").is_none());
        table.insert("T1", session("S1", false));
        assert_eq!(table.promote("T1").as_deref(), Some("S1"));
        assert!(table.get("T1").unwrap().instrumented);
    }
}
