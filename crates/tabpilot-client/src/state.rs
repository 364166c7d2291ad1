//! Last-known view of the agent's browsing session.

use tabpilot_protocols::{AgentResponse, Viewport, VIEWPORT_SYNC};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub current_target: Option<String>,
    pub current_url: Option<String>,
    pub viewport: Option<Viewport>,
}

impl SessionState {
    /// Fold one agent message into the state. Error responses only carry
    /// the fields the agent still knew, so absent fields never clear state.
    pub fn record(&mut self, response: &AgentResponse) {
        if let Some(tab_id) = response.tab_id.as_ref() {
            self.current_target = Some(tab_id.clone());
        }
        if let Some(url) = response.current_url.as_ref().filter(|u| !u.is_empty()) {
            self.current_url = Some(url.clone());
        }
        if let Some(viewport) = response.viewport {
            self.viewport = Some(viewport);
        }

        // Closing a tab can leave nothing active.
        if response.command == "closeTab" && response.tab_id.is_none() && !response.is_error() {
            self.current_target = None;
            self.current_url = None;
        }
        if response.command == "close" && !response.is_error() {
            self.current_target = None;
        }
    }

    pub fn is_viewport_sync(response: &AgentResponse) -> bool {
        response.command == VIEWPORT_SYNC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabpilot_protocols::PilotError;

    #[test]
    fn test_record_success() {
        let mut state = SessionState::default();
        let mut response = AgentResponse::success("navigateToUrl");
        response.tab_id = Some("t1".into());
        response.current_url = Some("https://a.test".into());
        state.record(&response);

        assert_eq!(state.current_target.as_deref(), Some("t1"));
        assert_eq!(state.current_url.as_deref(), Some("https://a.test"));
    }

    #[test]
    fn test_error_keeps_state() {
        let mut state = SessionState {
            current_target: Some("t1".into()),
            current_url: Some("https://a.test".into()),
            viewport: None,
        };
        state.record(&AgentResponse::error(
            "click",
            &PilotError::TargetVanished("t1".into()),
        ));
        assert_eq!(state.current_target.as_deref(), Some("t1"));
    }

    #[test]
    fn test_viewport_sync() {
        let mut state = SessionState::default();
        let sync = AgentResponse::viewport_sync(Viewport::new(800, 600));
        assert!(SessionState::is_viewport_sync(&sync));
        state.record(&sync);
        assert_eq!(state.viewport, Some(Viewport::new(800, 600)));
    }

    #[test]
    fn test_closing_last_tab_clears_target() {
        let mut state = SessionState {
            current_target: Some("t1".into()),
            current_url: Some("https://a.test".into()),
            viewport: None,
        };
        state.record(&AgentResponse::success("closeTab").with_message("closed tab 0"));
        assert!(state.current_target.is_none());
        assert!(state.current_url.is_none());
    }
}
