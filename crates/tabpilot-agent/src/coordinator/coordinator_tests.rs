use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tabpilot_protocols::{
    Command, Coordinate, Envelope, ErrorKind, KeyCombination, ResponseStatus, ScrollDirection,
    Viewport,
};

use super::Coordinator;
use crate::registry::TargetProcessingState;
use crate::testing::{fast_timing, InputEffect, ScriptedHost};

fn setup(viewport: Option<Viewport>) -> (Arc<ScriptedHost>, Arc<Coordinator>) {
    let host = Arc::new(ScriptedHost::new());
    let coordinator = Arc::new(Coordinator::new(host.clone(), fast_timing(), viewport));
    coordinator.spawn_event_pump();
    (host, coordinator)
}

fn click(x: u32, y: u32) -> Command {
    Command::Click {
        coordinate: Coordinate::new(x, y),
    }
}

fn envelope(command: &str, payload: serde_json::Value) -> Envelope {
    Envelope::new(1, command, payload.as_object().cloned().unwrap_or_default())
}

// ---- navigation ----

#[tokio::test]
async fn test_navigate_on_fresh_session() {
    let (host, coordinator) = setup(None);

    let response = coordinator
        .execute(
            &Command::NavigateToUrl {
                url: "https://example.com".into(),
            },
            Some(1),
        )
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.request_id, Some(1));
    assert_eq!(response.current_url.as_deref(), Some("https://example.com"));
    assert_eq!(response.navigation_occurred, Some(true));
    assert!(response.screenshot.unwrap().starts_with("data:image/png;base64,"));

    let active = coordinator.active_target().unwrap();
    assert_eq!(host.attached().as_deref(), Some(active.as_str()));
    assert_eq!(coordinator.target_state(&active), Some(TargetProcessingState::Completed));
    assert_eq!(host.count_calls("create_target:"), 1);
}

#[tokio::test]
async fn test_navigate_reuses_existing_page() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");

    let response = coordinator
        .execute(
            &Command::NavigateToUrl {
                url: "https://next.test/a".into(),
            },
            None,
        )
        .await;

    assert_eq!(response.tab_id.as_deref(), Some(page.as_str()));
    assert_eq!(host.target_url(&page).as_deref(), Some("https://next.test/a"));
    assert_eq!(host.count_calls("create_target:"), 0);
}

#[tokio::test]
async fn test_navigate_rejects_bad_url_before_host_calls() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");

    let response = coordinator
        .execute(
            &Command::NavigateToUrl {
                url: "not a url".into(),
            },
            None,
        )
        .await;

    assert_eq!(response.error_kind, Some(ErrorKind::InvalidParameter));
    assert!(host.calls().is_empty());
}

// ---- navigating input ----

#[tokio::test]
async fn test_click_opening_new_target_switches_active() {
    let (host, coordinator) = setup(None);
    let original = host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenTarget {
        url: "https://popup.test".into(),
        with_opener: true,
    });

    let response = coordinator.execute(&click(500, 300), None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.new_tab_opened, Some(true));
    assert_eq!(response.original_tab_id.as_deref(), Some(original.as_str()));
    let new_tab = response.new_tab_id.clone().unwrap();
    assert_eq!(response.tab_id.as_deref(), Some(new_tab.as_str()));
    assert_eq!(response.current_url.as_deref(), Some("https://popup.test"));
    assert_eq!(response.new_tab_url.as_deref(), Some("https://popup.test"));

    assert_eq!(coordinator.active_target().as_deref(), Some(new_tab.as_str()));
    assert_eq!(host.attached().as_deref(), Some(new_tab.as_str()));
    assert_eq!(host.count_calls(&format!("capture:{new_tab}")), 1);
    assert_eq!(host.count_calls(&format!("capture:{original}")), 0);
    assert_eq!(coordinator.tabs().len(), 2);
}

#[tokio::test]
async fn test_background_target_is_brought_forward() {
    let (host, coordinator) = setup(None);
    let original = host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenBackground {
        url: "https://behind.test".into(),
    });

    let response = coordinator.execute(&click(5, 5), None).await;

    assert_eq!(response.new_tab_opened, Some(true));
    let new_tab = response.new_tab_id.clone().unwrap();
    assert_ne!(new_tab, original);
    assert_eq!(host.count_calls(&format!("activate:{new_tab}")), 1);
    assert_eq!(coordinator.active_target().as_deref(), Some(new_tab.as_str()));
}

#[tokio::test]
async fn test_activated_target_is_not_reactivated() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenTarget {
        url: "https://front.test".into(),
        with_opener: true,
    });

    let response = coordinator.execute(&click(5, 5), None).await;

    assert_eq!(response.new_tab_opened, Some(true));
    assert_eq!(host.count_calls("activate:"), 0);
}

#[tokio::test]
async fn test_new_target_without_opener_is_attributed() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenTarget {
        url: "https://noopener.test".into(),
        with_opener: false,
    });

    let response = coordinator.execute(&click(1, 1), None).await;

    assert_eq!(response.new_tab_opened, Some(true));
    assert_eq!(response.current_url.as_deref(), Some("https://noopener.test"));
}

#[tokio::test]
async fn test_foreign_target_is_ignored() {
    let (host, coordinator) = setup(None);
    let original = host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenForeign {
        url: "https://other.test".into(),
        opener_id: Some("someone-else".into()),
    });

    let response = coordinator.execute(&click(1, 1), None).await;

    assert_eq!(response.new_tab_opened, None);
    assert_eq!(response.tab_id.as_deref(), Some(original.as_str()));
    assert_eq!(coordinator.active_target().as_deref(), Some(original.as_str()));
    assert_eq!(coordinator.tabs().len(), 1);
}

#[tokio::test]
async fn test_system_target_never_becomes_active() {
    let (host, coordinator) = setup(None);
    let original = host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenForeign {
        url: "devtools://devtools/bundled/inspector.html".into(),
        opener_id: None,
    });

    let response = coordinator.execute(&click(1, 1), None).await;

    assert_eq!(response.new_tab_opened, None);
    assert_eq!(coordinator.active_target().as_deref(), Some(original.as_str()));
}

#[tokio::test]
async fn test_click_navigating_in_place() {
    let (host, coordinator) = setup(None);
    let original = host.add_page("https://start.test");
    host.queue_effect(InputEffect::Navigate("https://start.test/next".into()));

    let response = coordinator.execute(&click(5, 5), None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.navigation_occurred, Some(true));
    assert_eq!(response.new_tab_opened, None);
    assert_eq!(response.tab_id.as_deref(), Some(original.as_str()));
    assert_eq!(response.current_url.as_deref(), Some("https://start.test/next"));
}

#[tokio::test]
async fn test_plain_click_resolves_after_fast_timer() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");

    let started = Instant::now();
    let response = coordinator.execute(&click(5, 5), None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.navigation_occurred, Some(false));
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert!(response.screenshot.is_some());
}

#[tokio::test]
async fn test_invalid_coordinate_fails_before_host_calls() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");

    let response = coordinator
        .handle_envelope(&envelope("click", json!({"coordinate": "abc"})))
        .await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.error_kind, Some(ErrorKind::InvalidParameter));
    assert_eq!(response.request_id, Some(1));
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_command() {
    let (host, coordinator) = setup(None);

    let response = coordinator.handle_envelope(&envelope("teleport", json!({}))).await;

    assert_eq!(response.error_kind, Some(ErrorKind::UnknownCommand));
    assert_eq!(response.command, "teleport");
    assert!(host.calls().is_empty());
}

// ---- instrumentation ----

#[tokio::test]
async fn test_attach_failure_skips_capture() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");
    host.fail_next_attaches(3);

    let response = coordinator.execute(&Command::TakeScreenshot, None).await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.error_kind, Some(ErrorKind::AttachFailed));
    assert!(response.screenshot.is_none());
    assert_eq!(host.count_calls("attach:"), 3);
    assert_eq!(host.count_calls("capture:"), 0);
    assert!(!coordinator.target_state(&page).unwrap().is_busy());
}

#[tokio::test]
async fn test_attach_retry_recovers() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");
    host.fail_next_attaches(2);

    let response = coordinator.execute(&Command::TakeScreenshot, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.screenshot.is_some());
    assert_eq!(host.count_calls("attach:"), 3);
}

#[tokio::test]
async fn test_input_waits_for_instrumentation() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");
    host.fail_next_attaches(3);

    let response = coordinator.execute(&click(10, 10), None).await;

    assert_eq!(response.error_kind, Some(ErrorKind::AttachFailed));
    assert_eq!(host.count_calls("attach:"), 3);
    assert_eq!(host.count_calls("dispatch:"), 0);
    assert!(!coordinator.target_state(&page).unwrap().is_busy());

    let response = coordinator
        .execute(&Command::Type { text: "hi".into() }, None)
        .await;
    assert_eq!(response.status, ResponseStatus::Ack);
    let calls = host.calls();
    let attach = calls.iter().position(|c| c == &format!("attach:{page}")).unwrap();
    let dispatch = calls.iter().position(|c| c.starts_with("dispatch:")).unwrap();
    assert!(attach < dispatch);
    // The completion stage reuses the session taken for the input.
    assert_eq!(host.count_calls("attach:"), 4);
}

#[tokio::test]
async fn test_viewport_reapplied_on_fresh_attach() {
    let (host, coordinator) = setup(Some(Viewport::new(800, 600)));
    let page = host.add_page("https://start.test");

    coordinator.execute(&Command::TakeScreenshot, None).await;
    assert_eq!(host.count_calls(&format!("set_viewport:{page}")), 1);

    // Cached session still verified: no reapply.
    coordinator.execute(&Command::TakeScreenshot, None).await;
    assert_eq!(host.count_calls(&format!("set_viewport:{page}")), 1);

    host.drop_session();
    let response = coordinator.execute(&Command::TakeScreenshot, None).await;
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(host.count_calls(&format!("set_viewport:{page}")), 2);
    assert_eq!(host.viewport_override(), Some((page, Viewport::new(800, 600))));
}

#[tokio::test]
async fn test_unstable_page_still_captured() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");
    host.queue_samples(&page, 1..1000);

    let response = coordinator.execute(&Command::TakeScreenshot, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.screenshot.is_some());
}

// ---- simple operations ----

#[tokio::test]
async fn test_type_is_acknowledged() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");

    let response = coordinator
        .execute(&Command::Type { text: "hello".into() }, None)
        .await;

    assert_eq!(response.status, ResponseStatus::Ack);
    assert_eq!(host.count_calls(&format!("dispatch:{page}:insert_text")), 1);
    assert!(response.screenshot.is_some());
}

#[tokio::test]
async fn test_key_combinations() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");

    let select_all: KeyCombination = "Control+A".parse().unwrap();
    let response = coordinator
        .execute(
            &Command::PressKeyCombination {
                combination: select_all,
            },
            None,
        )
        .await;
    assert_eq!(response.status, ResponseStatus::Ack);

    let submit: KeyCombination = "Control+Enter".parse().unwrap();
    let response = coordinator
        .execute(&Command::PressKeyCombination { combination: submit }, None)
        .await;
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.navigation_occurred, Some(false));
    assert_eq!(host.count_calls("dispatch:"), 2);
}

#[tokio::test]
async fn test_press_key_may_open_target() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");
    host.queue_effect(InputEffect::OpenTarget {
        url: "https://search.test".into(),
        with_opener: true,
    });

    let response = coordinator
        .execute(&Command::PressKey { key: "Enter".into() }, None)
        .await;

    assert_eq!(response.new_tab_opened, Some(true));
}

#[tokio::test]
async fn test_scroll() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");

    let response = coordinator
        .execute(
            &Command::Scroll {
                direction: ScrollDirection::Down,
                selector: None,
            },
            None,
        )
        .await;

    assert_eq!(response.status, ResponseStatus::Ack);
    assert_eq!(host.count_calls(&format!("dispatch:{page}:scroll")), 1);
}

#[tokio::test]
async fn test_wait_is_clamped() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");

    let started = Instant::now();
    let response = coordinator.execute(&Command::Wait { seconds: 30.0 }, None).await;

    assert_eq!(response.status, ResponseStatus::Ack);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_wait_without_any_target() {
    let (host, coordinator) = setup(None);

    let response = coordinator.execute(&Command::Wait { seconds: 0.05 }, None).await;

    assert_eq!(response.status, ResponseStatus::Ack);
    assert!(response.screenshot.is_none());
    assert_eq!(host.count_calls("create_target:"), 0);
}

// ---- capture ----

#[tokio::test]
async fn test_area_screenshot() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://start.test");

    let response = coordinator
        .execute(
            &Command::TakeAreaScreenshot {
                top_left: Coordinate::new(0, 0),
                bottom_right: Coordinate::new(100, 50),
            },
            None,
        )
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(host.count_calls(&format!("capture:{page}:clip")), 1);
}

#[tokio::test]
async fn test_full_html() {
    let (host, coordinator) = setup(None);
    host.add_page("https://start.test");

    let response = coordinator.execute(&Command::GetFullHtml, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.html_content.unwrap().contains("https://start.test"));
    assert!(response.screenshot.is_none());
    assert_eq!(host.count_calls("capture:"), 0);
}

#[tokio::test]
async fn test_screenshot_without_any_page_fails() {
    let (_host, coordinator) = setup(None);

    let response = coordinator.execute(&Command::TakeScreenshot, None).await;

    assert_eq!(response.error_kind, Some(ErrorKind::CommandFailed));
}

#[tokio::test]
async fn test_vanished_active_target_is_replaced() {
    let (host, coordinator) = setup(None);
    let first = host.add_page("https://one.test");
    let second = host.add_page("https://two.test");

    coordinator.execute(&Command::TakeScreenshot, None).await;
    assert_eq!(coordinator.active_target().as_deref(), Some(first.as_str()));

    host.close_externally(&first);
    let response = coordinator.execute(&Command::TakeScreenshot, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.tab_id.as_deref(), Some(second.as_str()));
}

// ---- tabs ----

#[tokio::test]
async fn test_list_tabs() {
    let (host, coordinator) = setup(None);
    host.add_page("https://one.test");
    host.add_system_page();

    let response = coordinator.execute(&Command::ListTabs, None).await;

    let tabs = response.tabs.unwrap();
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].index, 0);
    assert_eq!(tabs[0].url, "https://one.test");
    assert!(tabs[0].active);
    assert!(response.screenshot.is_none());
}

#[tokio::test]
async fn test_new_tab() {
    let (host, coordinator) = setup(None);
    let first = host.add_page("https://one.test");
    coordinator.execute(&Command::TakeScreenshot, None).await;

    let response = coordinator
        .execute(
            &Command::NewTab {
                url: Some("https://two.test".into()),
            },
            None,
        )
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.new_tab_opened, Some(true));
    assert_eq!(response.navigation_occurred, Some(true));
    let new_tab = response.new_tab_id.unwrap();
    assert_ne!(new_tab, first);
    assert_eq!(response.current_url.as_deref(), Some("https://two.test"));
    assert_eq!(coordinator.active_target().as_deref(), Some(new_tab.as_str()));
    assert_eq!(host.attached().as_deref(), Some(new_tab.as_str()));
    assert_eq!(host.handoff_violations(), 0);

    let tabs = coordinator.tabs();
    assert_eq!(tabs.len(), 2);
    assert!(tabs[1].active);
}

#[tokio::test]
async fn test_new_tab_rejects_bad_url() {
    let (host, coordinator) = setup(None);

    let response = coordinator
        .execute(
            &Command::NewTab {
                url: Some("::nope".into()),
            },
            None,
        )
        .await;

    assert_eq!(response.error_kind, Some(ErrorKind::InvalidParameter));
    assert_eq!(host.count_calls("create_target:"), 0);
}

#[tokio::test]
async fn test_select_tab_hands_session_over() {
    let (host, coordinator) = setup(None);
    let first = host.add_page("https://one.test");
    coordinator.execute(&Command::TakeScreenshot, None).await;
    coordinator.execute(&Command::NewTab { url: None }, None).await;

    let response = coordinator.execute(&Command::SelectTab { index: 0 }, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.tab_id.as_deref(), Some(first.as_str()));
    assert_eq!(coordinator.active_target().as_deref(), Some(first.as_str()));
    assert_eq!(host.attached().as_deref(), Some(first.as_str()));
    assert_eq!(host.handoff_violations(), 0);
}

#[tokio::test]
async fn test_select_tab_out_of_range() {
    let (host, coordinator) = setup(None);
    host.add_page("https://one.test");
    coordinator.execute(&Command::ListTabs, None).await;

    let response = coordinator.execute(&Command::SelectTab { index: 4 }, None).await;

    assert_eq!(response.error_kind, Some(ErrorKind::InvalidParameter));
}

#[tokio::test]
async fn test_close_active_tab_moves_to_neighbour() {
    let (host, coordinator) = setup(None);
    let first = host.add_page("https://one.test");
    coordinator.execute(&Command::TakeScreenshot, None).await;
    let opened = coordinator.execute(&Command::NewTab { url: None }, None).await;
    let second = opened.new_tab_id.unwrap();

    let response = coordinator.execute(&Command::CloseTab { index: None }, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.message.as_deref(), Some("closed tab 1"));
    assert_eq!(response.tab_id.as_deref(), Some(first.as_str()));
    assert!(!host.target_ids().contains(&second));
    assert_eq!(coordinator.active_target().as_deref(), Some(first.as_str()));
    assert_eq!(coordinator.tabs().len(), 1);
}

#[tokio::test]
async fn test_close_last_tab() {
    let (host, coordinator) = setup(None);
    host.add_page("https://one.test");
    coordinator.execute(&Command::ListTabs, None).await;

    let response = coordinator.execute(&Command::CloseTab { index: Some(0) }, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.tab_id.is_none());
    assert!(coordinator.active_target().is_none());
    assert!(host.target_ids().is_empty());
}

// ---- viewport ----

#[tokio::test]
async fn test_set_viewport_applies_to_active_target() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://one.test");
    coordinator.execute(&Command::ListTabs, None).await;

    let viewport = Viewport::new(1024, 768);
    let response = coordinator
        .execute(&Command::SetViewportConfig { viewport }, None)
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.viewport, Some(viewport));
    assert_eq!(coordinator.viewport(), Some(viewport));
    assert_eq!(host.viewport_override(), Some((page, viewport)));
}

#[tokio::test]
async fn test_set_viewport_without_target_is_stored() {
    let (host, coordinator) = setup(None);

    let viewport = Viewport::new(640, 480);
    let response = coordinator
        .execute(&Command::SetViewportConfig { viewport }, None)
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(coordinator.viewport(), Some(viewport));
    assert!(host.viewport_override().is_none());
}

// ---- busy state and lifecycle ----

#[tokio::test]
async fn test_stuck_target_is_reclaimed() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://one.test");
    coordinator.execute(&Command::ListTabs, None).await;
    coordinator.set_state(&page, TargetProcessingState::Stabilizing);

    let started = Instant::now();
    let response = coordinator.execute(&Command::TakeScreenshot, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(coordinator.target_state(&page), Some(TargetProcessingState::Completed));
}

#[tokio::test]
async fn test_concurrent_commands_never_share_the_session() {
    let (host, coordinator) = setup(None);
    host.add_page("https://one.test");
    coordinator.execute(&Command::ListTabs, None).await;
    coordinator.execute(&Command::NewTab { url: None }, None).await;

    let mut tasks = Vec::new();
    for i in 0..6 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator
                .execute(&Command::SelectTab { index: i % 2 }, Some(i as u64))
                .await
        }));
    }
    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status, ResponseStatus::Success);
    }

    assert_eq!(host.handoff_violations(), 0);
    assert!(host.attached().is_some());
}

#[tokio::test]
async fn test_disconnect_releases_session_and_busy_states() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://one.test");
    coordinator.execute(&Command::TakeScreenshot, None).await;
    coordinator.set_state(&page, TargetProcessingState::Capturing);

    coordinator.on_disconnect().await;

    assert!(host.attached().is_none());
    assert!(coordinator.attached_target().is_none());
    assert!(!coordinator.target_state(&page).unwrap().is_busy());
}

#[tokio::test]
async fn test_close_forgets_tabs_without_closing_them() {
    let (host, coordinator) = setup(None);
    let page = host.add_page("https://one.test");
    coordinator.execute(&Command::TakeScreenshot, None).await;

    let response = coordinator.execute(&Command::Close, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.message.unwrap().contains("1 tab(s) forgotten"));
    assert!(host.attached().is_none());
    assert!(coordinator.tabs().is_empty());
    assert_eq!(host.target_ids(), vec![page]);
}

#[tokio::test]
async fn test_externally_closed_tab_is_untracked() {
    let (host, coordinator) = setup(None);
    host.add_page("https://one.test");
    coordinator.execute(&Command::ListTabs, None).await;
    let opened = coordinator.execute(&Command::NewTab { url: None }, None).await;
    let second = opened.new_tab_id.unwrap();

    host.close_externally(&second);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(coordinator.tabs().len(), 1);
    assert_ne!(coordinator.active_target(), Some(second));
}
