//! Integration tests for the eoka-backed browser session.
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eoka_pilot::browser::capture_state;
use eoka_pilot::{
    Agent, AgentSettings, BrowserConfig, BrowserSession, ElementIndexer, EokaBrowser,
    LanguageModel, LlmError, Message, RunStatus,
};

/// Check if Chrome is available
fn chrome_available() -> bool {
    eoka::stealth::patcher::find_chrome().is_ok()
}

fn config() -> BrowserConfig {
    BrowserConfig {
        headless: true,
        min_page_wait_ms: 100,
        ..Default::default()
    }
}

const FORM_PAGE: &str = r#"data:text/html,
    <p id="out">waiting</p>
    <input type="text" placeholder="Enter name" oninput="document.getElementById('out').textContent = this.value">
    <button onclick="document.getElementById('out').textContent = 'Clicked!'">Click Me</button>
    <a href="https://example.com">Link</a>
    <button disabled>Off</button>
"#;

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_capture_indexes_interactive_elements() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let mut browser = EokaBrowser::launch(&config())
        .await
        .expect("Failed to launch browser");
    browser.navigate(FORM_PAGE).await.expect("Failed to navigate");

    let indexer = ElementIndexer::default();
    let state = capture_state(&mut browser, &indexer, Duration::from_secs(5), true)
        .await
        .expect("Failed to capture state");

    // input, button, link; the disabled button is skipped
    assert_eq!(state.selector_map.len(), 3, "tree:\n{}", state.element_tree);
    assert!(state.element_tree.contains("_[:]"), "tree:\n{}", state.element_tree);
    assert!(state.element_tree.contains("placeholder=\"Enter name\""));
    assert!(state.element_tree.contains("Click Me"));
    assert_eq!(state.selector_map.locator(1), Some("/html/body/button[1]"));

    let png = state.screenshot.expect("Missing screenshot");
    assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]); // PNG signature

    // Unchanged page, same map
    let again = capture_state(&mut browser, &indexer, Duration::from_secs(5), false)
        .await
        .expect("Failed to capture state");
    assert_eq!(again.selector_map, state.selector_map);

    browser.close(true).await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_type_and_click_by_locator() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let mut browser = EokaBrowser::launch(&config())
        .await
        .expect("Failed to launch browser");
    browser.navigate(FORM_PAGE).await.expect("Failed to navigate");

    browser
        .resolve_and_type("/html/body/input[1]", "Hello World")
        .await
        .expect("Failed to type");
    let text = browser.page_text().await.expect("Failed to read text");
    assert!(text.contains("Hello World"), "text: {}", text);

    browser
        .resolve_and_click("/html/body/button[1]")
        .await
        .expect("Failed to click");
    let text = browser.page_text().await.expect("Failed to read text");
    assert!(text.contains("Clicked!"), "text: {}", text);

    let err = browser
        .resolve_and_click("/html/body/button[9]")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("element not found"));

    // The marker attribute never leaks into the page
    let html = browser.page_html().await.expect("Failed to read html");
    assert!(!html.contains("data-pilot-target"));

    browser.close(true).await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_tabs() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let mut browser = EokaBrowser::launch(&config())
        .await
        .expect("Failed to launch browser");

    let tab = browser
        .open_tab(Some("data:text/html,<title>Second</title><p>two</p>"))
        .await
        .expect("Failed to open tab");
    assert_eq!(tab.index, 1);

    let tabs = browser.list_tabs().await.expect("Failed to list tabs");
    assert_eq!(tabs.len(), 2);
    assert_eq!(browser.title().await.unwrap(), "Second");

    browser.switch_tab(&tabs[0].id).await.expect("Failed to switch");
    assert_ne!(browser.title().await.unwrap(), "Second");

    assert!(browser.switch_tab("no-such-tab").await.is_err());

    browser.close(true).await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_scroll_and_viewport() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let mut browser = EokaBrowser::launch(&config())
        .await
        .expect("Failed to launch browser");
    browser
        .navigate(r#"data:text/html,<div style="height: 5000px">tall</div>"#)
        .await
        .expect("Failed to navigate");

    let size = browser
        .capture_viewport_size()
        .await
        .expect("Failed to read viewport");
    assert!(size.width > 0 && size.height > 0);

    browser.scroll_by(Some(400)).await.expect("Failed to scroll");
    browser.scroll_by(None).await.expect("Failed to page down");
    browser.page_up().await.expect("Failed to page up");
    browser.go_back().await.expect("Failed to go back");

    browser.close(true).await.expect("Failed to close browser");
}

/// Clicks the first button, then reports what the page says.
struct TwoStepModel {
    turn: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl LanguageModel for TwoStepModel {
    async fn complete(&self, messages: &[Message], _json: bool) -> Result<String, LlmError> {
        let turn = self.turn.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let state = r#""current_state": {"valuation_previous_goal": "Unknown", "memory": "", "next_goal": ""}"#;
        let reply = if turn == 0 {
            format!(r#"{{{}, "action": {{"click_element": {{"index": 1}}}}}}"#, state)
        } else {
            let page = messages.last().map(|m| m.text_content()).unwrap_or_default();
            let seen = page.contains("Clicked!");
            format!(r#"{{{}, "action": {{"done": {{"text": "{}"}}}}}}"#, state, seen)
        };
        Ok(reply)
    }
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_agent_run_against_chrome() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let mut session = EokaBrowser::launch(&config())
        .await
        .expect("Failed to launch browser");
    session.navigate(FORM_PAGE).await.expect("Failed to navigate");
    let browser = session.shared();

    let llm: Arc<dyn LanguageModel> = Arc::new(TwoStepModel {
        turn: Default::default(),
    });
    let mut agent = Agent::builder("press the button", llm)
        .browser(browser.clone())
        .settings(AgentSettings {
            use_vision: false,
            ..Default::default()
        })
        .build()
        .expect("Failed to build agent");

    let run = agent.run().await;
    assert_eq!(
        run.status,
        RunStatus::Completed {
            result: "true".into()
        }
    );
    assert_eq!(run.history.action_names(), vec!["click_element", "done"]);

    browser
        .lock()
        .await
        .close(true)
        .await
        .expect("Failed to close browser");
}
