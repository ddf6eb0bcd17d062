use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{BrowserError, BrowserSession, TabInfo};
use crate::dom::{ElementIndexer, SelectorMap};
use crate::error::StepError;

/// One observation of the browser. Built fresh every turn, never mutated.
#[derive(Debug, Clone, Default)]
pub struct BrowserState {
    pub url: String,
    pub title: String,
    pub tabs: Vec<TabInfo>,
    /// Rendered element tree shown to the model.
    pub element_tree: String,
    /// PNG, present on vision turns.
    pub screenshot: Option<Vec<u8>>,
    pub selector_map: SelectorMap,
}

impl BrowserState {
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            url: self.url.clone(),
            title: self.title.clone(),
            tabs: self.tabs.clone(),
            interactive_elements: self.selector_map.len(),
        }
    }
}

/// What the history keeps of a state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub url: String,
    pub title: String,
    pub tabs: Vec<TabInfo>,
    pub interactive_elements: usize,
}

/// Settle, capture and index the active page.
///
/// A settle timeout is logged and capture goes ahead on whatever has
/// loaded. A failed screenshot leaves `screenshot` empty. Only an
/// unreadable page fails the call.
pub async fn capture_state(
    session: &mut dyn BrowserSession,
    indexer: &ElementIndexer,
    settle_timeout: Duration,
    with_screenshot: bool,
) -> Result<BrowserState, StepError> {
    match session.wait_for_load(settle_timeout.as_millis() as u64).await {
        Ok(()) => {}
        Err(BrowserError::Timeout(msg)) => {
            debug!("Page did not settle ({}), capturing anyway", msg);
        }
        Err(e) => warn!("Waiting for page load failed: {}", e),
    }

    let markup = session
        .capture_markup()
        .await
        .map_err(|e| StepError::StateCapture(e.to_string()))?;
    let indexed = indexer.index(&markup)?;

    let url = session
        .current_url()
        .await
        .map_err(|e| StepError::StateCapture(e.to_string()))?;
    let title = session.title().await.unwrap_or_default();
    let tabs = session
        .list_tabs()
        .await
        .map_err(|e| StepError::StateCapture(e.to_string()))?;

    let screenshot = if with_screenshot {
        match session.screenshot(Some(&indexed.selector_map)).await {
            Ok(png) => Some(png),
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    debug!(
        "Captured {} ({} interactive elements, {} tabs)",
        url,
        indexed.selector_map.len(),
        tabs.len()
    );

    Ok(BrowserState {
        url,
        title,
        tabs,
        element_tree: indexed.render(),
        screenshot,
        selector_map: indexed.selector_map,
    })
}
