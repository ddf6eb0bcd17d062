//! Browser capability.
//!
//! The agent talks to the browser only through [`BrowserSession`]. The
//! eoka-backed implementation is [`EokaBrowser`]; tests plug in scripted
//! sessions.

mod capture;
mod eoka;
mod state;

pub use self::eoka::EokaBrowser;
pub use state::{capture_state, BrowserState, StateSummary};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::dom::SelectorMap;

/// Handle shared by chained agents. Locking it serializes every access to
/// the session, so a selector map is only resolved against the page that
/// produced it.
pub type SharedBrowser = Arc<Mutex<dyn BrowserSession>>;

/// Wrap a session for sharing.
pub fn shared(session: impl BrowserSession + 'static) -> SharedBrowser {
    Arc::new(Mutex::new(session))
}

/// Errors raised by a browser session.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error(transparent)]
    Eoka(#[from] ::eoka::Error),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("tab not found: {0}")]
    TabNotFound(String),

    #[error("browser session is closed")]
    Closed,

    #[error("script error: {0}")]
    Script(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// One open tab. `index` follows the order tabs were opened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub index: usize,
    pub id: String,
    pub url: String,
    pub title: String,
}

impl fmt::Display for TabInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.index, self.title, self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Everything the agent needs from a live browser.
///
/// Element locators are absolute XPaths from a [`SelectorMap`]; sessions
/// resolve them at call time, never ahead.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&mut self) -> Result<String, BrowserError>;

    async fn title(&mut self) -> Result<String, BrowserError>;

    /// Open tabs in open order. The active tab is included.
    async fn list_tabs(&mut self) -> Result<Vec<TabInfo>, BrowserError>;

    async fn switch_tab(&mut self, id: &str) -> Result<(), BrowserError>;

    /// Open a tab (blank when `url` is `None`) and make it active.
    async fn open_tab(&mut self, url: Option<&str>) -> Result<TabInfo, BrowserError>;

    /// Wait for the active page to settle. Errors with
    /// [`BrowserError::Timeout`] when it does not within `timeout_ms`.
    async fn wait_for_load(&mut self, timeout_ms: u64) -> Result<(), BrowserError>;

    /// Capture payload of the active page (see [`crate::dom::SnapshotNode`]).
    async fn capture_markup(&mut self) -> Result<String, BrowserError>;

    async fn capture_viewport_size(&mut self) -> Result<ViewportSize, BrowserError>;

    /// PNG of the viewport. With `highlight`, each indexed element is
    /// boxed and labelled with its index.
    async fn screenshot(&mut self, highlight: Option<&SelectorMap>)
        -> Result<Vec<u8>, BrowserError>;

    async fn resolve_and_click(&mut self, locator: &str) -> Result<(), BrowserError>;

    async fn resolve_and_type(&mut self, locator: &str, text: &str) -> Result<(), BrowserError>;

    async fn go_back(&mut self) -> Result<(), BrowserError>;

    /// Scroll vertically by `amount` pixels (negative is up), or one page
    /// down when `None`.
    async fn scroll_by(&mut self, amount: Option<i64>) -> Result<(), BrowserError>;

    /// Scroll one page up.
    async fn page_up(&mut self) -> Result<(), BrowserError>;

    async fn page_text(&mut self) -> Result<String, BrowserError>;

    async fn page_html(&mut self) -> Result<String, BrowserError>;

    /// Release the session. Without `force`, a session configured to stay
    /// open leaves the browser running.
    async fn close(&mut self, force: bool) -> Result<(), BrowserError>;
}
