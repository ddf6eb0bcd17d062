//! In-memory browser for unit tests.

use async_trait::async_trait;

use crate::browser::{BrowserError, BrowserSession, TabInfo, ViewportSize};
use crate::dom::{DomNode, ElementNode, SelectorMap};

pub(crate) struct MockBrowser {
    /// Every call that touches the page, in order.
    pub calls: Vec<String>,
    tabs: Vec<TabInfo>,
    active: usize,
    markup: String,
    open_tab_on_click: bool,
    clicks_left: Option<usize>,
    load_times_out: bool,
    close_fails: bool,
    next_id: usize,
}

impl MockBrowser {
    pub fn new() -> Self {
        let page: DomNode = ElementNode::new("body")
            .child(ElementNode::new("a").attr("href", "/next").with_text("Next"))
            .into();
        Self {
            calls: Vec::new(),
            tabs: vec![TabInfo {
                index: 0,
                id: "tab-0".into(),
                url: "https://example.com/".into(),
                title: "Example".into(),
            }],
            active: 0,
            markup: page.to_markup().unwrap(),
            open_tab_on_click: false,
            clicks_left: None,
            load_times_out: false,
            close_fails: false,
            next_id: 1,
        }
    }

    /// Clicking anything opens a background tab, like a `target="_blank"` link.
    pub fn opening_tab_on_click(mut self) -> Self {
        self.open_tab_on_click = true;
        self
    }

    /// Only the first `n` clicks find their element.
    pub fn failing_clicks_after(mut self, n: usize) -> Self {
        self.clicks_left = Some(n);
        self
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = markup.into();
        self
    }

    /// `close` records the call, then errors.
    pub fn failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    pub fn slow_to_load(mut self) -> Self {
        self.load_times_out = true;
        self
    }

    pub fn clicks(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| c.strip_prefix("click "))
            .collect()
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    pub fn active_tab(&self) -> usize {
        self.active
    }

    pub fn active_url(&self) -> &str {
        &self.tabs[self.active].url
    }

    fn push_tab(&mut self, url: &str) -> TabInfo {
        let tab = TabInfo {
            index: self.tabs.len(),
            id: format!("tab-{}", self.next_id),
            url: url.to_string(),
            title: String::new(),
        };
        self.next_id += 1;
        self.tabs.push(tab.clone());
        tab
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.calls.push(format!("navigate {}", url));
        self.tabs[self.active].url = url.to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.tabs[self.active].url.clone())
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self.tabs[self.active].title.clone())
    }

    async fn list_tabs(&mut self) -> Result<Vec<TabInfo>, BrowserError> {
        Ok(self.tabs.clone())
    }

    async fn switch_tab(&mut self, id: &str) -> Result<(), BrowserError> {
        self.calls.push(format!("switch_tab {}", id));
        self.active = self
            .tabs
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| BrowserError::TabNotFound(id.to_string()))?;
        Ok(())
    }

    async fn open_tab(&mut self, url: Option<&str>) -> Result<TabInfo, BrowserError> {
        self.calls
            .push(format!("open_tab {}", url.unwrap_or("about:blank")));
        let tab = self.push_tab(url.unwrap_or("about:blank"));
        self.active = tab.index;
        Ok(tab)
    }

    async fn wait_for_load(&mut self, timeout_ms: u64) -> Result<(), BrowserError> {
        if self.load_times_out {
            return Err(BrowserError::Timeout(format!("{}ms", timeout_ms)));
        }
        Ok(())
    }

    async fn capture_markup(&mut self) -> Result<String, BrowserError> {
        Ok(self.markup.clone())
    }

    async fn capture_viewport_size(&mut self) -> Result<ViewportSize, BrowserError> {
        Ok(ViewportSize {
            width: 1280,
            height: 1024,
        })
    }

    async fn screenshot(
        &mut self,
        _highlight: Option<&SelectorMap>,
    ) -> Result<Vec<u8>, BrowserError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn resolve_and_click(&mut self, locator: &str) -> Result<(), BrowserError> {
        if let Some(left) = self.clicks_left.as_mut() {
            if *left == 0 {
                return Err(BrowserError::ElementNotFound(locator.to_string()));
            }
            *left -= 1;
        }
        self.calls.push(format!("click {}", locator));
        if self.open_tab_on_click {
            self.push_tab("https://example.com/popup");
        }
        Ok(())
    }

    async fn resolve_and_type(&mut self, locator: &str, text: &str) -> Result<(), BrowserError> {
        self.calls.push(format!("type {} {}", locator, text));
        Ok(())
    }

    async fn go_back(&mut self) -> Result<(), BrowserError> {
        self.calls.push("go_back".into());
        Ok(())
    }

    async fn scroll_by(&mut self, amount: Option<i64>) -> Result<(), BrowserError> {
        self.calls.push(match amount {
            Some(px) => format!("scroll {}", px),
            None => "page_down".into(),
        });
        Ok(())
    }

    async fn page_up(&mut self) -> Result<(), BrowserError> {
        self.calls.push("page_up".into());
        Ok(())
    }

    async fn page_text(&mut self) -> Result<String, BrowserError> {
        Ok("Example Domain".into())
    }

    async fn page_html(&mut self) -> Result<String, BrowserError> {
        Ok("<html><body><h1>Example Domain</h1></body></html>".into())
    }

    async fn close(&mut self, force: bool) -> Result<(), BrowserError> {
        self.calls.push(format!("close force={}", force));
        if self.close_fails {
            return Err(BrowserError::Script("target crashed".into()));
        }
        Ok(())
    }
}
