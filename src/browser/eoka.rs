//! [`BrowserSession`] over an eoka browser.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eoka::{Browser, Page, StealthConfig};
use tracing::{debug, info, warn};

use super::capture::{
    highlight_js, mark_target_js, target_selector, unmark_target_js, CAPTURE_JS,
    REMOVE_HIGHLIGHT_JS,
};
use super::{shared, BrowserError, BrowserSession, SharedBrowser, TabInfo, ViewportSize};
use crate::config::{BrowserConfig, Viewport};
use crate::dom::SelectorMap;

/// Idle window for network settling.
const NETWORK_IDLE_MS: u64 = 500;

enum Interaction<'a> {
    Click,
    Fill(&'a str),
}

/// Multi-tab session on a stealth Chrome.
///
/// Pages opened by the session are tracked by target id in open order.
/// Tabs the page opens by itself (`target="_blank"`, `window.open`) show up
/// in [`list_tabs`](BrowserSession::list_tabs) and are adopted on first
/// switch.
pub struct EokaBrowser {
    browser: Option<Browser>,
    pages: HashMap<String, Page>,
    order: Vec<String>,
    active: Option<String>,
    viewport: Viewport,
    keep_open: bool,
    min_wait_ms: u64,
}

impl EokaBrowser {
    /// Launch Chrome with `config` and open a blank tab.
    pub async fn launch(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let stealth = StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.width,
            viewport_height: config.viewport.height,
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_blank_page().await?;
        let id = page.target_id().to_string();

        let mut pages = HashMap::new();
        pages.insert(id.clone(), page);

        Ok(Self {
            browser: Some(browser),
            pages,
            order: vec![id.clone()],
            active: Some(id),
            viewport: config.viewport,
            keep_open: config.keep_open,
            min_wait_ms: config.min_page_wait_ms,
        })
    }

    /// Wrap for sharing between agents.
    pub fn shared(self) -> SharedBrowser {
        shared(self)
    }

    fn browser(&self) -> Result<&Browser, BrowserError> {
        self.browser.as_ref().ok_or(BrowserError::Closed)
    }

    fn page(&self) -> Result<&Page, BrowserError> {
        self.browser()?;
        self.active
            .as_ref()
            .and_then(|id| self.pages.get(id))
            .ok_or(BrowserError::Closed)
    }

    fn track(&mut self, page: Page) -> String {
        let id = page.target_id().to_string();
        self.pages.insert(id.clone(), page);
        if !self.order.contains(&id) {
            self.order.push(id.clone());
        }
        id
    }

    /// Mark the node at `locator`, interact with it by CSS, clear the mark.
    async fn interact(
        &self,
        locator: &str,
        interaction: Interaction<'_>,
    ) -> Result<(), BrowserError> {
        let page = self.page()?;
        let found: bool = page.evaluate(&mark_target_js(locator)).await?;
        if !found {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }

        let selector = target_selector();
        let result = match interaction {
            Interaction::Click => page.click(&selector).await,
            Interaction::Fill(text) => page.fill(&selector, text).await,
        };
        // The interaction may have navigated away; a failed cleanup is harmless.
        let _ = page.execute(&unmark_target_js()).await;
        Ok(result?)
    }

    /// Replace a tab the page opened on its own with one we control.
    async fn adopt(&mut self, id: &str) -> Result<String, BrowserError> {
        let browser = self.browser()?;
        let live = browser.tabs().await?;
        let tab = live
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| BrowserError::TabNotFound(id.to_string()))?;

        let page = browser.new_page(&tab.url).await?;
        if let Err(e) = browser.close_tab(id).await {
            warn!("Could not close adopted tab {}: {}", id, e);
        }
        let new_id = page.target_id().to_string();
        self.pages.insert(new_id.clone(), page);
        match self.order.iter().position(|t| t == id) {
            Some(pos) => self.order[pos] = new_id.clone(),
            None => self.order.push(new_id.clone()),
        }
        debug!("Adopted tab {} as {}", id, new_id);
        Ok(new_id)
    }
}

#[async_trait]
impl BrowserSession for EokaBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page()?.goto(url).await?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.page()?.url().await?)
    }

    async fn title(&mut self) -> Result<String, BrowserError> {
        Ok(self.page()?.title().await?)
    }

    async fn list_tabs(&mut self) -> Result<Vec<TabInfo>, BrowserError> {
        let live = self.browser()?.tabs().await?;

        self.order.retain(|id| live.iter().any(|t| &t.id == id));
        self.pages.retain(|id, _| live.iter().any(|t| &t.id == id));
        for tab in &live {
            if !self.order.contains(&tab.id) {
                self.order.push(tab.id.clone());
            }
        }
        if self
            .active
            .as_ref()
            .is_some_and(|id| !self.pages.contains_key(id))
        {
            self.active = self
                .order
                .iter()
                .rev()
                .find(|id| self.pages.contains_key(*id))
                .cloned();
        }

        Ok(self
            .order
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                live.iter().find(|t| &t.id == id).map(|t| TabInfo {
                    index,
                    id: t.id.clone(),
                    url: t.url.clone(),
                    title: t.title.clone(),
                })
            })
            .collect())
    }

    async fn switch_tab(&mut self, id: &str) -> Result<(), BrowserError> {
        let id = if self.pages.contains_key(id) {
            id.to_string()
        } else {
            self.adopt(id).await?
        };
        self.browser()?.activate_tab(&id).await?;
        self.active = Some(id);
        Ok(())
    }

    async fn open_tab(&mut self, url: Option<&str>) -> Result<TabInfo, BrowserError> {
        let browser = self.browser()?;
        let page = match url {
            Some(u) => browser.new_page(u).await?,
            None => browser.new_blank_page().await?,
        };
        let url = page.url().await.unwrap_or_default();
        let title = page.title().await.unwrap_or_default();
        let id = self.track(page);
        self.browser()?.activate_tab(&id).await?;
        self.active = Some(id.clone());

        let index = self.order.iter().position(|t| t == &id).unwrap_or(0);
        info!("Opened tab {} ({})", index, url);
        Ok(TabInfo {
            index,
            id,
            url,
            title,
        })
    }

    async fn wait_for_load(&mut self, timeout_ms: u64) -> Result<(), BrowserError> {
        let page = self.page()?;
        let started = std::time::Instant::now();
        let idle = page.wait_for_network_idle(NETWORK_IDLE_MS, timeout_ms).await;

        let elapsed = started.elapsed().as_millis() as u64;
        if elapsed < self.min_wait_ms {
            page.wait(self.min_wait_ms - elapsed).await;
        }
        idle.map_err(|e| BrowserError::Timeout(format!("network idle after {}ms: {}", timeout_ms, e)))
    }

    async fn capture_markup(&mut self) -> Result<String, BrowserError> {
        let json: String = self.page()?.evaluate(CAPTURE_JS).await?;
        Ok(json)
    }

    async fn capture_viewport_size(&mut self) -> Result<ViewportSize, BrowserError> {
        let size: Result<(u32, u32), _> = self
            .page()?
            .evaluate("[window.innerWidth, window.innerHeight]")
            .await;
        match size {
            Ok((width, height)) => Ok(ViewportSize { width, height }),
            Err(e) => {
                debug!("Viewport query failed ({}), using configured size", e);
                Ok(ViewportSize {
                    width: self.viewport.width,
                    height: self.viewport.height,
                })
            }
        }
    }

    async fn screenshot(
        &mut self,
        highlight: Option<&SelectorMap>,
    ) -> Result<Vec<u8>, BrowserError> {
        let page = self.page()?;
        let map = match highlight {
            Some(map) if !map.is_empty() => map,
            _ => return Ok(page.screenshot().await?),
        };

        page.execute(&highlight_js(map)).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let png = page.screenshot().await;
        let cleanup = page.execute(REMOVE_HIGHLIGHT_JS).await;
        keep_screenshot(png.map_err(Into::into), cleanup.map_err(Into::into))
    }

    async fn resolve_and_click(&mut self, locator: &str) -> Result<(), BrowserError> {
        self.interact(locator, Interaction::Click).await
    }

    async fn resolve_and_type(&mut self, locator: &str, text: &str) -> Result<(), BrowserError> {
        self.interact(locator, Interaction::Fill(text)).await
    }

    async fn go_back(&mut self) -> Result<(), BrowserError> {
        self.page()?.back().await?;
        Ok(())
    }

    async fn scroll_by(&mut self, amount: Option<i64>) -> Result<(), BrowserError> {
        let page = self.page()?;
        match amount {
            Some(px) => page.execute(&format!("window.scrollBy(0, {})", px)).await?,
            None => page.human().press_key("PageDown").await?,
        }
        Ok(())
    }

    async fn page_up(&mut self) -> Result<(), BrowserError> {
        self.page()?.human().press_key("PageUp").await?;
        Ok(())
    }

    async fn page_text(&mut self) -> Result<String, BrowserError> {
        Ok(self.page()?.text().await?)
    }

    async fn page_html(&mut self) -> Result<String, BrowserError> {
        let html: String = self
            .page()?
            .evaluate("document.documentElement.outerHTML")
            .await?;
        Ok(html)
    }

    async fn close(&mut self, force: bool) -> Result<(), BrowserError> {
        if self.keep_open && !force {
            info!("Keeping browser open");
            return Ok(());
        }
        self.pages.clear();
        self.order.clear();
        self.active = None;
        match self.browser.take() {
            Some(browser) => {
                browser.close().await?;
                info!("Browser closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// The screenshot wins over a failed overlay removal, which is only logged.
fn keep_screenshot(
    png: Result<Vec<u8>, BrowserError>,
    cleanup: Result<(), BrowserError>,
) -> Result<Vec<u8>, BrowserError> {
    if let Err(e) = cleanup {
        warn!("Failed to remove index overlay: {}", e);
    }
    png
}
