//! Built-in browser actions.

use std::num::NonZeroU32;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::browser::BrowserError;
use crate::error::StepError;
use crate::registry::{Action, ActionOutcome, ExecutionContext, NoParams, Registry};
use crate::Result;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchGoogle {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GoToUrl {
    pub url: String,
}

fn one_click() -> NonZeroU32 {
    NonZeroU32::MIN
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClickElement {
    pub index: usize,
    /// At least 1.
    #[serde(default = "one_click")]
    pub num_clicks: NonZeroU32,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InputText {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SwitchTab {
    /// Tab index from the tab list.
    pub page_id: usize,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct OpenTab {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExtractFormat {
    #[default]
    Text,
    Html,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractContent {
    #[serde(default)]
    pub value: ExtractFormat,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Done {
    /// Final answer for the user.
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Scroll {
    /// Pixels; omit to scroll one page.
    #[serde(default)]
    pub amount: Option<u32>,
}

/// Register the standard vocabulary, in prompt order.
pub fn register_default_actions(registry: &mut Registry) -> Result<()> {
    registry.register("search_google", "Search Google", true, SearchGoogleAction)?;
    registry.register("go_to_url", "Navigate to URL", true, GoToUrlAction)?;
    registry.register("go_back", "Go back", true, GoBackAction)?;
    registry.register("click_element", "Click element", true, ClickElementAction)?;
    registry.register("input_text", "Input text", true, InputTextAction)?;
    registry.register("switch_tab", "Switch tab", true, SwitchTabAction)?;
    registry.register("open_tab", "Open new tab", true, OpenTabAction)?;
    registry.register(
        "extract_content",
        "Extract page content as text or html",
        true,
        ExtractContentAction,
    )?;
    registry.register("done", "Complete task", false, DoneAction)?;
    registry.register(
        "scroll_down",
        "Scroll down the page by pixel amount - if no amount is specified, scroll down one page",
        true,
        ScrollDownAction,
    )?;
    registry.register(
        "scroll_up",
        "Scroll up the page by pixel amount - if no amount is specified, scroll up one page",
        true,
        ScrollUpAction,
    )?;
    Ok(())
}

/// Add a scheme to bare hosts like `example.com`.
fn normalize_url(raw: &str) -> std::result::Result<String, StepError> {
    let raw = raw.trim();
    match url::Url::parse(raw) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse(&format!("https://{}", raw))
            .map(|u| u.to_string())
            .map_err(|e| StepError::Execution(format!("invalid url '{}': {}", raw, e))),
        Err(e) => Err(StepError::Execution(format!("invalid url '{}': {}", raw, e))),
    }
}

struct SearchGoogleAction;

#[async_trait]
impl Action for SearchGoogleAction {
    type Params = SearchGoogle;

    async fn run(
        &self,
        params: SearchGoogle,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let query: String = url::form_urlencoded::byte_serialize(params.query.as_bytes()).collect();
        let mut session = ctx.session("search_google").await?;
        session
            .navigate(&format!("https://www.google.com/search?q={}", query))
            .await?;
        let msg = format!("🔍  Searched for \"{}\" in Google", params.query);
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct GoToUrlAction;

#[async_trait]
impl Action for GoToUrlAction {
    type Params = GoToUrl;

    async fn run(
        &self,
        params: GoToUrl,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let url = normalize_url(&params.url)?;
        let mut session = ctx.session("go_to_url").await?;
        session.navigate(&url).await?;
        let msg = format!("🔗  Navigated to {}", url);
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct GoBackAction;

#[async_trait]
impl Action for GoBackAction {
    type Params = NoParams;

    async fn run(
        &self,
        _params: NoParams,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        ctx.session("go_back").await?.go_back().await?;
        info!("🔙  Navigated back");
        Ok(ActionOutcome::content("🔙  Navigated back"))
    }
}

struct ClickElementAction;

#[async_trait]
impl Action for ClickElementAction {
    type Params = ClickElement;

    async fn run(
        &self,
        params: ClickElement,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let element = ctx.element(params.index)?;
        let mut session = ctx.session("click_element").await?;

        let total = params.num_clicks.get();
        let mut clicked = 0;
        for n in 1..=total {
            match session.resolve_and_click(&element.locator).await {
                Ok(()) => clicked = n,
                Err(e) if n == 1 => return Err(e.into()),
                Err(e) => {
                    warn!("Element no longer available after {} clicks: {}", n - 1, e);
                    break;
                }
            }
        }

        let mut msg = format!("🖱️  Clicked element {}: {}", params.index, element.locator);
        if total > 1 {
            msg.push_str(&format!(" ({}/{} clicks)", clicked, total));
        }
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct InputTextAction;

#[async_trait]
impl Action for InputTextAction {
    type Params = InputText;

    async fn run(
        &self,
        params: InputText,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let element = ctx.element(params.index)?;
        ctx.session("input_text")
            .await?
            .resolve_and_type(&element.locator, &params.text)
            .await?;
        let msg = format!(
            "⌨️  Input \"{}\" into {}: {}",
            params.text, params.index, element.locator
        );
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct SwitchTabAction;

#[async_trait]
impl Action for SwitchTabAction {
    type Params = SwitchTab;

    async fn run(
        &self,
        params: SwitchTab,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let mut session = ctx.session("switch_tab").await?;
        let tabs = session.list_tabs().await?;
        let tab = tabs
            .iter()
            .find(|t| t.index == params.page_id)
            .ok_or_else(|| BrowserError::TabNotFound(params.page_id.to_string()))?;
        session.switch_tab(&tab.id).await?;
        let msg = format!("🔄  Switched to tab {}", params.page_id);
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct OpenTabAction;

#[async_trait]
impl Action for OpenTabAction {
    type Params = OpenTab;

    async fn run(
        &self,
        params: OpenTab,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let url = normalize_url(&params.url)?;
        let tab = ctx.session("open_tab").await?.open_tab(Some(&url)).await?;
        let msg = format!("🔗  Opened new tab {} with {}", tab.index, url);
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct ExtractContentAction;

#[async_trait]
impl Action for ExtractContentAction {
    type Params = ExtractContent;

    async fn run(
        &self,
        params: ExtractContent,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let mut session = ctx.session("extract_content").await?;
        let content = match params.value {
            ExtractFormat::Text => session.page_text().await?,
            ExtractFormat::Html => session.page_html().await?,
        };
        info!("📄  Extracted page content ({} chars)", content.len());
        Ok(ActionOutcome::content(content))
    }
}

struct DoneAction;

#[async_trait]
impl Action for DoneAction {
    type Params = Done;

    async fn run(
        &self,
        params: Done,
        _ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        Ok(ActionOutcome::done(params.text))
    }
}

struct ScrollDownAction;

#[async_trait]
impl Action for ScrollDownAction {
    type Params = Scroll;

    async fn run(
        &self,
        params: Scroll,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let amount = params.amount.map(i64::from);
        ctx.session("scroll_down").await?.scroll_by(amount).await?;
        let msg = match amount {
            Some(px) => format!("🔍  Scrolled down the page by {} pixels", px),
            None => "🔍  Scrolled down the page by one page".to_string(),
        };
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}

struct ScrollUpAction;

#[async_trait]
impl Action for ScrollUpAction {
    type Params = Scroll;

    async fn run(
        &self,
        params: Scroll,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let mut session = ctx.session("scroll_up").await?;
        let msg = match params.amount {
            Some(px) => {
                session.scroll_by(Some(-i64::from(px))).await?;
                format!("🔍  Scrolled up the page by {} pixels", px)
            }
            None => {
                session.page_up().await?;
                "🔍  Scrolled up the page by one page".to_string()
            }
        };
        info!("{}", msg);
        Ok(ActionOutcome::content(msg))
    }
}
