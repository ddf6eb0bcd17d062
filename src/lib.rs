//! # eoka-pilot
//!
//! LLM-driven browser agent. Each turn the agent indexes the page's
//! interactive elements, asks a model for exactly one action, runs it through
//! the action registry and repeats until the task is done or the failure
//! budget runs out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eoka_pilot::{Agent, BrowserConfig, EokaBrowser, LanguageModel, RunStatus};
//!
//! # async fn demo(llm: Arc<dyn LanguageModel>) -> eoka_pilot::Result<()> {
//! let browser = EokaBrowser::launch(&BrowserConfig::default()).await?.shared();
//!
//! let mut agent = Agent::builder("Find the price of the cheapest flight to Lisbon", llm)
//!     .browser(browser)
//!     .build()?;
//!
//! let run = agent.run().await;
//! if let RunStatus::Completed { result } = &run.status {
//!     println!("{}", result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod browser;
pub mod config;
pub mod controller;
pub mod dom;
pub mod error;
pub mod llm;
pub mod registry;

#[cfg(test)]
mod testing;

pub use agent::{
    ActionSelection, Agent, AgentBuilder, AgentPhase, AgentRun, CurrentState, HistoryItem,
    RunHistory, RunStatus,
};
pub use browser::{
    BrowserError, BrowserSession, BrowserState, EokaBrowser, SharedBrowser, StateSummary,
    TabInfo, ViewportSize,
};
pub use config::{AgentSettings, BrowserConfig, Config, IndexerSettings, Viewport};
pub use controller::{ActionCall, Controller};
pub use dom::{
    DefaultPredicates, DomNode, ElementIndexer, ElementNode, ElementPredicates, IndexedPage,
    InteractiveElement, SelectorMap, SnapshotNode,
};
pub use error::StepError;
pub use llm::{ContentPart, LanguageModel, LlmError, Message, Role};
pub use registry::{
    Action, ActionHandle, ActionOutcome, ActionSpec, ExecutionContext, NoParams, OutcomeKind,
    Registry,
};

/// Result type for eoka-pilot setup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors outside the per-turn loop: loading config, launching a browser,
/// building a registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("action '{0}' is already registered")]
    DuplicateAction(String),
}
