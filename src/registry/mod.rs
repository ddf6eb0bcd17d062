//! Action registry.
//!
//! Maps action names to typed handlers. The registry is built before a run
//! and shared read-only (`Arc<Registry>`) while the agent is dispatching, so
//! the catalogue the model sees never changes mid-turn.

mod schema;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::MutexGuard;
use tracing::{debug, warn};

use crate::browser::{BrowserSession, SharedBrowser};
use crate::dom::{InteractiveElement, SelectorMap};
use crate::error::StepError;
use crate::{Error, Result};

/// What a handler may touch during one dispatch.
pub struct ExecutionContext<'a> {
    /// Active browser session, if one is bound.
    pub browser: Option<&'a SharedBrowser>,
    /// Index map of the snapshot the current action was chosen from.
    pub selector_map: &'a SelectorMap,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(browser: Option<&'a SharedBrowser>, selector_map: &'a SelectorMap) -> Self {
        Self {
            browser,
            selector_map,
        }
    }

    /// Lock the bound session.
    pub async fn session(
        &self,
        action: &str,
    ) -> std::result::Result<MutexGuard<'a, dyn BrowserSession>, StepError> {
        match self.browser {
            Some(browser) => Ok(browser.lock().await),
            None => Err(StepError::ContextMissing(action.to_string())),
        }
    }

    /// Look up an index in the current snapshot.
    pub fn element(&self, index: usize) -> std::result::Result<&'a InteractiveElement, StepError> {
        self.selector_map
            .get(index)
            .ok_or(StepError::UnknownElement { index })
    }
}

/// Uniform result of a dispatched action.
///
/// An error takes precedence over `is_done`, which takes precedence over
/// extracted content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub extracted_content: Option<String>,
    pub is_done: bool,
    pub error: Option<String>,
}

/// Which part of an [`ActionOutcome`] decides the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Done,
    Error,
}

impl ActionOutcome {
    /// Success with a message for the model.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(text.into()),
            ..Default::default()
        }
    }

    /// Task complete; `text` is the run's result.
    pub fn done(text: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(text.into()),
            is_done: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        if self.error.is_some() {
            OutcomeKind::Error
        } else if self.is_done {
            OutcomeKind::Done
        } else {
            OutcomeKind::Success
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind() == OutcomeKind::Error
    }
}

impl From<StepError> for ActionOutcome {
    fn from(e: StepError) -> Self {
        ActionOutcome::error(e.to_string())
    }
}

/// Parameters of an action that takes none.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

/// A named operation the model can pick.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    type Params: DeserializeOwned + JsonSchema + Send;

    async fn run(
        &self,
        params: Self::Params,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError>;
}

/// Browser-free action built from an async closure.
pub struct FnAction<P, F> {
    f: F,
    _params: PhantomData<fn() -> P>,
}

impl<P, F> FnAction<P, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _params: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> Action for FnAction<P, F>
where
    P: DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ActionOutcome, StepError>> + Send,
{
    type Params = P;

    async fn run(
        &self,
        params: P,
        _ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        (self.f)(params).await
    }
}

#[async_trait]
trait ErasedAction: Send + Sync {
    fn validate(&self, name: &str, params: &Value) -> std::result::Result<(), StepError>;

    async fn call(
        &self,
        name: &str,
        requires_browser: bool,
        params: Value,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError>;
}

struct Typed<A>(A);

#[async_trait]
impl<A: Action> ErasedAction for Typed<A> {
    fn validate(&self, name: &str, params: &Value) -> std::result::Result<(), StepError> {
        schema::decode::<A::Params>(name, params.clone()).map(|_| ())
    }

    async fn call(
        &self,
        name: &str,
        requires_browser: bool,
        params: Value,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let params = schema::decode::<A::Params>(name, params)?;
        if requires_browser && ctx.browser.is_none() {
            return Err(StepError::ContextMissing(name.to_string()));
        }
        self.0.run(params, ctx).await
    }
}

/// Registry entry.
#[derive(Clone)]
pub struct ActionSpec {
    pub name: String,
    /// Shown to the model.
    pub description: String,
    /// JSON schema of the parameters.
    pub parameter_schema: Value,
    pub requires_browser: bool,
    handler: Arc<dyn ErasedAction>,
}

impl ActionSpec {
    /// Catalogue entry: `{description}: \n{name: {properties}}`.
    pub fn prompt_description(&self) -> String {
        schema::prompt_line(&self.name, &self.description, &self.parameter_schema)
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameter_schema", &self.parameter_schema)
            .field("requires_browser", &self.requires_browser)
            .finish_non_exhaustive()
    }
}

/// Returned by [`Registry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionHandle {
    name: String,
    position: usize,
}

impl ActionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the catalogue.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Ordered name → action mapping.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    specs: Vec<ActionSpec>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in browser actions.
    pub fn with_default_actions() -> Result<Self> {
        let mut registry = Self::new();
        crate::controller::register_default_actions(&mut registry)?;
        Ok(registry)
    }

    pub fn register<A: Action>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        requires_browser: bool,
        action: A,
    ) -> Result<ActionHandle> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateAction(name));
        }

        let position = self.specs.len();
        self.specs.push(ActionSpec {
            name: name.clone(),
            description: description.into(),
            parameter_schema: schema::schema_of::<A::Params>(),
            requires_browser,
            handler: Arc::new(Typed(action)),
        });
        self.by_name.insert(name.clone(), position);
        debug!("Registered action '{}'", name);

        Ok(ActionHandle { name, position })
    }

    /// Register an async closure that needs no browser.
    pub fn register_fn<P, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        f: F,
    ) -> Result<ActionHandle>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ActionOutcome, StepError>> + Send + 'static,
    {
        self.register(name, description, false, FnAction::new(f))
    }

    /// Entries in registration order.
    pub fn catalogue(&self) -> Vec<&ActionSpec> {
        self.specs.iter().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Action vocabulary for the system prompt, one entry per action.
    pub fn prompt_description(&self) -> String {
        self.specs
            .iter()
            .map(ActionSpec::prompt_description)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check `params` against `name`'s schema without running anything.
    pub fn validate(&self, name: &str, params: &Value) -> std::result::Result<(), StepError> {
        let spec = self
            .get(name)
            .ok_or_else(|| StepError::UnknownAction(name.to_string()))?;
        spec.handler.validate(name, params)
    }

    /// Validate and run `name`. Never fails: every error becomes the
    /// outcome's `error`.
    pub async fn dispatch(
        &self,
        name: &str,
        params: Value,
        ctx: &mut ExecutionContext<'_>,
    ) -> ActionOutcome {
        match self.try_dispatch(name, params, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Action '{}' failed ({}): {}", name, e.kind(), e);
                e.into()
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch), keeping the typed error.
    pub async fn try_dispatch(
        &self,
        name: &str,
        params: Value,
        ctx: &mut ExecutionContext<'_>,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let spec = self
            .get(name)
            .ok_or_else(|| StepError::UnknownAction(name.to_string()))?;
        spec.handler
            .call(&spec.name, spec.requires_browser, params, ctx)
            .await
    }
}
