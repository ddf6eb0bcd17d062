//! Executor: runs one model-selected action against the registry.

mod actions;

pub use actions::{
    register_default_actions, ClickElement, Done, ExtractContent, ExtractFormat, GoToUrl,
    InputText, OpenTab, Scroll, SearchGoogle, SwitchTab,
};

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StepError;
use crate::registry::{ActionOutcome, ExecutionContext, Registry};

/// One `{name: params}` pair from the model.
///
/// Deserializing enforces the exactly-one rule: keys mapped to `null` are
/// ignored, and zero or several remaining keys (or a repeated key) are
/// rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub params: Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a raw `action` object.
    pub fn from_value(value: &Value) -> Result<Self, StepError> {
        ActionCall::deserialize(value).map_err(|e| StepError::ProtocolViolation(e.to_string()))
    }

    /// The `index` parameter, when the action targets an element.
    pub fn index(&self) -> Option<usize> {
        self.params
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }
}

impl fmt::Display for ActionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params)
    }
}

impl Serialize for ActionCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.params)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ActionCall {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ActionCallVisitor)
    }
}

struct ActionCallVisitor;

impl<'de> Visitor<'de> for ActionCallVisitor {
    type Value = ActionCall;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object with exactly one action name as key")
    }

    fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut seen = HashSet::new();
        let mut chosen: Option<ActionCall> = None;

        while let Some(name) = map.next_key::<String>()? {
            if !seen.insert(name.clone()) {
                return Err(de::Error::custom(format!(
                    "action '{}' appears more than once",
                    name
                )));
            }
            let params: Value = map.next_value()?;
            if params.is_null() {
                continue;
            }
            if let Some(first) = &chosen {
                return Err(de::Error::custom(format!(
                    "expected exactly one action, got '{}' and '{}'",
                    first.name, name
                )));
            }
            chosen = Some(ActionCall { name, params });
        }

        chosen.ok_or_else(|| de::Error::custom("expected exactly one action, got none"))
    }
}

/// Runs actions and normalizes every failure into the outcome envelope.
#[derive(Debug, Clone)]
pub struct Controller {
    auto_switch_tabs: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            auto_switch_tabs: true,
        }
    }

    /// Follow tabs opened by an action (default on).
    pub fn auto_switch_tabs(mut self, enabled: bool) -> Self {
        self.auto_switch_tabs = enabled;
        self
    }

    /// Run one parsed action.
    pub async fn execute(
        &self,
        registry: &Registry,
        call: &ActionCall,
        ctx: &mut ExecutionContext<'_>,
    ) -> ActionOutcome {
        match self.try_execute(registry, call, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} failed ({}): {}", call.name, e.kind(), e);
                e.into()
            }
        }
    }

    /// Run a raw `action` object. Zero or several action keys are rejected
    /// before anything runs.
    pub async fn execute_value(
        &self,
        registry: &Registry,
        action: &Value,
        ctx: &mut ExecutionContext<'_>,
    ) -> ActionOutcome {
        match ActionCall::from_value(action) {
            Ok(call) => self.execute(registry, &call, ctx).await,
            Err(e) => {
                warn!("Rejected action: {}", e);
                e.into()
            }
        }
    }

    async fn try_execute(
        &self,
        registry: &Registry,
        call: &ActionCall,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ActionOutcome, StepError> {
        let spec = registry
            .get(&call.name)
            .ok_or_else(|| StepError::UnknownAction(call.name.clone()))?;
        registry.validate(&call.name, &call.params)?;
        if let Some(index) = call.index() {
            ctx.element(index)?;
        }

        let follow_tabs = self.auto_switch_tabs && spec.requires_browser;
        let tabs_before = if follow_tabs {
            tab_count(ctx).await
        } else {
            None
        };

        debug!("Executing {}", call);
        let outcome = registry
            .try_dispatch(&call.name, call.params.clone(), ctx)
            .await?;

        if let Some(before) = tabs_before {
            follow_new_tab(ctx, before).await;
        }
        Ok(outcome)
    }
}

async fn tab_count(ctx: &ExecutionContext<'_>) -> Option<usize> {
    let mut session = ctx.session("list_tabs").await.ok()?;
    match session.list_tabs().await {
        Ok(tabs) => Some(tabs.len()),
        Err(e) => {
            debug!("Could not count tabs: {}", e);
            None
        }
    }
}

/// Switch to the newest tab if the count went up. No-op otherwise.
async fn follow_new_tab(ctx: &ExecutionContext<'_>, before: usize) {
    let Ok(mut session) = ctx.session("switch_tab").await else {
        return;
    };
    let tabs = match session.list_tabs().await {
        Ok(tabs) => tabs,
        Err(e) => {
            warn!("Could not list tabs after action: {}", e);
            return;
        }
    };
    if tabs.len() <= before {
        return;
    }
    if let Some(newest) = tabs.last() {
        match session.switch_tab(&newest.id).await {
            Ok(()) => info!("Switched to new tab {} ({})", newest.index, newest.url),
            Err(e) => warn!("Could not switch to new tab {}: {}", newest.index, e),
        }
    }
}
