//! The model's per-turn answer.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::controller::ActionCall;
use crate::error::StepError;
use crate::registry::Registry;

/// The model's reading of where the task stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Success / Failed / Unknown judgment of the previous step.
    pub valuation_previous_goal: String,
    pub memory: String,
    pub next_goal: String,
}

/// One parsed turn: `{"current_state": {...}, "action": {"name": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSelection {
    pub current_state: CurrentState,
    pub action: ActionCall,
}

impl ActionSelection {
    /// Parse raw model text and check the action against `registry`.
    ///
    /// Accepts a bare JSON object or one wrapped in a Markdown code fence.
    pub fn parse(raw: &str, registry: &Registry) -> Result<Self, StepError> {
        let json = extract_json(raw);
        let selection: ActionSelection = serde_json::from_str(json)
            .map_err(|e| StepError::ProtocolViolation(e.to_string()))?;
        registry.validate(&selection.action.name, &selection.action.params)?;
        Ok(selection)
    }

    /// The JSON sent back to the model as its own previous answer.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("fence pattern compiles")
});

/// Strip a code fence or surrounding prose.
fn extract_json(raw: &str) -> &str {
    let raw = raw.trim();
    let fenced = FENCE.captures(raw).and_then(|caps| caps.get(1));
    if let Some(m) = fenced {
        return &raw[m.start()..m.end()];
    }
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    }
}
