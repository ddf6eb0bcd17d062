//! Append-only record of a run.

use serde::{Deserialize, Serialize};

use super::output::{ActionSelection, CurrentState};
use crate::browser::StateSummary;
use crate::controller::ActionCall;
use crate::dom::InteractiveElement;
use crate::registry::ActionOutcome;

/// One turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// 1-based.
    pub step: usize,
    pub state: StateSummary,
    /// `None` when the turn failed before the model answered.
    pub model_output: Option<ActionSelection>,
    /// The element the action's `index` pointed at, if any.
    pub interacted_element: Option<InteractiveElement>,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    items: Vec<HistoryItem>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, item: HistoryItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the last turn finished the task.
    pub fn is_done(&self) -> bool {
        self.items.last().is_some_and(|h| h.outcome.is_done)
    }

    /// Content of the last turn.
    pub fn final_result(&self) -> Option<&str> {
        self.items
            .last()
            .and_then(|h| h.outcome.extracted_content.as_deref())
    }

    pub fn errors(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|h| h.outcome.error.as_deref())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|h| h.outcome.error.is_some())
    }

    /// URL of every turn, in order. Empty URLs are skipped.
    pub fn urls(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|h| h.state.url.as_str())
            .filter(|u| !u.is_empty())
            .collect()
    }

    pub fn model_actions(&self) -> Vec<&ActionCall> {
        self.items
            .iter()
            .filter_map(|h| h.model_output.as_ref().map(|o| &o.action))
            .collect()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.model_actions()
            .into_iter()
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn model_thoughts(&self) -> Vec<&CurrentState> {
        self.items
            .iter()
            .filter_map(|h| h.model_output.as_ref().map(|o| &o.current_state))
            .collect()
    }

    pub fn extracted_content(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|h| h.outcome.extracted_content.as_deref())
            .collect()
    }

    pub fn last_action(&self) -> Option<&ActionCall> {
        self.items
            .last()
            .and_then(|h| h.model_output.as_ref())
            .map(|o| &o.action)
    }

    /// Actions whose name is in `include`, in run order.
    pub fn model_actions_filtered(&self, include: &[&str]) -> Vec<&ActionCall> {
        self.model_actions()
            .into_iter()
            .filter(|a| include.contains(&a.name.as_str()))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
