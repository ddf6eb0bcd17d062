//! Prompt construction.

use chrono::{DateTime, Local};

use crate::browser::BrowserState;
use crate::llm::Message;

const RESPONSE_FORMAT: &str = r#"{
	"current_state": {
		"valuation_previous_goal": "Starts with \"Success\", \"Failed:\" or \"Unknown\": did the previous next_goal succeed? If not, say why.",
		"memory": "Everything you must remember until the end of the task, including overall progress on longer tasks. You see this again on the next step.",
		"next_goal": "The next immediate goal, reachable with one action"
	},
	"action": {
		// EXACTLY ONE of the available actions
	}
}"#;

const EXAMPLE_RESPONSE: &str = r#"{"current_state": {"valuation_previous_goal": "Success", "memory": "Applied to 3/7 jobs so far: 1. ..., 2. ..., 3. ...", "next_goal": "Click the apply button of the next job"}, "action": {"click_element": {"index": 44, "num_clicks": 2}}}"#;

const INPUT_FORMAT: &str = "Example:
33[:]\t<button>Interactive element</button>
_[:] Text content...

Explanation:
index[:] An interactive element. Refer to elements only by these indexes.
_[:] Context only, not interactive.
\\t: One tab per nesting level, showing which elements belong together.";

const RULES: &str = r#"1. Only use indexes from the current element list for click_element and input_text. If there are none, try something else, e.g. go_back or search_google.
2. If you are stuck, change approach: go back, search Google or extract the page content.
3. When the whole task is finished, use the done action and put everything the user asked for in its text.
4. If a screenshot is attached, the labelled boxes carry the same indexes as the element list.
5. ALWAYS answer in the response format, as valid JSON.
6. On an empty page, start with go_to_url, search_google or open_tab.
7. Choose EXACTLY ONE action per answer. Several actions in one answer are rejected.
8. Accept or dismiss cookie banners and other popups."#;

/// Fixed instructions: format contract, rules, action vocabulary.
pub(crate) fn system_message(action_description: &str, now: DateTime<Local>) -> Message {
    Message::system(format!(
        "You are an agent that operates a web browser for the user. Each step you get the \
         interactive elements of the current page and answer with one action. Today's date is {date}.

INPUT FORMAT:
{input}

Answer in this RESPONSE FORMAT:
{format}

AVAILABLE ACTIONS:
{actions}

Example:
{example}

IMPORTANT RULES:
{rules}",
        date = now.format("%Y-%m-%d %H:%M"),
        input = INPUT_FORMAT,
        format = RESPONSE_FORMAT,
        actions = action_description,
        example = EXAMPLE_RESPONSE,
        rules = RULES,
    ))
}

pub(crate) fn task_message(task: &str) -> Message {
    Message::user(format!("Your task is: {}", task))
}

/// The current page, with the screenshot attached on vision turns.
pub(crate) fn state_message(state: &BrowserState, use_vision: bool) -> Message {
    let tabs = state
        .tabs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    let msg = Message::user(format!(
        "Current url: {}\nAvailable tabs:\n{}\nInteractive elements:\n{}",
        state.url, tabs, state.element_tree
    ));
    match (&state.screenshot, use_vision) {
        (Some(png), true) => msg.with_png(png),
        _ => msg,
    }
}
