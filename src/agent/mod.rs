//! Agent loop.
//!
//! One turn: capture the page, ask the model for exactly one action, run it
//! through the [`Controller`], record the outcome. The loop ends when an
//! action reports `is_done`, when `max_failures` turns fail in a row, when
//! `max_steps` is reached, or when the cancellation token fires.

mod history;
mod output;
mod prompt;

pub use history::{HistoryItem, RunHistory};
pub use output::{ActionSelection, CurrentState};

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::{capture_state, BrowserState, SharedBrowser};
use crate::config::{AgentSettings, Config};
use crate::controller::Controller;
use crate::dom::ElementIndexer;
use crate::error::StepError;
use crate::llm::{LanguageModel, LlmError, Message, Role};
use crate::registry::{ActionOutcome, ExecutionContext, OutcomeKind, Registry};
use crate::Result;

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Idle,
    Perceiving,
    Deciding,
    Executing,
    Evaluating,
    /// Finished: done, cancelled or out of steps.
    Terminated,
    /// Consecutive-failure budget exhausted.
    Failed,
}

impl AgentPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentPhase::Terminated | AgentPhase::Failed)
    }
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentPhase::Idle => "idle",
            AgentPhase::Perceiving => "perceiving",
            AgentPhase::Deciding => "deciding",
            AgentPhase::Executing => "executing",
            AgentPhase::Evaluating => "evaluating",
            AgentPhase::Terminated => "terminated",
            AgentPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// `done` was called; `result` is its text.
    Completed { result: String },
    Failed {
        last_error: String,
        consecutive_failures: u32,
    },
    Cancelled,
    StepLimitReached { steps: usize },
}

/// Result of [`Agent::run`].
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub status: RunStatus,
    pub history: RunHistory,
}

impl AgentRun {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed { .. })
    }
}

pub struct AgentBuilder {
    task: String,
    llm: Arc<dyn LanguageModel>,
    registry: Option<Arc<Registry>>,
    browser: Option<SharedBrowser>,
    settings: AgentSettings,
    cancel: Option<CancellationToken>,
    indexer: Option<ElementIndexer>,
}

impl AgentBuilder {
    /// Action vocabulary. Defaults to [`Registry::with_default_actions`].
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn browser(mut self, browser: SharedBrowser) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Agent and indexer settings from a loaded config.
    pub fn config(mut self, config: &Config) -> Self {
        self.settings = config.agent.clone();
        self.indexer = Some(ElementIndexer::new(&config.indexer));
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn indexer(mut self, indexer: ElementIndexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn build(self) -> Result<Agent> {
        self.settings.validate()?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(Registry::with_default_actions()?),
        };

        let messages = vec![
            prompt::system_message(&registry.prompt_description(), chrono::Local::now()),
            prompt::task_message(&self.task),
        ];
        if let Some(path) = &self.settings.save_conversation_path {
            info!("Saving conversation to {}", path);
        }

        Ok(Agent {
            controller: Controller::new().auto_switch_tabs(self.settings.auto_switch_tabs),
            task: self.task,
            llm: self.llm,
            registry,
            browser: self.browser,
            indexer: self.indexer.unwrap_or_default(),
            cancel: self.cancel.unwrap_or_default(),
            settings: self.settings,
            messages,
            history: RunHistory::new(),
            phase: AgentPhase::Idle,
            n_steps: 0,
            consecutive_failures: 0,
            status: None,
        })
    }
}

/// Drives one task to completion.
pub struct Agent {
    task: String,
    llm: Arc<dyn LanguageModel>,
    registry: Arc<Registry>,
    browser: Option<SharedBrowser>,
    controller: Controller,
    indexer: ElementIndexer,
    settings: AgentSettings,
    cancel: CancellationToken,
    /// System prompt, task, then one assistant/user pair per turn.
    messages: Vec<Message>,
    history: RunHistory,
    phase: AgentPhase,
    n_steps: usize,
    consecutive_failures: u32,
    status: Option<RunStatus>,
}

/// Runs `fut` unless `token` fires first.
async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

impl Agent {
    pub fn builder(task: impl Into<String>, llm: Arc<dyn LanguageModel>) -> AgentBuilder {
        AgentBuilder {
            task: task.into(),
            llm,
            registry: None,
            browser: None,
            settings: AgentSettings::default(),
            cancel: None,
            indexer: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Terminal status, once the run has ended.
    pub fn status(&self) -> Option<&RunStatus> {
        self.status.as_ref()
    }

    /// Token that cancels this agent.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until done, failed, cancelled or out of steps.
    pub async fn run(&mut self) -> AgentRun {
        info!("🚀 Starting task: {}", self.task);

        let status = loop {
            if let Some(status) = self.step().await {
                break status;
            }
            if self.n_steps >= self.settings.max_steps {
                info!("❌ Failed to complete task in {} steps", self.n_steps);
                let status = RunStatus::StepLimitReached {
                    steps: self.n_steps,
                };
                self.finish(status.clone(), AgentPhase::Terminated);
                break status;
            }
        };

        AgentRun {
            status,
            history: self.history.clone(),
        }
    }

    /// Run one turn. Returns the terminal status once the run has ended;
    /// after that, further calls do nothing and return the same status.
    pub async fn step(&mut self) -> Option<RunStatus> {
        if let Some(status) = &self.status {
            return Some(status.clone());
        }
        if self.cancel.is_cancelled() {
            return Some(self.cancelled().await);
        }

        self.n_steps += 1;
        let step = self.n_steps;
        let started = Instant::now();
        info!("📍 Step {}", step);

        self.set_phase(AgentPhase::Perceiving);
        let cancel = self.cancel.clone();
        let state = match until_cancelled(&cancel, self.perceive()).await {
            Some(state) => state,
            None => return Some(self.cancelled().await),
        };

        let mut rate_limited = false;
        let (state, model_output, outcome) = match state {
            Err(e) => (BrowserState::default(), None, ActionOutcome::from(e)),
            Ok(state) => {
                self.set_phase(AgentPhase::Deciding);
                let mut input = self.messages.clone();
                input.push(prompt::state_message(&state, self.settings.use_vision));

                let selection = match until_cancelled(&cancel, self.decide(&input)).await {
                    None => return Some(self.cancelled().await),
                    Some(Ok(raw)) => {
                        self.save_conversation(step, &input, &raw);
                        ActionSelection::parse(&raw, &self.registry)
                    }
                    Some(Err(e)) => {
                        rate_limited = matches!(e, LlmError::RateLimited(_));
                        Err(StepError::Model(e.to_string()))
                    }
                };

                match selection {
                    Err(e) => (state, None, ActionOutcome::from(e)),
                    Ok(selection) => {
                        log_selection(&selection);
                        self.messages.push(Message::assistant(selection.to_json()));

                        if self.cancel.is_cancelled() {
                            return Some(self.cancelled().await);
                        }
                        self.set_phase(AgentPhase::Executing);
                        let mut ctx =
                            ExecutionContext::new(self.browser.as_ref(), &state.selector_map);
                        let outcome = self
                            .controller
                            .execute(&self.registry, &selection.action, &mut ctx)
                            .await;
                        (state, Some(selection), outcome)
                    }
                }
            }
        };

        self.set_phase(AgentPhase::Evaluating);
        self.record(step, &state, model_output, &outcome);
        debug!("Step {} took {:?}", step, started.elapsed());

        match outcome.kind() {
            OutcomeKind::Done => {
                let result = outcome.extracted_content.unwrap_or_default();
                info!("✅ Task completed: {}", result);
                let status = RunStatus::Completed { result };
                self.finish(status.clone(), AgentPhase::Terminated);
                Some(status)
            }
            OutcomeKind::Error => {
                let last_error = outcome.error.unwrap_or_default();
                self.consecutive_failures += 1;
                let failures = self.consecutive_failures;
                let max = self.settings.max_failures;

                if rate_limited {
                    warn!("❌ Result failed {}/{} times: {}", failures, max, last_error);
                } else {
                    error!("❌ Result failed {}/{} times: {}", failures, max, last_error);
                }

                if failures >= max {
                    error!("❌ Stopping due to {} consecutive failures", max);
                    let status = RunStatus::Failed {
                        last_error,
                        consecutive_failures: failures,
                    };
                    self.finish(status.clone(), AgentPhase::Failed);
                    return Some(status);
                }

                if self.settings.retry_delay_ms > 0 {
                    let delay = Duration::from_millis(self.settings.retry_delay_ms);
                    debug!("Waiting {:?} before retrying", delay);
                    if until_cancelled(&cancel, tokio::time::sleep(delay))
                        .await
                        .is_none()
                    {
                        return Some(self.cancelled().await);
                    }
                }
                None
            }
            OutcomeKind::Success => {
                self.consecutive_failures = 0;
                if let Some(content) = &outcome.extracted_content {
                    info!("📄 Result: {}", content);
                }
                None
            }
        }
    }

    fn set_phase(&mut self, phase: AgentPhase) {
        debug!("Phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn finish(&mut self, status: RunStatus, phase: AgentPhase) {
        self.set_phase(phase);
        self.status = Some(status);
    }

    /// Capture the page. Without a bound browser the agent sees an empty page.
    async fn perceive(&self) -> std::result::Result<BrowserState, StepError> {
        let Some(browser) = &self.browser else {
            return Ok(BrowserState::default());
        };
        let mut session = browser.lock().await;

        if self.n_steps == 1 {
            match session.capture_viewport_size().await {
                Ok(size) => debug!("Viewport {}x{}", size.width, size.height),
                Err(e) => debug!("Could not read viewport size: {}", e),
            }
        }

        let started = Instant::now();
        let state = capture_state(
            &mut *session,
            &self.indexer,
            Duration::from_millis(self.settings.page_load_timeout_ms),
            self.settings.use_vision,
        )
        .await?;
        debug!(
            "Captured {} ({} elements) in {:?}",
            state.url,
            state.selector_map.len(),
            started.elapsed()
        );
        Ok(state)
    }

    async fn decide(&self, input: &[Message]) -> std::result::Result<String, LlmError> {
        let timeout = Duration::from_millis(self.settings.llm_timeout_ms);
        match tokio::time::timeout(timeout, self.llm.complete(input, true)).await {
            Ok(response) => response,
            Err(_) => Err(LlmError::Request(format!(
                "no response within {}ms",
                self.settings.llm_timeout_ms
            ))),
        }
    }

    fn record(
        &mut self,
        step: usize,
        state: &BrowserState,
        model_output: Option<ActionSelection>,
        outcome: &ActionOutcome,
    ) {
        if let Some(content) = &outcome.extracted_content {
            self.messages.push(Message::user(content.clone()));
        }
        if let Some(error) = &outcome.error {
            self.messages.push(Message::user(error.clone()));
        }

        let interacted_element = model_output
            .as_ref()
            .and_then(|o| o.action.index())
            .and_then(|i| state.selector_map.get(i).cloned());

        self.history.push(HistoryItem {
            step,
            state: state.summary(),
            model_output,
            interacted_element,
            outcome: outcome.clone(),
        });
    }

    /// Best-effort cleanup, then the cancelled status.
    async fn cancelled(&mut self) -> RunStatus {
        warn!("Run cancelled after {} steps", self.n_steps);
        if let Some(browser) = &self.browser {
            if let Err(e) = browser.lock().await.close(true).await {
                warn!("Failed to close browser after cancellation: {}", e);
            }
        }
        self.finish(RunStatus::Cancelled, AgentPhase::Terminated);
        RunStatus::Cancelled
    }

    fn save_conversation(&self, step: usize, input: &[Message], response: &str) {
        let Some(base) = &self.settings.save_conversation_path else {
            return;
        };
        let path = format!("{}_{}.txt", base, step);
        if let Err(e) = write_conversation(Path::new(&path), input, response) {
            warn!("Failed to save conversation to {}: {}", path, e);
        }
    }
}

fn write_conversation(path: &Path, input: &[Message], response: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let mut out = String::new();
    for message in input {
        let role = match message.role {
            Role::System => "SystemMessage",
            Role::User => "HumanMessage",
            Role::Assistant => "AIMessage",
        };
        out.push_str(&format!(" {} \n{}\n\n", role, pretty(&message.text_content())));
    }
    out.push_str(" RESPONSE\n");
    out.push_str(&pretty(response));
    out.push('\n');

    std::fs::write(path, out)
}

/// Indent JSON; anything else is trimmed.
fn pretty(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| text.trim().to_string())
}

fn log_selection(selection: &ActionSelection) {
    let state = &selection.current_state;
    let emoji = if state.valuation_previous_goal.contains("Success") {
        "👍"
    } else if state.valuation_previous_goal.contains("Failed") {
        "⚠️"
    } else {
        "🤷"
    };
    info!("{} Evaluation: {}", emoji, state.valuation_previous_goal);
    info!("🧠 Memory: {}", state.memory);
    info!("🎯 Next Goal: {}", state.next_goal);
    info!("🛠️ Action: {}", selection.action);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrowser;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    /// Replays canned answers; repeats the last one when the script runs out.
    struct ScriptedModel {
        replies: StdMutex<VecDeque<std::result::Result<String, LlmError>>>,
        last: StdMutex<Option<String>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<std::result::Result<String, LlmError>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
                last: StdMutex::new(None),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn answers(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(
            &self,
            _messages: &[Message],
            _structured_json: bool,
        ) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(reply)) => {
                    *self.last.lock().unwrap() = Some(reply.clone());
                    Ok(reply)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
            }
        }
    }

    fn answer(action: &str) -> String {
        format!(
            r#"{{"current_state": {{"valuation_previous_goal": "Success", "memory": "", "next_goal": "next"}}, "action": {}}}"#,
            action
        )
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            max_failures: 3,
            retry_delay_ms: 0,
            ..Default::default()
        }
    }

    fn agent(
        llm: &Arc<ScriptedModel>,
        mock: &Arc<Mutex<MockBrowser>>,
        settings: AgentSettings,
    ) -> Agent {
        let browser: SharedBrowser = mock.clone();
        let llm: Arc<dyn LanguageModel> = llm.clone();
        Agent::builder("follow the link", llm)
            .browser(browser)
            .settings(settings)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_done_completes_run() {
        let llm = Arc::new(ScriptedModel::answers(&[&answer(
            r#"{"done": {"text": "all set"}}"#,
        )]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(&llm, &mock, settings());

        let run = agent.run().await;
        assert_eq!(
            run.status,
            RunStatus::Completed {
                result: "all set".into()
            }
        );
        assert_eq!(run.history.len(), 1);
        assert!(run.history.is_done());
        assert_eq!(agent.phase(), AgentPhase::Terminated);
        assert_eq!(llm.calls(), 1);
        assert!(!mock.lock().await.calls.iter().any(|c| c.starts_with("close")));
    }

    #[tokio::test]
    async fn test_failure_budget_stops_run() {
        let llm = Arc::new(ScriptedModel::answers(&["not json at all"]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(&llm, &mock, settings());

        let run = agent.run().await;
        match &run.status {
            RunStatus::Failed {
                last_error,
                consecutive_failures,
            } => {
                assert_eq!(*consecutive_failures, 3);
                assert!(last_error.starts_with("invalid model output"));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert_eq!(llm.calls(), 3);
        assert_eq!(run.history.len(), 3);
        assert!(run.history.items().iter().all(|h| h.model_output.is_none()));
        assert_eq!(agent.phase(), AgentPhase::Failed);

        // Terminal: no further perception or model calls.
        assert_eq!(agent.step().await, Some(run.status.clone()));
        assert_eq!(llm.calls(), 3);
        assert_eq!(agent.history().len(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let llm = Arc::new(ScriptedModel::answers(&[
            "garbage",
            "garbage",
            &answer(r#"{"go_back": {}}"#),
            "garbage",
            "garbage",
            &answer(r#"{"done": {"text": "ok"}}"#),
        ]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(&llm, &mock, settings());

        let run = agent.run().await;
        assert!(run.is_completed());
        assert_eq!(run.history.len(), 6);
        assert_eq!(run.history.errors().len(), 4);
        assert_eq!(agent.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let llm = Arc::new(ScriptedModel::answers(&[&answer(r#"{"go_back": {}}"#)]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let token = CancellationToken::new();
        let browser: SharedBrowser = mock.clone();
        let dyn_llm: Arc<dyn LanguageModel> = llm.clone();
        let mut agent = Agent::builder("anything", dyn_llm)
            .browser(browser)
            .settings(settings())
            .cancellation(token.clone())
            .build()
            .unwrap();

        token.cancel();
        let run = agent.run().await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.history.is_empty());
        assert_eq!(llm.calls(), 0);
        assert_eq!(mock.lock().await.calls, vec!["close force=true"]);
    }

    #[tokio::test]
    async fn test_cancel_survives_close_failure() {
        let llm = Arc::new(
            ScriptedModel::answers(&[&answer(r#"{"go_back": {}}"#)]).slow(Duration::from_secs(30)),
        );
        let mock = Arc::new(Mutex::new(MockBrowser::new().failing_close()));
        let mut agent = agent(&llm, &mock, settings());
        let token = agent.cancellation_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let run = agent.run().await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(agent.phase(), AgentPhase::Terminated);
        assert_eq!(agent.status(), Some(&RunStatus::Cancelled));
        assert!(mock
            .lock()
            .await
            .calls
            .contains(&"close force=true".to_string()));

        // Terminal: a further step neither retries cleanup nor runs a turn.
        assert_eq!(agent.step().await, Some(RunStatus::Cancelled));
        assert_eq!(
            mock.lock()
                .await
                .calls
                .iter()
                .filter(|c| c.starts_with("close"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_during_model_call() {
        let llm = Arc::new(
            ScriptedModel::answers(&[&answer(r#"{"go_back": {}}"#)]).slow(Duration::from_secs(30)),
        );
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(&llm, &mock, settings());
        let token = agent.cancellation_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let run = agent.run().await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(!mock.lock().await.calls.contains(&"go_back".to_string()));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let llm = Arc::new(ScriptedModel::answers(&[&answer(r#"{"go_back": {}}"#)]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(
            &llm,
            &mock,
            AgentSettings {
                max_steps: 2,
                ..settings()
            },
        );

        let run = agent.run().await;
        assert_eq!(run.status, RunStatus::StepLimitReached { steps: 2 });
        assert_eq!(mock.lock().await.calls, vec!["go_back", "go_back"]);
    }

    #[tokio::test]
    async fn test_model_timeout_is_turn_failure() {
        let llm = Arc::new(
            ScriptedModel::answers(&[&answer(r#"{"go_back": {}}"#)]).slow(Duration::from_secs(5)),
        );
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(
            &llm,
            &mock,
            AgentSettings {
                max_failures: 1,
                llm_timeout_ms: 20,
                ..settings()
            },
        );

        let run = agent.run().await;
        match run.status {
            RunStatus::Failed { last_error, .. } => {
                assert!(last_error.contains("no response within 20ms"))
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_counts_as_failure() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Err(LlmError::RateLimited("slow down".into())),
            Ok(answer(r#"{"done": {"text": "ok"}}"#)),
        ]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(&llm, &mock, settings());

        let run = agent.run().await;
        assert!(run.is_completed());
        assert_eq!(run.history.errors(), vec!["model request failed: rate limited: slow down"]);
    }

    #[tokio::test]
    async fn test_unreadable_page_skips_model() {
        let llm = Arc::new(ScriptedModel::answers(&[&answer(r#"{"go_back": {}}"#)]));
        let mock = Arc::new(Mutex::new(MockBrowser::new().with_markup("<html>")));
        let mut agent = agent(
            &llm,
            &mock,
            AgentSettings {
                max_failures: 2,
                ..settings()
            },
        );

        let run = agent.run().await;
        assert!(matches!(run.status, RunStatus::Failed { .. }));
        assert_eq!(llm.calls(), 0);
        assert!(run.history.errors()[0].starts_with("could not capture page state"));
    }

    #[tokio::test]
    async fn test_settle_timeout_still_captures() {
        let llm = Arc::new(ScriptedModel::answers(&[&answer(
            r#"{"click_element": {"index": 0}}"#,
        )]));
        let mock = Arc::new(Mutex::new(MockBrowser::new().slow_to_load()));
        let mut agent = agent(&llm, &mock, settings());

        assert_eq!(agent.step().await, None);
        let item = &agent.history().items()[0];
        assert_eq!(item.state.interactive_elements, 1);
        assert_eq!(
            item.interacted_element.as_ref().map(|e| e.locator.as_str()),
            Some("/html/body/a[1]")
        );
        assert_eq!(mock.lock().await.clicks(), vec!["/html/body/a[1]"]);
    }

    #[tokio::test]
    async fn test_messages_carry_outputs_and_results() {
        let llm = Arc::new(ScriptedModel::answers(&[
            &answer(r#"{"go_back": {}}"#),
            &answer(r#"{"click_element": {"index": 7}}"#),
        ]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(&llm, &mock, settings());

        agent.step().await;
        agent.step().await;

        let messages = agent.messages();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text_content(), "Your task is: follow the link");
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].text_content().contains("\"go_back\""));
        assert_eq!(messages[3].text_content(), "🔙  Navigated back");
        assert_eq!(
            messages[5].text_content(),
            "element with index 7 does not exist - retry or use alternative actions"
        );
        assert!(messages.iter().all(|m| !m.has_image()));
    }

    #[tokio::test]
    async fn test_no_browser_bound() {
        let llm = Arc::new(ScriptedModel::answers(&[
            &answer(r#"{"go_back": {}}"#),
            &answer(r#"{"done": {"text": "nothing to browse"}}"#),
        ]));
        let dyn_llm: Arc<dyn LanguageModel> = llm.clone();
        let mut agent = Agent::builder("answer offline", dyn_llm)
            .settings(settings())
            .build()
            .unwrap();

        let run = agent.run().await;
        assert!(run.is_completed());
        assert!(run.history.errors()[0].contains("requires a browser session"));
    }

    #[tokio::test]
    async fn test_save_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("logs").join("conversation");
        let llm = Arc::new(ScriptedModel::answers(&[&answer(
            r#"{"done": {"text": "saved"}}"#,
        )]));
        let mock = Arc::new(Mutex::new(MockBrowser::new()));
        let mut agent = agent(
            &llm,
            &mock,
            AgentSettings {
                save_conversation_path: Some(base.to_string_lossy().into_owned()),
                ..settings()
            },
        );

        agent.run().await;
        let saved = std::fs::read_to_string(dir.path().join("logs").join("conversation_1.txt"))
            .unwrap();
        assert!(saved.contains(" SystemMessage \n"));
        assert!(saved.contains("Your task is: follow the link"));
        assert!(saved.contains("Current url: https://example.com/"));
        assert!(saved.contains(" RESPONSE\n"));
        assert!(saved.contains("\"saved\""));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let llm: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::answers(&[]));
        let err = Agent::builder("x", llm)
            .settings(AgentSettings {
                max_failures: 0,
                ..Default::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("max_failures"));
    }
}
