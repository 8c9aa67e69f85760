use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{Action, Locator, Outcome};
use crate::dom::PageTree;
use crate::error::{AgentError, ComputerError, ReasonerError};
use crate::executor::{ActionExecutor, ExecutorConfig};
use crate::planner::{ActionPlanner, PlannerConfig, PlanningRequest};
use crate::scraper::{ScrapedItem, Scraper};
use crate::simplify::{PageSimplifier, SimplifiedPage, SimplifierConfig};
use crate::store::{NullSink, ResultSink, ResultStore, StepRecord};

/// Observation-failure notes kept for the planner.
const MAX_NOTES: usize = 5;

// ========================= Core Types =========================

/// The outcome a run is working toward. Fixed for the lifetime of the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Goal(String);

impl Goal {
    pub fn new(task: impl Into<String>) -> Self {
        Self(task.into())
    }

    pub fn task(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    Finished(String),
    FinishedAfterScrape,
    StepLimit,
    Cancelled,
    PlanningFailed(String),
    PageUnreadable(String),
}

impl TerminationReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PlanningFailed(_) | Self::PageUnreadable(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Finished(_) | Self::FinishedAfterScrape | Self::StepLimit => 0,
            Self::Cancelled => 130,
            Self::PlanningFailed(_) | Self::PageUnreadable(_) => 1,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished(reason) => write!(f, "finished: {reason}"),
            Self::FinishedAfterScrape => f.write_str("finished after scrape"),
            Self::StepLimit => f.write_str("step limit reached"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::PlanningFailed(msg) => write!(f, "planning failed: {msg}"),
            Self::PageUnreadable(msg) => write!(f, "page unreadable: {msg}"),
        }
    }
}

/// Everything a run owns. Mutated only by the loop, between phases.
#[derive(Debug)]
pub struct AgentState {
    goal: Goal,
    history: ResultStore,
    termination: Option<TerminationReason>,
    notes: Vec<String>,
    observe_failures: u32,
}

impl AgentState {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            history: ResultStore::new(),
            termination: None,
            notes: Vec::new(),
            observe_failures: 0,
        }
    }

    /// Steps taken so far; always the length of the history.
    pub fn step(&self) -> usize {
        self.history.len()
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn history(&self) -> &ResultStore {
        &self.history
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    /// First reason wins; a terminated state stays terminated.
    pub fn terminate(&mut self, reason: TerminationReason) {
        if self.termination.is_none() {
            self.termination = Some(reason);
        }
    }

    /// Notes describe the page before this step; the new record supersedes them.
    fn record(&mut self, action: Action, outcome: Outcome, data: Vec<ScrapedItem>) -> &StepRecord {
        self.notes.clear();
        self.history.record(action, outcome, data)
    }

    fn note(&mut self, note: String) {
        if self.notes.len() == MAX_NOTES {
            self.notes.remove(0);
        }
        self.notes.push(note);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub goal: Goal,
    pub start_url: String,
    pub reason: TerminationReason,
    pub steps: Vec<StepRecord>,
    pub elapsed_ms: u128,
    /// False when the result sink failed; the steps above are still complete.
    pub persisted: bool,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }

    pub fn scraped_items(&self) -> usize {
        self.steps.iter().map(|s| s.data.len()).sum()
    }
}

// ========================= Pluggable Subsystems =========================

/// Browser driver capabilities the loop depends on.
#[async_trait]
pub trait Computer: Send + Sync {
    async fn open_url(&self, url: &str) -> Result<(), ComputerError>;
    /// Structural tree of the current document. `PageBusy` while it is still loading.
    async fn page_tree(&self) -> Result<PageTree, ComputerError>;
    async fn click(&self, target: &Locator) -> Result<(), ComputerError>;
    async fn type_text(&self, target: &Locator, text: &str) -> Result<(), ComputerError>;
    async fn scroll(&self, dy: i64) -> Result<(), ComputerError>;
    async fn wait_for_stable(&self, timeout: Duration) -> Result<(), ComputerError>;
}

/// External reasoning service: one request in, one free-form reply out.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, request: &PlanningRequest) -> Result<String, ReasonerError>;
}

// ========================= Agent Core =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Consecutive unreadable observations tolerated before the run ends.
    pub max_observe_failures: u32,
    pub navigation_timeout: Duration,
    pub simplifier: SimplifierConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub scraper: Scraper,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_observe_failures: 3,
            navigation_timeout: Duration::from_secs(30),
            simplifier: SimplifierConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            scraper: Scraper::default(),
        }
    }
}

enum Phase {
    Observing,
    Planning(SimplifiedPage),
    Executing(Action),
    Recording(Action, Outcome, Vec<ScrapedItem>),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Observing => "observing",
            Phase::Planning(_) => "planning",
            Phase::Executing(_) => "executing",
            Phase::Recording(..) => "recording",
        }
    }
}

pub struct Agent<C, R, S>
where
    C: Computer,
    R: Reasoner,
    S: ResultSink,
{
    computer: C,
    planner: ActionPlanner<R>,
    simplifier: PageSimplifier,
    executor: ActionExecutor,
    scraper: Scraper,
    sink: S,
    cfg: AgentConfig,
    cancel: CancellationToken,
}

impl<C, R, S> Agent<C, R, S>
where
    C: Computer,
    R: Reasoner,
    S: ResultSink,
{
    pub fn new(computer: C, reasoner: R, sink: S, cfg: AgentConfig) -> Self {
        Self {
            computer,
            planner: ActionPlanner::new(reasoner, cfg.planner.clone()),
            simplifier: PageSimplifier::new(cfg.simplifier.clone()),
            executor: ActionExecutor::new(cfg.executor.clone()),
            scraper: cfg.scraper.clone(),
            sink,
            cfg,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop signal checked between iterations.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    /// Hand the browser back for teardown once the run is over.
    pub fn into_computer(self) -> C {
        self.computer
    }

    /// Navigate to `start_url` and drive the loop until it terminates.
    ///
    /// Only a failed initial navigation is an `Err`; every later failure ends
    /// in a report carrying the steps recorded so far.
    pub async fn run(&self, goal: &str, start_url: &str) -> Result<RunReport, AgentError> {
        let run_id = nanoid!();
        let start = Instant::now();
        info!(run_id = %run_id, url = start_url, goal, "starting run");

        tokio::time::timeout(self.cfg.navigation_timeout, self.computer.open_url(start_url))
            .await
            .map_err(|_| ComputerError::Timeout(self.cfg.navigation_timeout))??;

        let mut state = AgentState::new(Goal::new(goal));
        let reason = self.drive(&mut state).await;
        state.terminate(reason);
        self.finish(run_id, start_url, state, start).await
    }

    async fn drive(&self, state: &mut AgentState) -> TerminationReason {
        let mut phase = Phase::Observing;
        loop {
            debug!(step = state.step(), phase = phase.name(), "phase");
            phase = match phase {
                Phase::Observing => {
                    if self.cancel.is_cancelled() {
                        return TerminationReason::Cancelled;
                    }
                    if state.step() >= self.cfg.max_steps {
                        return TerminationReason::StepLimit;
                    }
                    match self.simplifier.observe(&self.computer).await {
                        Ok(page) => {
                            state.observe_failures = 0;
                            Phase::Planning(page)
                        }
                        Err(err) => {
                            state.observe_failures += 1;
                            warn!(step = state.step(), failures = state.observe_failures, error = %err, "observation failed");
                            if state.observe_failures >= self.cfg.max_observe_failures {
                                return TerminationReason::PageUnreadable(err.to_string());
                            }
                            let note = format!("before step {}: {}, observed again", state.step(), err);
                            state.note(note);
                            Phase::Observing
                        }
                    }
                }
                Phase::Planning(page) => {
                    if self.cancel.is_cancelled() {
                        return TerminationReason::Cancelled;
                    }
                    match self
                        .planner
                        .plan(&state.goal, &page, state.history.records(), &state.notes)
                        .await
                    {
                        Ok(Action::Finish { reason }) => {
                            info!(step = state.step(), reason = %reason, "planner finished the run");
                            return TerminationReason::Finished(reason);
                        }
                        Ok(action) => Phase::Executing(action),
                        Err(err) => {
                            error!(step = state.step(), error = %err, "planning failed");
                            return TerminationReason::PlanningFailed(err.to_string());
                        }
                    }
                }
                Phase::Executing(action) => {
                    let (outcome, data) = match &action {
                        Action::Scrape { .. } => match self.scraper.scrape(&self.computer).await {
                            Ok(items) => (Outcome::Succeeded, items),
                            Err(err) => (Outcome::failed(format!("scrape failed: {err}")), Vec::new()),
                        },
                        _ => (self.executor.execute(&self.computer, &action).await, Vec::new()),
                    };
                    Phase::Recording(action, outcome, data)
                }
                Phase::Recording(action, outcome, data) => {
                    let finish_after = matches!(action, Action::Scrape { finish_after: true });
                    let record = state.record(action, outcome, data);
                    info!(
                        step = record.step,
                        action = ?record.action,
                        ok = record.outcome.is_success(),
                        items = record.data.len(),
                        "step recorded"
                    );
                    if finish_after {
                        return TerminationReason::FinishedAfterScrape;
                    }
                    if state.step() >= self.cfg.max_steps {
                        return TerminationReason::StepLimit;
                    }
                    Phase::Observing
                }
            };
        }
    }

    async fn finish(
        &self,
        run_id: String,
        start_url: &str,
        state: AgentState,
        start: Instant,
    ) -> Result<RunReport, AgentError> {
        let reason = state
            .termination
            .clone()
            .unwrap_or_else(|| TerminationReason::Finished("loop exited".into()));

        let persisted = match self.sink.persist(&run_id, state.history.records()).await {
            Ok(()) => true,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "failed to persist results");
                false
            }
        };

        if reason.is_fatal() {
            error!(run_id = %run_id, reason = %reason, steps = state.step(), "run terminated");
        } else {
            info!(run_id = %run_id, reason = %reason, steps = state.step(), "run finished");
        }

        Ok(RunReport {
            run_id,
            goal: state.goal,
            start_url: start_url.to_string(),
            reason,
            steps: state.history.into_records(),
            elapsed_ms: start.elapsed().as_millis(),
            persisted,
        })
    }
}

impl<C: Computer, R: Reasoner> Agent<C, R, NullSink> {
    pub fn with_defaults(computer: C, reasoner: R, cfg: AgentConfig) -> Self {
        Self::new(computer, reasoner, NullSink, cfg)
    }
}
