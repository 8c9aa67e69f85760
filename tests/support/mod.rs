#![allow(dead_code)]

use async_trait::async_trait;
use glass_scout::agent::{AgentConfig, Computer, Reasoner};
use glass_scout::dom::{Element, PageTree};
use glass_scout::error::{AgentError, ComputerError, ReasonerError};
use glass_scout::executor::ExecutorConfig;
use glass_scout::planner::{PlannerConfig, PlanningRequest};
use glass_scout::simplify::{PageSimplifier, SimplifierConfig};
use glass_scout::store::{ResultSink, StepRecord};
use glass_scout::Locator;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn fast_config(max_steps: usize) -> AgentConfig {
    AgentConfig {
        max_steps,
        navigation_timeout: Duration::from_secs(1),
        simplifier: SimplifierConfig { retry_delay: Duration::from_millis(1), ..Default::default() },
        planner: PlannerConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..Default::default()
        },
        executor: ExecutorConfig {
            action_timeout: Duration::from_secs(1),
            settle_timeout: Duration::from_millis(50),
        },
        ..Default::default()
    }
}

pub fn page(url: &str, body: Element) -> PageTree {
    PageTree {
        url: url.to_string(),
        title: None,
        root: Element::new("html").child(body),
    }
}

/// Search box plus a two-result list.
pub fn results_page() -> PageTree {
    page(
        "https://shop.example/search",
        Element::new("body")
            .child(Element::new("input").attr("id", "q").attr("placeholder", "Search"))
            .child(Element::new("button").attr("id", "go").with_text("Go"))
            .child(
                Element::new("ul")
                    .child(Element::new("li").child(Element::new("a").attr("href", "/p/1").with_text("First result")))
                    .child(Element::new("li").child(Element::new("a").attr("href", "/p/2").with_text("Second result"))),
            ),
    )
}

#[derive(Default)]
pub struct MockState {
    pub page: Option<PageTree>,
    /// Clicking the key selector loads the page.
    pub on_click: HashMap<String, PageTree>,
    /// Selectors that disappear between observation and execution.
    pub vanished: HashSet<String>,
    /// Reads that report a page still loading before succeeding.
    pub busy_reads: u32,
    pub always_busy: bool,
    pub fail_navigation: bool,
    pub calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockComputer {
    pub state: Arc<Mutex<MockState>>,
}

impl MockComputer {
    pub fn new(page: PageTree) -> Self {
        let state = MockState { page: Some(page), ..Default::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn with(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn resolve(st: &MockState, target: &Locator) -> Result<(), ComputerError> {
        let present = st
            .page
            .as_ref()
            .map(|p| PageSimplifier::default().simplify(p).contains(target))
            .unwrap_or(false);
        if present && !st.vanished.contains(target.as_str()) {
            Ok(())
        } else {
            Err(ComputerError::NotFound(target.clone()))
        }
    }
}

#[async_trait]
impl Computer for MockComputer {
    async fn open_url(&self, url: &str) -> Result<(), ComputerError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("open {url}"));
        if st.fail_navigation {
            return Err(ComputerError::Driver("net::ERR_NAME_NOT_RESOLVED".into()));
        }
        Ok(())
    }

    async fn page_tree(&self) -> Result<PageTree, ComputerError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push("read".into());
        if st.always_busy {
            return Err(ComputerError::PageBusy);
        }
        if st.busy_reads > 0 {
            st.busy_reads -= 1;
            return Err(ComputerError::PageBusy);
        }
        st.page.clone().ok_or(ComputerError::PageBusy)
    }

    async fn click(&self, target: &Locator) -> Result<(), ComputerError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("click {target}"));
        Self::resolve(&st, target)?;
        if let Some(next) = st.on_click.get(target.as_str()).cloned() {
            st.page = Some(next);
        }
        Ok(())
    }

    async fn type_text(&self, target: &Locator, text: &str) -> Result<(), ComputerError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("type {target} {text}"));
        Self::resolve(&st, target)
    }

    async fn scroll(&self, dy: i64) -> Result<(), ComputerError> {
        self.state.lock().unwrap().calls.push(format!("scroll {dy}"));
        Ok(())
    }

    async fn wait_for_stable(&self, _timeout: Duration) -> Result<(), ComputerError> {
        self.state.lock().unwrap().calls.push("settle".into());
        Ok(())
    }
}

/// Replays canned replies in order; an exhausted script reports an outage.
#[derive(Clone, Default)]
pub struct ScriptedReasoner {
    replies: Arc<Mutex<VecDeque<Result<String, ReasonerError>>>>,
    seen: Arc<Mutex<Vec<PlanningRequest>>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedReasoner {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect())),
            ..Default::default()
        }
    }

    pub fn then_error(self, err: ReasonerError) -> Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    /// Fire `token` once `calls` requests have been answered.
    pub fn cancelling_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn requests(&self) -> Vec<PlanningRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(&self, request: &PlanningRequest) -> Result<String, ReasonerError> {
        let calls = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(request.clone());
            seen.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if calls >= *after {
                token.cancel();
            }
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ReasonerError::Unavailable("connection refused".into())))
    }
}

/// Keeps what was persisted so tests can inspect it.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub writes: Arc<Mutex<Vec<Vec<StepRecord>>>>,
}

impl MemorySink {
    pub fn persisted(&self) -> Vec<Vec<StepRecord>> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, _run_id: &str, records: &[StepRecord]) -> Result<(), AgentError> {
        self.writes.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn persist(&self, _run_id: &str, _records: &[StepRecord]) -> Result<(), AgentError> {
        Err(AgentError::Persistence("disk full".into()))
    }
}

pub fn reply(action: &str, selector: Option<&str>, value: Option<&str>) -> String {
    serde_json::json!({
        "thought": "test",
        "action": action,
        "selector": selector,
        "value": value,
    })
    .to_string()
}
