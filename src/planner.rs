//! Turns a simplified page into exactly one validated [`Action`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{Action, Locator, ScrollDirection};
use crate::agent::{Goal, Reasoner};
use crate::dom::truncate_chars;
use crate::error::{PlanningError, ReasonerError};
use crate::simplify::SimplifiedPage;
use crate::store::StepRecord;

pub const UNRESOLVABLE_PLAN: &str = "unresolvable plan";

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Attempts per request against an unavailable or rate-limited service.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
    /// How many recent steps the service sees.
    pub history_window: usize,
    pub max_prompt_chars: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            request_timeout: Duration::from_secs(60),
            history_window: 8,
            max_prompt_chars: 30_000,
        }
    }
}

/// Notice attached to a re-prompt after an unusable reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    InvalidReference { locator: Locator },
    Format { problem: String },
}

impl Correction {
    fn notice(&self) -> String {
        match self {
            Correction::InvalidReference { locator } => format!(
                "Your previous reply used the locator `{locator}`, which is not on this page. \
                 Pick a locator from the INTERACTIVE ELEMENTS list exactly as written, or reply with scrape or finish."
            ),
            Correction::Format { problem } => format!(
                "Your previous reply could not be parsed ({problem}). \
                 Reply with ONLY the JSON object: no Markdown fences, no commentary."
            ),
        }
    }
}

/// Everything the reasoning service sees for one decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningRequest {
    pub goal: String,
    pub url: String,
    pub page: String,
    pub history: Vec<String>,
    /// Notices from earlier replies in this planning round, oldest first.
    pub corrections: Vec<Correction>,
}

impl PlanningRequest {
    pub fn prompt(&self) -> String {
        let mut p = String::new();
        p.push_str("You are a web automation agent working toward a goal on a live website.\n\n");
        let _ = writeln!(p, "GOAL: {}\n", self.goal);
        p.push_str("PAST ACTIONS:\n");
        if self.history.is_empty() {
            p.push_str("(none yet)\n");
        }
        for line in &self.history {
            let _ = writeln!(p, "- {line}");
        }
        let _ = writeln!(p, "\nCURRENT PAGE:\n{}", self.page);
        p.push_str(
            "Decide the single next step toward the goal. Reply with exactly one JSON object:\n\
             {\"thought\": \"<short reasoning>\", \"action\": \"click\" | \"type\" | \"scroll\" | \"scrape\" | \"finish\", \
             \"selector\": \"<locator copied from the list>\", \
             \"value\": \"<text to type | up or down for scroll | finish to stop after scraping | reason when finishing>\"}\n\n\
             RULES:\n\
             1. Only use locators listed under INTERACTIVE ELEMENTS, copied exactly.\n\
             2. scrape collects every visible record on the page with its link. Once the results the goal asks for are visible, scrape them rather than filtering further.\n\
             3. Use finish when the goal is achieved or cannot be achieved.\n",
        );
        for correction in &self.corrections {
            let _ = write!(p, "\nCORRECTION: {}\n", correction.notice());
        }
        p
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    thought: Option<String>,
    action: String,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

/// Parse a free-form service reply into the closed action set.
pub fn parse_reply(raw: &str) -> Result<Action, PlanningError> {
    let body = json_object(raw)
        .ok_or_else(|| PlanningError::Unparseable("no JSON object in response".into()))?;
    let reply: Reply =
        serde_json::from_str(body).map_err(|e| PlanningError::Unparseable(e.to_string()))?;

    let value = match reply.value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    let selector = reply
        .selector
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let need_selector = |kind: &str| {
        selector
            .clone()
            .map(Locator::new)
            .ok_or_else(|| PlanningError::Unparseable(format!("{kind} without a selector")))
    };

    let action = match reply.action.trim().to_ascii_lowercase().as_str() {
        "click" => Action::Click { target: need_selector("click")? },
        "type" | "fill" => {
            let into = need_selector("type")?;
            let text = value.ok_or_else(|| PlanningError::Unparseable("type without a value".into()))?;
            Action::Type { into, text }
        }
        "scroll" => {
            let up = value.as_deref().is_some_and(|v| v.trim().eq_ignore_ascii_case("up"));
            Action::Scroll {
                direction: if up { ScrollDirection::Up } else { ScrollDirection::Down },
            }
        }
        "scrape" => Action::Scrape {
            finish_after: value.as_deref().is_some_and(|v| v.trim().eq_ignore_ascii_case("finish")),
        },
        "finish" | "done" => Action::Finish {
            reason: value
                .or(reply.thought)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "goal reached".to_string()),
        },
        other => return Err(PlanningError::Unparseable(format!("unknown action {other:?}"))),
    };
    Ok(action)
}

/// Slice out the outermost `{...}`, tolerating fences and surrounding prose.
fn json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub struct ActionPlanner<R> {
    reasoner: R,
    cfg: PlannerConfig,
}

impl<R: Reasoner> ActionPlanner<R> {
    pub fn new(reasoner: R, cfg: PlannerConfig) -> Self {
        Self { reasoner, cfg }
    }

    pub fn reasoner(&self) -> &R {
        &self.reasoner
    }

    /// Ask for the next action against `page`.
    ///
    /// An unparseable reply gets one re-prompt with a stricter format notice; a
    /// reply naming a locator absent from `page` gets one re-prompt with a
    /// correction, after which the plan degrades to
    /// `Finish("unresolvable plan")`. Service outages are retried with
    /// exponential backoff and then surface as fatal.
    pub async fn plan(
        &self,
        goal: &Goal,
        page: &SimplifiedPage,
        history: &[StepRecord],
        notes: &[String],
    ) -> Result<Action, PlanningError> {
        let window = &history[history.len().saturating_sub(self.cfg.history_window)..];
        let mut lines: Vec<String> = window.iter().map(StepRecord::history_line).collect();
        lines.extend(notes.iter().cloned());

        let mut request = PlanningRequest {
            goal: goal.task().to_string(),
            url: page.url.clone(),
            page: truncate_chars(&page.render(), self.cfg.max_prompt_chars),
            history: lines,
            corrections: Vec::new(),
        };
        let mut format_corrected = false;
        let mut reference_corrected = false;

        loop {
            let raw = self.request_with_retry(&request).await?;
            debug!(reply = %raw, "reasoning service replied");

            let action = match parse_reply(&raw) {
                Ok(action) => action,
                Err(err) if !format_corrected => {
                    warn!(error = %err, "unparseable plan, re-prompting with format notice");
                    format_corrected = true;
                    request.corrections.push(Correction::Format { problem: err.to_string() });
                    continue;
                }
                Err(err) => return Err(err),
            };

            match page.validate(&action) {
                Ok(()) => {
                    info!(action = ?action, "planned");
                    return Ok(action);
                }
                Err(PlanningError::InvalidReference(locator)) if !reference_corrected => {
                    warn!(locator = %locator, "plan references an absent locator, re-prompting");
                    reference_corrected = true;
                    request.corrections.push(Correction::InvalidReference { locator });
                }
                Err(err) => {
                    warn!(error = %err, "plan still invalid after correction, finishing");
                    return Ok(Action::Finish { reason: UNRESOLVABLE_PLAN.to_string() });
                }
            }
        }
    }

    async fn request_with_retry(&self, request: &PlanningRequest) -> Result<String, PlanningError> {
        let attempts = self.cfg.max_attempts.max(1);
        let mut delay = self.cfg.initial_backoff;
        let mut last = String::new();

        for attempt in 1..=attempts {
            let mut wait = delay;
            match tokio::time::timeout(self.cfg.request_timeout, self.reasoner.complete(request)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) => {
                    if let ReasonerError::RateLimited { retry_after: Some(after) } = &err {
                        wait = wait.max(*after).min(self.cfg.max_backoff);
                    }
                    last = err.to_string();
                }
                Err(_) => last = format!("timed out after {:?}", self.cfg.request_timeout),
            }
            if attempt < attempts {
                warn!(attempt, error = %last, backoff = ?wait, "reasoning service call failed");
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(self.cfg.max_backoff);
            }
        }
        Err(PlanningError::ServiceUnavailable { attempts, last })
    }
}
