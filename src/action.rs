use serde::{Deserialize, Serialize};
use std::fmt;

/// CSS selector that re-finds one interactive element on the live page.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// Vertical pixel delta for one scroll step.
    pub fn delta(self) -> i64 {
        match self {
            ScrollDirection::Up => -600,
            ScrollDirection::Down => 600,
        }
    }
}

/// The closed set of moves the planner may choose.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { target: Locator },
    Type { into: Locator, text: String },
    Scroll { direction: ScrollDirection },
    Scrape { finish_after: bool },
    Finish { reason: String },
}

impl Action {
    /// Locator the action acts on, if any.
    pub fn target(&self) -> Option<&Locator> {
        match self {
            Action::Click { target } => Some(target),
            Action::Type { into, .. } => Some(into),
            Action::Scroll { .. } | Action::Scrape { .. } | Action::Finish { .. } => None,
        }
    }

    /// Short one-line description used in planner history and logs.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { target } => format!("click {target}"),
            Action::Type { into, text } => format!("typed {text:?} into {into}"),
            Action::Scroll { direction } => match direction {
                ScrollDirection::Up => "scroll up".to_string(),
                ScrollDirection::Down => "scroll down".to_string(),
            },
            Action::Scrape { finish_after: true } => "scrape then finish".to_string(),
            Action::Scrape { finish_after: false } => "scrape".to_string(),
            Action::Finish { reason } => format!("finish ({reason})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { reason: String },
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Outcome::Failed { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}
