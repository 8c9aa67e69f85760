use std::time::Duration;
use thiserror::Error;

use crate::action::Locator;

/// Failures reported by the browser driver.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputerError {
    #[error("no element matches {0}")]
    NotFound(Locator),
    #[error("page is busy (navigation in progress)")]
    PageBusy,
    #[error("interaction rejected: {0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("driver error: {0}")]
    Driver(String),
}

/// Failures reported by the reasoning service. Both are retryable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReasonerError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimplificationError {
    #[error("page unreadable: {0}")]
    PageUnavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanningError {
    #[error("service unavailable after {attempts} attempts: {last}")]
    ServiceUnavailable { attempts: u32, last: String },
    #[error("invalid reference: {0}")]
    InvalidReference(Locator),
    #[error("unparseable response: {0}")]
    Unparseable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("stale locator {0}")]
    StaleLocator(Locator),
    #[error("interaction rejected by the page: {0}")]
    Rejected(String),
}

impl From<ComputerError> for ExecutionError {
    fn from(err: ComputerError) -> Self {
        match err {
            ComputerError::NotFound(locator) => ExecutionError::StaleLocator(locator),
            other => ExecutionError::Rejected(other.to_string()),
        }
    }
}

/// Errors that keep a run from starting at all.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("computer error: {0}")]
    Computer(#[from] ComputerError),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_element_becomes_stale_locator() {
        let err: ExecutionError = ComputerError::NotFound(Locator::new("#gone")).into();
        assert_eq!(err, ExecutionError::StaleLocator(Locator::new("#gone")));
        assert_eq!(err.to_string(), "stale locator #gone");
    }

    #[test]
    fn other_driver_failures_are_rejections() {
        let err: ExecutionError = ComputerError::Rejected("element is disabled".into()).into();
        assert!(matches!(err, ExecutionError::Rejected(msg) if msg.contains("disabled")));
    }
}
