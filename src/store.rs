use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::info;

use crate::action::{Action, Outcome};
use crate::error::AgentError;
use crate::scraper::ScrapedItem;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub action: Action,
    pub outcome: Outcome,
    /// Items scraped by this step; empty for non-scrape actions.
    pub data: Vec<ScrapedItem>,
}

impl StepRecord {
    /// One-line form fed back to the planner.
    pub fn history_line(&self) -> String {
        let result = match &self.outcome {
            Outcome::Succeeded => "ok".to_string(),
            Outcome::Failed { reason } => format!("failed: {reason}"),
        };
        let mut line = format!("step {}: {} -> {}", self.step, self.action.describe(), result);
        if matches!(self.action, Action::Scrape { .. }) && self.outcome.is_success() {
            line.push_str(&format!(" ({} items)", self.data.len()));
            if self.data.is_empty() {
                line.push_str(". WARNING: scraped 0 items, try a different approach");
            }
        }
        line
    }
}

/// Append-only, ordered log of executed steps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultStore {
    records: Vec<StepRecord>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next step; its index is the current length.
    pub fn record(&mut self, action: Action, outcome: Outcome, data: Vec<ScrapedItem>) -> &StepRecord {
        let step = self.records.len();
        self.records.push(StepRecord { step, action, outcome, data });
        &self.records[step]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[StepRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn scraped_items(&self) -> usize {
        self.records.iter().map(|r| r.data.len()).sum()
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }
}

/// Durable destination for a finished run's records. Written once, at termination.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, run_id: &str, records: &[StepRecord]) -> Result<(), AgentError>;
}

pub struct NullSink;

#[async_trait]
impl ResultSink for NullSink {
    async fn persist(&self, _run_id: &str, _records: &[StepRecord]) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Writes the records as a pretty-printed JSON array.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist(&self, run_id: &str, records: &[StepRecord]) -> Result<(), AgentError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            async_fs::create_dir_all(dir)
                .await
                .map_err(|e| AgentError::Persistence(format!("create_dir: {}", e)))?;
        }
        let body = serde_json::to_vec_pretty(records)
            .map_err(|e| AgentError::Persistence(format!("encode: {}", e)))?;
        async_fs::write(&self.path, body)
            .await
            .map_err(|e| AgentError::Persistence(format!("write: {}", e)))?;
        info!(run_id, path = %self.path.display(), records = records.len(), "results saved");
        Ok(())
    }
}
