use std::time::Duration;
use tracing::{debug, warn};

use crate::action::{Action, Outcome};
use crate::agent::Computer;
use crate::error::{ComputerError, ExecutionError};

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Upper bound for one click/type/scroll.
    pub action_timeout: Duration,
    /// Upper bound for the post-action wait for an idle page.
    pub settle_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(10),
            settle_timeout: Duration::from_secs(5),
        }
    }
}

/// Performs one action against the live page. Failures become outcomes, never errors.
pub struct ActionExecutor {
    cfg: ExecutorConfig,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ActionExecutor {
    pub fn new(cfg: ExecutorConfig) -> Self {
        Self { cfg }
    }

    pub async fn execute<C>(&self, computer: &C, action: &Action) -> Outcome
    where
        C: Computer + ?Sized,
    {
        match self.try_execute(computer, action).await {
            Ok(()) => Outcome::Succeeded,
            Err(err) => {
                warn!(action = ?action, error = %err, "action failed");
                Outcome::failed(err.to_string())
            }
        }
    }

    async fn try_execute<C>(&self, computer: &C, action: &Action) -> Result<(), ExecutionError>
    where
        C: Computer + ?Sized,
    {
        // Locators are resolved by the driver now, against the page as it is.
        let op = async {
            let done = match action {
                Action::Click { target } => computer.click(target).await,
                Action::Type { into, text } => computer.type_text(into, text).await,
                Action::Scroll { direction } => computer.scroll(direction.delta()).await,
                // No browser operation: scraping reads the page, finishing stops the run.
                Action::Scrape { .. } | Action::Finish { .. } => return Ok(false),
            };
            done.map(|_| true)
        };
        let interacted = tokio::time::timeout(self.cfg.action_timeout, op)
            .await
            .map_err(|_| ComputerError::Timeout(self.cfg.action_timeout))??;

        if interacted {
            self.settle(computer).await;
        }
        Ok(())
    }

    /// Bounded wait for the page to go idle; a page that never settles is not a failure.
    async fn settle<C>(&self, computer: &C)
    where
        C: Computer + ?Sized,
    {
        let limit = self.cfg.settle_timeout;
        match tokio::time::timeout(limit, computer.wait_for_stable(limit)).await {
            Ok(Ok(())) => debug!("page settled"),
            Ok(Err(err)) => warn!(error = %err, "page did not settle"),
            Err(_) => warn!(timeout = ?limit, "page did not settle in time"),
        }
    }
}
