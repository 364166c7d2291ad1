//! Batch executor.
//!
//! Steps run strictly in order through the regular command paths with
//! capture suppressed. The first failing step stops the run; completed
//! steps are kept as executed. One snapshot is taken at the end from
//! whichever target is active by then.

use std::time::Duration;

use tabpilot_protocols::{
    AgentResponse, BatchOperation, BatchStepReport, PilotError, ResponseStatus, Result,
};
use tracing::{debug, info, warn};

use crate::coordinator::{CaptureMode, Coordinator, Freshness, TabOutcome};

fn step_report(index: usize, operation: &BatchOperation, response: &AgentResponse) -> BatchStepReport {
    BatchStepReport {
        index,
        name: operation.name.clone(),
        status: response.status,
        message: response.message.clone(),
        error_kind: response.error_kind,
        current_url: response.current_url.clone(),
        navigation_occurred: response.navigation_occurred,
        new_tab_opened: response.new_tab_opened,
        new_tab_id: response.new_tab_id.clone(),
    }
}

fn failed_step(index: usize, operation: &BatchOperation, error: &PilotError) -> BatchStepReport {
    BatchStepReport {
        index,
        name: operation.name.clone(),
        status: ResponseStatus::Error,
        message: Some(error.to_string()),
        error_kind: Some(error.kind()),
        ..Default::default()
    }
}

impl Coordinator {
    pub(crate) async fn run_batch(&self, operations: &[BatchOperation], interval: Duration) -> Result<AgentResponse> {
        if operations.is_empty() {
            return Err(PilotError::InvalidParameter("batch has no operations".to_string()));
        }

        let mut steps = Vec::with_capacity(operations.len());
        let mut failure: Option<(usize, PilotError)> = None;

        for (index, operation) in operations.iter().enumerate() {
            // Steps are parsed only when reached.
            let outcome = match operation.to_command() {
                Ok(command) => self.dispatch(&command, true).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    debug!(step = index, operation = %operation.name, status = ?response.status, "batch step done");
                    steps.push(step_report(index, operation, &response));
                }
                Err(e) => {
                    warn!(step = index, operation = %operation.name, "batch step failed: {}", e);
                    self.reset_busy();
                    steps.push(failed_step(index, operation, &e));
                    failure = Some((index, e));
                    break;
                }
            }

            if index + 1 < operations.len() {
                tokio::time::sleep(interval).await;
            }
        }

        let snapshot = self.final_snapshot().await;

        let mut response = match &failure {
            Some((index, e)) => {
                let name = &operations[*index].name;
                AgentResponse::error("batch", e)
                    .with_message(format!("step {index} ({name}) failed: {e}"))
            }
            None => AgentResponse::success("batch")
                .with_message(format!("{} operation(s) completed", steps.len())),
        };
        if let Some(outcome) = snapshot {
            response.current_url = Some(outcome.url);
            response.screenshot = outcome.screenshot;
            response.tab_id = Some(outcome.target_id);
        }
        info!(steps = steps.len(), failed = failure.is_some(), "batch finished");
        response.steps = Some(steps);
        Ok(response)
    }

    /// Best effort: re-resolve the active target and capture it once.
    async fn final_snapshot(&self) -> Option<TabOutcome> {
        let target = match self.ensure_active(false).await {
            Ok(target) => target,
            Err(e) => {
                debug!("no target for the final batch snapshot: {}", e);
                return None;
            }
        };
        self.begin(&target).await;
        match self
            .process_tab_core(&target, Freshness::Existing, CaptureMode::Full, false)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(target_id = %target, "final batch snapshot failed: {}", e);
                self.reset_busy();
                None
            }
        }
    }
}
