use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::manager::JobManager;
use crate::worker::SimulationWorker;

/// Long-running worker loop. Picks up pending jobs one at a time.
///
/// Cancellation is observed between jobs only; a running job always reaches a
/// terminal status first.
pub struct WorkerDaemon {
    manager: Arc<JobManager>,
    worker: Arc<SimulationWorker>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl WorkerDaemon {
    pub fn new(
        manager: Arc<JobManager>,
        worker: Arc<SimulationWorker>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            manager,
            worker,
            poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. Returns how many jobs were processed.
    pub async fn run(&self) -> Result<usize, SchedulerError> {
        tracing::info!(poll_seconds = self.poll_interval.as_secs(), "Worker daemon starting");

        let recovered = self.manager.recover_interrupted_jobs()?;
        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "Recovered interrupted jobs");
        }

        let mut processed = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.run_next().await {
                processed += 1;
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!(processed, "Worker daemon stopped");
        Ok(processed)
    }

    /// Run the oldest pending job, if any. Returns true when a job ran to a terminal
    /// status, so the loop can look for the next one without waiting.
    async fn run_next(&self) -> bool {
        let job = match self.manager.find_pending_job() {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to look up pending jobs");
                return false;
            }
        };

        match self.worker.run_job(&job.job_id).await {
            Ok(status) => {
                tracing::info!(job_id = %job.job_id, status = %status, "Job processed");
                true
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Job processing failed");
                false
            }
        }
    }
}
