use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tradesim_ledger::{LedgerError, LedgerStore};
use tradesim_models::job::{Job, JobStatus, TaskStatus};

use crate::error::SchedulerError;
use crate::executor::TaskExecutor;
use crate::manager::JobManager;
use crate::market::MarketDataProvider;

pub const SKIP_NO_PRICES: &str = "Incomplete price data";
pub const SKIP_ALREADY_COMPLETED: &str = "Already completed";

/// Runs a job: data preparation, skip attribution, sequential task execution.
pub struct SimulationWorker {
    manager: Arc<JobManager>,
    market: Arc<dyn MarketDataProvider>,
    executor: TaskExecutor,
}

impl SimulationWorker {
    pub fn new(
        manager: Arc<JobManager>,
        market: Arc<dyn MarketDataProvider>,
        executor: TaskExecutor,
    ) -> Self {
        Self {
            manager,
            market,
            executor,
        }
    }

    fn store(&self) -> &LedgerStore {
        self.manager.store()
    }

    /// Run `job_id` on a background task.
    pub fn spawn(self: &Arc<Self>, job_id: String) -> JoinHandle<Result<JobStatus, SchedulerError>> {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.run_job(&job_id).await })
    }

    /// Run a pending job to a terminal status.
    ///
    /// Task failures are recorded per task. Any other error fails the job and every
    /// task that has not finished yet.
    pub async fn run_job(&self, job_id: &str) -> Result<JobStatus, SchedulerError> {
        let job = self.manager.get_job(job_id)?;
        self.claim(&job)?;
        info!(job_id, dates = job.date_range.len(), models = job.models.len(), "Job starting");

        match self.process(&job).await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!(job_id, error = %e, "Job failed");
                let reason = e.to_string();
                if let Err(cleanup) = self.fail_job(job_id, &reason) {
                    error!(job_id, error = %cleanup, "Could not mark job failed");
                }
                Err(e)
            }
        }
    }

    /// Take ownership of a pending job. Failing here leaves the job untouched.
    fn claim(&self, job: &Job) -> Result<(), SchedulerError> {
        match self.store().claim_job(&job.job_id) {
            Ok(()) => Ok(()),
            Err(LedgerError::InvalidTransition { from, .. }) => {
                warn!(job_id = %job.job_id, status = %from, "Job already claimed");
                Err(SchedulerError::JobNotPending {
                    job_id: job.job_id.clone(),
                    status: from,
                })
            }
            Err(LedgerError::NotFound(_)) => Err(SchedulerError::JobNotFound(job.job_id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn fail_job(&self, job_id: &str, reason: &str) -> Result<(), SchedulerError> {
        self.store().fail_unfinished_tasks(job_id, reason)?;
        self.store()
            .update_job_status(job_id, JobStatus::Failed, Some(reason))?;
        Ok(())
    }

    async fn process(&self, job: &Job) -> Result<JobStatus, SchedulerError> {
        let job_id = job.job_id.as_str();
        let store = self.store();

        let mut warnings = Vec::new();
        let unavailable = self.prepare_data(&job.date_range, &mut warnings).await?;

        let mut skipped_dates = BTreeSet::new();
        for task in store.get_tasks_with_status(job_id, TaskStatus::Pending)? {
            if unavailable.contains(&task.date) {
                store.update_task_status(
                    job_id,
                    task.date,
                    &task.model,
                    TaskStatus::Skipped,
                    Some(SKIP_NO_PRICES),
                )?;
                skipped_dates.insert(task.date);
            } else if store.is_model_day_completed(&task.model, task.date, Some(job_id))? {
                info!(job_id, model = %task.model, date = %task.date, "Skipping completed model-day");
                store.update_task_status(
                    job_id,
                    task.date,
                    &task.model,
                    TaskStatus::Skipped,
                    Some(SKIP_ALREADY_COMPLETED),
                )?;
            }
        }
        if !skipped_dates.is_empty() {
            let dates: Vec<String> = skipped_dates.iter().map(NaiveDate::to_string).collect();
            info!(job_id, dates = %dates.join(","), "Skipping dates without price data");
            warnings.push(format!(
                "Skipped {} date(s) with incomplete price data: {}",
                dates.len(),
                dates.join(", ")
            ));
        }
        if !warnings.is_empty() {
            store.append_job_warnings(job_id, &warnings)?;
        }

        let pending = store.get_tasks_with_status(job_id, TaskStatus::Pending)?;
        if !pending.is_empty() {
            store.update_job_status(job_id, JobStatus::Running, None)?;
        }
        for task in pending {
            store.update_task_status(job_id, task.date, &task.model, TaskStatus::Running, None)?;
            match self.executor.execute(job_id, task.date, &task.model).await {
                Ok(_) => {
                    store.update_task_status(
                        job_id,
                        task.date,
                        &task.model,
                        TaskStatus::Completed,
                        None,
                    )?;
                }
                Err(e) => {
                    warn!(job_id, model = %task.model, date = %task.date, error = %e, "Task failed");
                    store.update_task_status(
                        job_id,
                        task.date,
                        &task.model,
                        TaskStatus::Failed,
                        Some(&e.to_string()),
                    )?;
                }
            }
        }

        let progress = store.job_progress(job_id)?;
        let error = (progress.completed == 0 && progress.failed > 0)
            .then(|| format!("All {} task(s) failed", progress.failed));
        match self.manager.finalize_job(job_id, error.as_deref())? {
            Some(status) => Ok(status),
            None => Err(SchedulerError::Validation(format!(
                "job {job_id} still has unfinished tasks"
            ))),
        }
    }

    /// Make sure prices exist for as many dates as possible. Returns dates that remain
    /// without complete data.
    async fn prepare_data(
        &self,
        dates: &[NaiveDate],
        warnings: &mut Vec<String>,
    ) -> Result<BTreeSet<NaiveDate>, SchedulerError> {
        let available = self.market.available_dates(dates).await?;
        let mut missing: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| !available.contains(d))
            .collect();
        if missing.is_empty() {
            return Ok(BTreeSet::new());
        }
        missing.sort();

        info!(missing = missing.len(), "Fetching missing price data");
        let symbols = self.market.symbols().to_vec();
        let outcome = self.market.fetch_missing(&symbols, &missing).await?;
        if outcome.is_rate_limited() {
            warnings.push(format!(
                "Rate limited while fetching price data: {} symbol(s) not downloaded",
                outcome.rate_limited.len()
            ));
        }
        if !outcome.failed.is_empty() {
            for (symbol, reason) in &outcome.failed {
                warn!(symbol = %symbol, reason = %reason, "No price data fetched");
            }
            let symbols: Vec<&str> = outcome.failed.iter().map(|(s, _)| s.as_str()).collect();
            warnings.push(format!(
                "Failed to fetch price data for {} symbol(s): {}",
                symbols.len(),
                symbols.join(", ")
            ));
        }

        let now_available = self.market.available_dates(&missing).await?;
        Ok(missing
            .into_iter()
            .filter(|d| !now_available.contains(d))
            .collect())
    }
}
