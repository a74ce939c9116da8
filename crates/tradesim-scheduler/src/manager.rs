use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::info;
use tradesim_ledger::{LedgerError, LedgerStore};
use tradesim_models::job::{Job, JobProgress, JobStatus, JobStatusView, ModelDay, Task};
use uuid::Uuid;

use crate::error::SchedulerError;

pub const INTERRUPTED_REASON: &str = "Interrupted by restart";

/// A request to simulate a set of model-days.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub models: Vec<String>,
    /// Explicit model-days to run instead of `models × [start_date, end_date]`.
    pub model_days: Option<Vec<ModelDay>>,
    /// Leave already-completed model-days out of the job. When false they are
    /// scheduled and the worker reports them as skipped.
    pub skip_completed: bool,
}

impl JobRequest {
    pub fn range(start_date: NaiveDate, end_date: NaiveDate, models: Vec<String>) -> Self {
        Self {
            start_date,
            end_date,
            models,
            model_days: None,
            skip_completed: true,
        }
    }

    /// Request exactly these model-days. Dates span the earliest to the latest given.
    pub fn model_days(model_days: Vec<ModelDay>) -> Self {
        let start_date = model_days.iter().map(|md| md.date).min().unwrap_or_default();
        let end_date = model_days.iter().map(|md| md.date).max().unwrap_or_default();
        let models = model_days
            .iter()
            .map(|md| md.model.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            start_date,
            end_date,
            models,
            model_days: Some(model_days),
            skip_completed: true,
        }
    }

    pub fn keep_completed(mut self) -> Self {
        self.skip_completed = false;
        self
    }
}

/// Outcome of `JobManager::create_job`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobCreation {
    Created { job_id: String, warnings: Vec<String> },
    /// Every requested model-day was already completed. No job was created.
    AllCompleted { warnings: Vec<String> },
}

/// Every calendar date in `[start, end]`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Creates jobs and answers job and task queries. All state lives in the ledger store.
pub struct JobManager {
    store: Arc<LedgerStore>,
    config_path: String,
    max_simulation_days: u32,
}

impl JobManager {
    pub fn new(store: Arc<LedgerStore>, config_path: impl Into<String>, max_simulation_days: u32) -> Self {
        Self {
            store,
            config_path: config_path.into(),
            max_simulation_days,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Validate a request and persist a pending job with one task per model-day that
    /// has not already been completed.
    ///
    /// `today` bounds the requested dates; no date may be in the future.
    pub fn create_job(
        &self,
        request: &JobRequest,
        today: NaiveDate,
    ) -> Result<JobCreation, SchedulerError> {
        let candidates = self.validate(request, today)?;

        if let Some(active) = self.store.find_active_job()? {
            return Err(SchedulerError::JobAlreadyActive {
                job_id: active.job_id,
            });
        }

        let mut warnings = Vec::new();
        let mut tasks = Vec::with_capacity(candidates.len());
        for model_day in candidates {
            if request.skip_completed
                && self
                    .store
                    .is_model_day_completed(&model_day.model, model_day.date, None)?
            {
                warnings.push(format!(
                    "Skipped {}/{} — already completed",
                    model_day.model, model_day.date
                ));
            } else {
                tasks.push(model_day);
            }
        }

        if tasks.is_empty() {
            info!(skipped = warnings.len(), "All requested model-days already completed");
            return Ok(JobCreation::AllCompleted { warnings });
        }

        let dates: BTreeSet<NaiveDate> = tasks.iter().map(|t| t.date).collect();
        let models: BTreeSet<&str> = tasks.iter().map(|t| t.model.as_str()).collect();
        let job = Job {
            job_id: Uuid::new_v4().to_string(),
            config_path: self.config_path.clone(),
            status: JobStatus::Pending,
            date_range: dates.into_iter().collect(),
            models: request
                .models
                .iter()
                .filter(|m| models.contains(m.as_str()))
                .cloned()
                .collect(),
            created_at: Utc::now(),
            started_at: None,
            updated_at: None,
            completed_at: None,
            total_duration_seconds: None,
            error: None,
            warnings: warnings.clone(),
        };

        match self.store.insert_job_with_tasks(&job, &tasks) {
            Ok(()) => {}
            Err(LedgerError::ActiveJob(job_id)) => {
                return Err(SchedulerError::JobAlreadyActive { job_id })
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            job_id = %job.job_id,
            tasks = tasks.len(),
            skipped = warnings.len(),
            "Job created"
        );
        Ok(JobCreation::Created {
            job_id: job.job_id,
            warnings,
        })
    }

    /// Check the request and expand it into sorted, de-duplicated model-days.
    fn validate(&self, request: &JobRequest, today: NaiveDate) -> Result<Vec<ModelDay>, SchedulerError> {
        let mut seen = BTreeSet::new();
        let models: Vec<&String> = request
            .models
            .iter()
            .filter(|m| seen.insert(m.as_str()))
            .collect();

        if models.is_empty() || models.iter().any(|m| m.trim().is_empty()) {
            return Err(SchedulerError::Validation(
                "at least one non-empty model is required".to_string(),
            ));
        }
        if request.start_date > request.end_date {
            return Err(SchedulerError::Validation(format!(
                "start date {} is after end date {}",
                request.start_date, request.end_date
            )));
        }
        if request.end_date > today {
            return Err(SchedulerError::Validation(format!(
                "date {} is in the future (today is {today})",
                request.end_date
            )));
        }
        let span = (request.end_date - request.start_date).num_days() + 1;
        if span > i64::from(self.max_simulation_days) {
            return Err(SchedulerError::Validation(format!(
                "date range spans {span} days, maximum is {}",
                self.max_simulation_days
            )));
        }

        let candidates: BTreeSet<ModelDay> = match &request.model_days {
            Some(model_days) => {
                if model_days.is_empty() {
                    return Err(SchedulerError::Validation(
                        "explicit model-day list is empty".to_string(),
                    ));
                }
                model_days.iter().cloned().collect()
            }
            None => date_range(request.start_date, request.end_date)
                .into_iter()
                .flat_map(|date| models.iter().map(move |m| ModelDay::new(m.as_str(), date)))
                .collect(),
        };
        Ok(candidates.into_iter().collect())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job, SchedulerError> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    pub fn get_job_tasks(&self, job_id: &str) -> Result<Vec<Task>, SchedulerError> {
        self.get_job(job_id)?;
        Ok(self.store.get_tasks(job_id)?)
    }

    pub fn get_progress(&self, job_id: &str) -> Result<JobProgress, SchedulerError> {
        Ok(self.store.job_progress(job_id)?)
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatusView, SchedulerError> {
        let job = self.get_job(job_id)?;
        let progress = self.store.job_progress(job_id)?;
        Ok(JobStatusView::new(job, progress))
    }

    /// The non-terminal job, if any.
    pub fn get_current_job(&self) -> Result<Option<Job>, SchedulerError> {
        Ok(self.store.find_active_job()?)
    }

    /// Oldest job still waiting for a worker.
    pub fn find_pending_job(&self) -> Result<Option<Job>, SchedulerError> {
        Ok(self.store.find_oldest_pending_job()?)
    }

    pub fn list_jobs(&self, limit: u32) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.store.list_jobs(limit)?)
    }

    /// Apply the completion rule and persist the job's terminal status.
    ///
    /// Returns `None` while tasks are still pending or running.
    pub fn finalize_job(&self, job_id: &str, error: Option<&str>) -> Result<Option<JobStatus>, SchedulerError> {
        let job = self.get_job(job_id)?;
        let progress = self.store.job_progress(job_id)?;
        let Some(mut status) = progress.final_status() else {
            return Ok(None);
        };
        if !job.status.can_transition_to(status) {
            status = JobStatus::Failed;
        }
        self.store.update_job_status(job_id, status, error)?;
        info!(
            job_id,
            status = %status,
            completed = progress.completed,
            failed = progress.failed,
            skipped = progress.skipped,
            "Job finished"
        );
        Ok(Some(status))
    }

    /// Resolve jobs a previous process started but never finished.
    ///
    /// Unfinished tasks fail with "Interrupted by restart" and the job is finalized by
    /// the completion rule. Pending jobs were never started and stay queued. Returns the
    /// recovered job ids.
    pub fn recover_interrupted_jobs(&self) -> Result<Vec<String>, SchedulerError> {
        let mut recovered = Vec::new();
        for job in self.store.find_started_jobs()? {
            let failed = self
                .store
                .fail_unfinished_tasks(&job.job_id, INTERRUPTED_REASON)?;
            tracing::warn!(job_id = %job.job_id, failed, "Recovering interrupted job");
            if self.finalize_job(&job.job_id, Some(INTERRUPTED_REASON))?.is_none() {
                self.store
                    .update_job_status(&job.job_id, JobStatus::Failed, Some(INTERRUPTED_REASON))?;
            }
            recovered.push(job.job_id);
        }
        Ok(recovered)
    }
}
