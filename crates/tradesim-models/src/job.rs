use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a simulation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    DownloadingData,
    Running,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    pub const NON_TERMINAL: [JobStatus; 3] = [
        JobStatus::Pending,
        JobStatus::DownloadingData,
        JobStatus::Running,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::DownloadingData => "downloading_data",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        )
    }

    /// Whether the worker may move a job from `self` to `next`.
    ///
    /// Any non-terminal job may fail outright; otherwise jobs only move forward
    /// through data preparation and execution.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, DownloadingData) => true,
            (Pending, Running) | (DownloadingData, Running) => true,
            (Running, Completed) | (Running, Partial) => true,
            // All tasks may be skipped during preparation.
            (DownloadingData, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "downloading_data" => Ok(JobStatus::DownloadingData),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Lifecycle of one (job, date, model) task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "skipped" => Ok(TaskStatus::Skipped),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A (model, date) pair: the unit of scheduled work independent of any job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelDay {
    pub date: NaiveDate,
    pub model: String,
}

impl ModelDay {
    pub fn new(model: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            date,
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.date)
    }
}

/// One orchestration request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub config_path: String,
    pub status: JobStatus,
    pub date_range: Vec<NaiveDate>,
    pub models: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_seconds: Option<f64>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

/// One (job_id, date, model) unit of work. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub job_id: String,
    pub date: NaiveDate,
    pub model: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    /// Failure message when failed, skip cause when skipped.
    pub error: Option<String>,
}

impl Task {
    pub fn model_day(&self) -> ModelDay {
        ModelDay::new(self.model.clone(), self.date)
    }
}

/// Task counts per status for one job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl JobProgress {
    pub fn record(&mut self, status: TaskStatus, count: u32) {
        self.total += count;
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Skipped => self.skipped += count,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.failed + self.skipped == self.total
    }

    /// Terminal job status derived from task counts, or `None` while work remains.
    ///
    /// Skipped tasks count toward completion but never toward success or failure.
    pub fn final_status(&self) -> Option<JobStatus> {
        if !self.is_finished() {
            return None;
        }
        Some(if self.failed == 0 {
            JobStatus::Completed
        } else if self.completed > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        })
    }
}

/// Status query response: the job plus its task counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub date_range: Vec<NaiveDate>,
    pub models: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusView {
    pub fn new(job: Job, progress: JobProgress) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            progress,
            date_range: job.date_range,
            models: job.models,
            warnings: job.warnings,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}
