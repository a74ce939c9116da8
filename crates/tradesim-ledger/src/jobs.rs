use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tradesim_models::job::{Job, JobProgress, JobStatus, ModelDay, Task, TaskStatus};

use crate::codec::{get_json, get_parsed};
use crate::error::LedgerError;
use crate::store::LedgerStore;

const JOB_COLUMNS: &str = "job_id, config_path, status, date_range, models, created_at, \
     started_at, updated_at, completed_at, total_duration_seconds, error, warnings";

const TASK_COLUMNS: &str =
    "job_id, date, model, status, started_at, completed_at, duration_seconds, error";

const ACTIVE_STATUSES: &str = "('pending', 'downloading_data', 'running')";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        job_id: row.get(0)?,
        config_path: row.get(1)?,
        status: get_parsed(row, 2)?,
        date_range: get_json(row, 3)?,
        models: get_json(row, 4)?,
        created_at: row.get(5)?,
        started_at: row.get(6)?,
        updated_at: row.get(7)?,
        completed_at: row.get(8)?,
        total_duration_seconds: row.get(9)?,
        error: row.get(10)?,
        warnings: get_json(row, 11)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        job_id: row.get(0)?,
        date: row.get(1)?,
        model: row.get(2)?,
        status: get_parsed(row, 3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        duration_seconds: row.get(6)?,
        error: row.get(7)?,
    })
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

impl LedgerStore {
    /// Persist a job and its tasks in one transaction.
    ///
    /// Fails with `ActiveJob` if any job is still non-terminal; the check and the
    /// insert share an immediate transaction so two writers cannot both pass it.
    pub fn insert_job_with_tasks(&self, job: &Job, tasks: &[ModelDay]) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active: Option<String> = tx
            .query_row(
                &format!("SELECT job_id FROM jobs WHERE status IN {ACTIVE_STATUSES} LIMIT 1"),
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(active) = active {
            return Err(LedgerError::ActiveJob(active));
        }

        tx.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                job.job_id,
                job.config_path,
                job.status.as_str(),
                serde_json::to_string(&job.date_range)?,
                serde_json::to_string(&job.models)?,
                job.created_at,
                job.started_at,
                job.updated_at,
                job.completed_at,
                job.total_duration_seconds,
                job.error,
                serde_json::to_string(&job.warnings)?,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO job_details (job_id, date, model, status) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for task in tasks {
                stmt.execute(params![
                    job.job_id,
                    task.date,
                    task.model,
                    TaskStatus::Pending.as_str()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>, LedgerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, limit: u32) -> Result<Vec<Job>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![limit], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// The job that is not yet terminal, if any.
    pub fn find_active_job(&self) -> Result<Option<Job>, LedgerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN {ACTIVE_STATUSES} \
                     ORDER BY created_at ASC LIMIT 1"
                ),
                [],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Jobs a worker had started (downloading or running) but never finished.
    pub fn find_started_jobs(&self) -> Result<Vec<Job>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ('downloading_data', 'running') \
             ORDER BY created_at ASC"
        ))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Move a pending job to `downloading_data` for exactly one worker.
    ///
    /// The status check and the update are one statement, so of two workers racing for
    /// the same job only one succeeds. The other gets `InvalidTransition`.
    pub fn claim_job(&self, job_id: &str) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        let now = Utc::now();
        let claimed = conn.execute(
            "UPDATE jobs SET status = 'downloading_data', started_at = COALESCE(started_at, ?1), \
             updated_at = ?1 WHERE job_id = ?2 AND status = 'pending'",
            params![now, job_id],
        )?;
        if claimed == 1 {
            return Ok(());
        }

        let current: Option<JobStatus> = conn
            .query_row(
                "SELECT status FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| get_parsed(row, 0),
            )
            .optional()?;
        match current {
            Some(current) => Err(LedgerError::InvalidTransition {
                entity: "job",
                from: current.to_string(),
                to: JobStatus::DownloadingData.to_string(),
            }),
            None => Err(LedgerError::NotFound(format!("job {job_id}"))),
        }
    }

    /// The oldest job still waiting for the worker.
    pub fn find_oldest_pending_job(&self) -> Result<Option<Job>, LedgerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' \
                     ORDER BY created_at ASC LIMIT 1"
                ),
                [],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Move a job to `next`, enforcing the lifecycle rules.
    ///
    /// Sets `started_at` on the first move out of pending and `completed_at` plus
    /// total duration on a terminal status. `error` is only written when given.
    pub fn update_job_status(
        &self,
        job_id: &str,
        next: JobStatus,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<(JobStatus, Option<DateTime<Utc>>, DateTime<Utc>)> = tx
            .query_row(
                "SELECT status, started_at, created_at FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| Ok((get_parsed(row, 0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (current, started_at, created_at) =
            current.ok_or_else(|| LedgerError::NotFound(format!("job {job_id}")))?;

        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                entity: "job",
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next.is_terminal() {
            let duration = seconds_between(started_at.unwrap_or(created_at), now);
            tx.execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2, updated_at = ?2, \
                 total_duration_seconds = ?3, error = COALESCE(?4, error) WHERE job_id = ?5",
                params![next.as_str(), now, duration, error, job_id],
            )?;
        } else {
            tx.execute(
                "UPDATE jobs SET status = ?1, started_at = COALESCE(started_at, ?2), \
                 updated_at = ?2, error = COALESCE(?3, error) WHERE job_id = ?4",
                params![next.as_str(), now, error, job_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Append warnings to a job, keeping their order.
    pub fn append_job_warnings(&self, job_id: &str, warnings: &[String]) -> Result<(), LedgerError> {
        if warnings.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing: Option<Vec<String>> = tx
            .query_row(
                "SELECT warnings FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| get_json(row, 0),
            )
            .optional()?;
        let mut all = existing.ok_or_else(|| LedgerError::NotFound(format!("job {job_id}")))?;
        all.extend(warnings.iter().cloned());
        tx.execute(
            "UPDATE jobs SET warnings = ?1, updated_at = ?2 WHERE job_id = ?3",
            params![serde_json::to_string(&all)?, Utc::now(), job_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Tasks of a job in execution order: date ascending, then model.
    pub fn get_tasks(&self, job_id: &str) -> Result<Vec<Task>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TASK_COLUMNS} FROM job_details WHERE job_id = ?1 ORDER BY date ASC, model ASC"
        ))?;
        let tasks = stmt
            .query_map(params![job_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get_tasks_with_status(
        &self,
        job_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TASK_COLUMNS} FROM job_details WHERE job_id = ?1 AND status = ?2 \
             ORDER BY date ASC, model ASC"
        ))?;
        let tasks = stmt
            .query_map(params![job_id, status.as_str()], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get_task(
        &self,
        job_id: &str,
        date: NaiveDate,
        model: &str,
    ) -> Result<Option<Task>, LedgerError> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM job_details \
                     WHERE job_id = ?1 AND date = ?2 AND model = ?3"
                ),
                params![job_id, date, model],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Move a task to `next`, enforcing the task lifecycle.
    ///
    /// `error` carries the failure message for failed tasks and the cause for
    /// skipped ones.
    pub fn update_task_status(
        &self,
        job_id: &str,
        date: NaiveDate,
        model: &str,
        next: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<(TaskStatus, Option<DateTime<Utc>>)> = tx
            .query_row(
                "SELECT status, started_at FROM job_details \
                 WHERE job_id = ?1 AND date = ?2 AND model = ?3",
                params![job_id, date, model],
                |row| Ok((get_parsed(row, 0)?, row.get(1)?)),
            )
            .optional()?;
        let (current, started_at) = current
            .ok_or_else(|| LedgerError::NotFound(format!("task {job_id}/{model}/{date}")))?;

        if !current.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                entity: "task",
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == TaskStatus::Running {
            tx.execute(
                "UPDATE job_details SET status = ?1, started_at = ?2 \
                 WHERE job_id = ?3 AND date = ?4 AND model = ?5",
                params![next.as_str(), now, job_id, date, model],
            )?;
        } else {
            let duration = started_at.map(|start| seconds_between(start, now));
            tx.execute(
                "UPDATE job_details SET status = ?1, completed_at = ?2, duration_seconds = ?3, \
                 error = ?4 WHERE job_id = ?5 AND date = ?6 AND model = ?7",
                params![next.as_str(), now, duration, error, job_id, date, model],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Fail every pending or running task of a job. Returns how many were failed.
    pub fn fail_unfinished_tasks(&self, job_id: &str, reason: &str) -> Result<usize, LedgerError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE job_details SET status = 'failed', error = ?1, completed_at = ?2 \
             WHERE job_id = ?3 AND status IN ('pending', 'running')",
            params![reason, Utc::now(), job_id],
        )?;
        Ok(updated)
    }

    /// Task counts per status.
    pub fn job_progress(&self, job_id: &str) -> Result<JobProgress, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT status, COUNT(*) FROM job_details WHERE job_id = ?1 GROUP BY status",
        )?;
        let counts = stmt
            .query_map(params![job_id], |row| {
                Ok((get_parsed::<TaskStatus>(row, 0)?, row.get::<_, u32>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut progress = JobProgress::default();
        for (status, count) in counts {
            progress.record(status, count);
        }
        Ok(progress)
    }

    /// Whether any job other than `exclude_job` has completed this model-day.
    pub fn is_model_day_completed(
        &self,
        model: &str,
        date: NaiveDate,
        exclude_job: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM job_details \
             WHERE model = ?1 AND date = ?2 AND status = 'completed' \
             AND (?3 IS NULL OR job_id != ?3))",
            params![model, date, exclude_job],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Latest date this model completed in any job.
    pub fn last_completed_date(&self, model: &str) -> Result<Option<NaiveDate>, LedgerError> {
        let conn = self.conn()?;
        let date: Option<NaiveDate> = conn.query_row(
            "SELECT MAX(date) FROM job_details WHERE model = ?1 AND status = 'completed'",
            params![model],
            |row| row.get(0),
        )?;
        Ok(date)
    }
}
