use chrono::NaiveDate;
use thiserror::Error;
use tradesim_agents::AgentError;
use tradesim_ledger::LedgerError;

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Price fetch error: {0}")]
    Fetch(String),
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Market data error: {0}")]
    Market(#[from] MarketDataError),

    #[error("Ledger already has a completed trading day for {model} on {date}")]
    AlreadyTraded { model: String, date: NaiveDate },

    #[error("Agent reported holdings that do not match its actions: {0}")]
    HoldingsMismatch(String),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Job {job_id} is already active")]
    JobAlreadyActive { job_id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Another worker claimed the job first, or it already finished.
    #[error("Job {job_id} is {status}, not pending")]
    JobNotPending { job_id: String, status: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Market data error: {0}")]
    Market(#[from] MarketDataError),
}
