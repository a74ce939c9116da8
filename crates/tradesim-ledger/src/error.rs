use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Job {0} is still active")]
    ActiveJob(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No price for {symbol} on {date}")]
    MissingPrice { symbol: String, date: NaiveDate },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Ledger not available: {0}")]
    Unavailable(String),
}
