/// Tables for jobs, tasks, the trading ledger and daily price data.
///
/// Ledger rows (`trading_days`) are keyed by `(model, date)` and carry `job_id`
/// for provenance only. Holdings and actions hang off `trading_days.id`.
/// Decimal amounts are stored as TEXT to keep exact values.
pub const SCHEMA_DDL: &str = "\
CREATE TABLE IF NOT EXISTS jobs (
    job_id                  TEXT PRIMARY KEY,
    config_path             TEXT NOT NULL,
    status                  TEXT NOT NULL,
    date_range              TEXT NOT NULL,
    models                  TEXT NOT NULL,
    created_at              TEXT NOT NULL,
    started_at              TEXT,
    updated_at              TEXT,
    completed_at            TEXT,
    total_duration_seconds  REAL,
    error                   TEXT,
    warnings                TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);

CREATE TABLE IF NOT EXISTS job_details (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id            TEXT NOT NULL REFERENCES jobs(job_id),
    date              TEXT NOT NULL,
    model             TEXT NOT NULL,
    status            TEXT NOT NULL,
    started_at        TEXT,
    completed_at      TEXT,
    duration_seconds  REAL,
    error             TEXT,
    UNIQUE (job_id, date, model)
);
CREATE INDEX IF NOT EXISTS idx_job_details_model_date ON job_details(model, date, status);

CREATE TABLE IF NOT EXISTS trading_days (
    id                        INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id                    TEXT NOT NULL,
    model                     TEXT NOT NULL,
    date                      TEXT NOT NULL,
    starting_cash             TEXT NOT NULL,
    starting_portfolio_value  TEXT NOT NULL,
    daily_profit              TEXT NOT NULL,
    daily_return_pct          TEXT NOT NULL,
    ending_cash               TEXT NOT NULL,
    ending_portfolio_value    TEXT NOT NULL,
    reasoning_summary         TEXT,
    reasoning_full            TEXT,
    total_actions             INTEGER NOT NULL DEFAULT 0,
    days_since_last_trading   INTEGER NOT NULL DEFAULT 0,
    duration_seconds          REAL,
    created_at                TEXT NOT NULL,
    completed_at              TEXT,
    UNIQUE (model, date)
);
CREATE INDEX IF NOT EXISTS idx_trading_days_job ON trading_days(job_id);

CREATE TABLE IF NOT EXISTS holdings (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_day_id  INTEGER NOT NULL REFERENCES trading_days(id) ON DELETE CASCADE,
    symbol          TEXT NOT NULL,
    quantity        TEXT NOT NULL,
    UNIQUE (trading_day_id, symbol)
);

CREATE TABLE IF NOT EXISTS actions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_day_id  INTEGER NOT NULL REFERENCES trading_days(id) ON DELETE CASCADE,
    action_type     TEXT NOT NULL,
    symbol          TEXT,
    quantity        TEXT NOT NULL,
    price           TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_actions_trading_day ON actions(trading_day_id);

CREATE TABLE IF NOT EXISTS price_data (
    symbol  TEXT NOT NULL,
    date    TEXT NOT NULL,
    open    TEXT NOT NULL,
    high    TEXT NOT NULL,
    low     TEXT NOT NULL,
    close   TEXT NOT NULL,
    volume  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_price_data_date ON price_data(date);
";

/// Date format used for every DATE column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_declares_every_table() {
        for table in [
            "jobs",
            "job_details",
            "trading_days",
            "holdings",
            "actions",
            "price_data",
        ] {
            assert!(
                SCHEMA_DDL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn ledger_is_unique_per_model_and_date() {
        assert!(SCHEMA_DDL.contains("UNIQUE (model, date)"));
        assert!(SCHEMA_DDL.contains("UNIQUE (job_id, date, model)"));
    }
}
