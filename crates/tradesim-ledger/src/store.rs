use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tradesim_models::schema::SCHEMA_DDL;

use crate::error::LedgerError;

/// SQLite-backed store for jobs, tasks, the trading ledger and price data.
///
/// This is the only shared mutable resource in the system. Every logical write
/// is a single transaction. Access is serialized through a `Mutex` since
/// `rusqlite::Connection` is not `Sync`.
pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    /// Open (or create) a file-backed database. Creates the schema if it doesn't
    /// exist and enables WAL mode.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory database with the schema applied. Useful for testing.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }
}
