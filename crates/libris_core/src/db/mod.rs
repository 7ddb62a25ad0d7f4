//! Database bootstrap for the lending ledger.
//!
//! Every connection handed out here has `foreign_keys` on and the schema at
//! [`migrations::latest_version`]. Deleting a book or user cascades through
//! borrowings to payments, notifications and delivery jobs. File databases
//! run in WAL mode so delivery workers and the sweeper can read while a
//! borrow commits.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with_retry};
pub use rusqlite::Connection;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The database never became reachable within the retry budget.
    Unavailable {
        attempts: u32,
        last_error: rusqlite::Error,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Unavailable {
                attempts,
                last_error,
            } => write!(
                f,
                "database unavailable after {attempts} attempts: {last_error}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::Unavailable { last_error, .. } => Some(last_error),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
