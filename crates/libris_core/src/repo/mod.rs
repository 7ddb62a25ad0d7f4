//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//! - Own every multi-row atomic unit (borrow, return, outcome recording).
//!
//! # Invariants
//! - Write paths validate records before SQL mutations.
//! - Multi-statement writes run in `BEGIN IMMEDIATE` transactions so the
//!   write lock is held from the first read.
//! - Repository APIs return semantic errors (`NotFound`, `Unavailable`,
//!   `AlreadyReturned`, `ClaimLost`) in addition to DB transport errors.

use crate::db::DbError;
use crate::model::ValidationError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

pub mod catalog_repo;
pub mod ledger_repo;
pub mod notification_repo;
pub mod payment_repo;

pub type RepoResult<T> = Result<T, RepoError>;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Repository error shared by catalog, ledger and notification storage.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound { entity: &'static str, id: Uuid },
    /// Book exists but has no copy on the shelf.
    Unavailable(Uuid),
    /// Borrowing already carries an actual return date.
    AlreadyReturned(Uuid),
    /// Unique constraint hit, e.g. a duplicate user email.
    Conflict(String),
    /// Delivery job is no longer owned by the caller's claim token.
    ClaimLost(Uuid),
    /// Row exists but is in a state that forbids the operation.
    InvalidState(String),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Unavailable(id) => write!(f, "book not available: {id}"),
            Self::AlreadyReturned(id) => write!(f, "borrowing already returned: {id}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::ClaimLost(id) => write!(f, "delivery claim lost for notification {id}"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(
    value: Option<String>,
    column: &'static str,
) -> RepoResult<Option<Uuid>> {
    value.map(|value| parse_uuid(&value, column)).transpose()
}

pub(crate) fn date_to_db(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str, column: &'static str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

pub(crate) fn parse_decimal(value: &str, column: &'static str) -> RepoResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid decimal `{value}` in {column}")))
}

pub(crate) fn parse_count(value: i64, column: &'static str) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid count `{value}` in {column}")))
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Appends `LIMIT`/`OFFSET` clauses the same way for every list query.
pub(crate) fn push_pagination(
    sql: &mut String,
    bind_values: &mut Vec<rusqlite::types::Value>,
    limit: Option<u32>,
    offset: u32,
) {
    use rusqlite::types::Value;

    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        if offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(offset)));
        }
    } else if offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        bind_values.push(Value::Integer(i64::from(offset)));
    }
}

#[cfg(test)]
mod tests {
    use super::{date_to_db, parse_date, parse_decimal};
    use chrono::NaiveDate;

    #[test]
    fn dates_round_trip_through_iso_text() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(date_to_db(date), "2024-02-29");
        assert_eq!(parse_date("2024-02-29", "t.c").unwrap(), date);
        assert!(parse_date("29/02/2024", "t.c").is_err());
    }

    #[test]
    fn parse_decimal_reports_column() {
        let err = parse_decimal("abc", "books.daily_fee").unwrap_err();
        assert!(err.to_string().contains("books.daily_fee"));
    }
}
