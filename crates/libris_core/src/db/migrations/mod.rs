//! Libris schema versions.
//!
//! | version | adds |
//! |---|---|
//! | 1 | `books`, `users`, `borrowings` (inventory guarded by `CHECK (inventory >= 0)`) |
//! | 2 | `payments`, one row per checkout session |
//! | 3 | `notifications` and their `delivery_jobs` queue rows |
//!
//! Pending versions run inside one immediate transaction and bump
//! `PRAGMA user_version` as they go. A file stamped by a newer build is
//! refused rather than downgraded.

use crate::db::{DbError, DbResult};
use rusqlite::{Connection, TransactionBehavior};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_catalog_ledger.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_payments.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("0003_notifications.sql"),
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    // Immediate: two processes starting together must not both migrate.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let locked_version: u32 = tx.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    for migration in MIGRATIONS {
        if migration.version <= locked_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
