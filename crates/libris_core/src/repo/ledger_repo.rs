//! Borrowing ledger repository.
//!
//! # Responsibility
//! - Perform borrow and return as single atomic units over `books` and
//!   `borrowings`.
//! - Serve ledger read models for listings, message rendering and the
//!   overdue sweep.
//!
//! # Invariants
//! - Borrow decrements stock with `inventory = inventory - 1 WHERE
//!   inventory > 0`; a zero-stock book is never touched.
//! - Return sets `actual_return_date` only `WHERE actual_return_date IS NULL`
//!   and increments stock in the same transaction.
//! - Borrowing listings are sorted by `expected_return_date DESC, id ASC`.

use super::catalog_repo::load_book;
use super::{date_to_db, parse_date, parse_uuid, push_pagination, RepoError, RepoResult};
use crate::model::book::BookId;
use crate::model::borrowing::{Borrowing, BorrowingId};
use crate::model::user::UserId;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

const BORROWING_RECORD_SELECT_SQL: &str = "SELECT
    b.id AS id,
    b.book_id AS book_id,
    b.user_id AS user_id,
    b.borrow_date AS borrow_date,
    b.expected_return_date AS expected_return_date,
    b.actual_return_date AS actual_return_date,
    bk.title AS book_title,
    u.email AS user_email
FROM borrowings b
INNER JOIN books bk ON bk.id = b.book_id
INNER JOIN users u ON u.id = b.user_id";

/// Borrowing joined with the display fields admins and borrowers see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowingRecord {
    pub borrowing: Borrowing,
    pub book_title: String,
    pub user_email: String,
}

/// Query options for listing borrowings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorrowingListQuery {
    pub user_id: Option<UserId>,
    pub book_id: Option<BookId>,
    /// `Some(true)`: still out; `Some(false)`: returned; `None`: both.
    pub is_active: Option<bool>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Result of a committed return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnReceipt {
    pub borrowing: Borrowing,
    /// Book inventory after the increment.
    pub inventory: u32,
}

/// Repository interface for the borrowing ledger.
pub trait LedgerRepository {
    /// Persists `borrowing` and takes one copy off the shelf, atomically.
    ///
    /// Returns the book's remaining inventory.
    fn borrow_book(&self, borrowing: &Borrowing) -> RepoResult<u32>;
    /// Marks a borrowing returned and puts the copy back, atomically.
    fn return_borrowing(&self, id: BorrowingId, returned_on: NaiveDate)
        -> RepoResult<ReturnReceipt>;
    /// Adds copies to a book's shelf count; returns the new inventory.
    fn restock(&self, book_id: BookId, copies: u32) -> RepoResult<u32>;
    fn get_borrowing(&self, id: BorrowingId) -> RepoResult<Option<BorrowingRecord>>;
    fn list_borrowings(&self, query: &BorrowingListQuery) -> RepoResult<Vec<BorrowingRecord>>;
    /// Open borrowings due strictly before `today`, earliest due first.
    fn list_overdue(&self, today: NaiveDate) -> RepoResult<Vec<BorrowingRecord>>;
}

/// SQLite-backed ledger repository.
pub struct SqliteLedgerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedgerRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl LedgerRepository for SqliteLedgerRepository<'_> {
    fn borrow_book(&self, borrowing: &Borrowing) -> RepoResult<u32> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        if !row_exists(&tx, "users", &borrowing.user_id.to_string())? {
            return Err(RepoError::NotFound {
                entity: "user",
                id: borrowing.user_id,
            });
        }

        let taken = tx.execute(
            "UPDATE books
             SET
                inventory = inventory - 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND inventory > 0;",
            [borrowing.book_id.to_string()],
        )?;
        if taken == 0 {
            return Err(if row_exists(&tx, "books", &borrowing.book_id.to_string())? {
                RepoError::Unavailable(borrowing.book_id)
            } else {
                RepoError::NotFound {
                    entity: "book",
                    id: borrowing.book_id,
                }
            });
        }

        tx.execute(
            "INSERT INTO borrowings (
                id,
                book_id,
                user_id,
                borrow_date,
                expected_return_date,
                actual_return_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, NULL);",
            params![
                borrowing.id.to_string(),
                borrowing.book_id.to_string(),
                borrowing.user_id.to_string(),
                date_to_db(borrowing.borrow_date),
                date_to_db(borrowing.expected_return_date),
            ],
        )?;

        let remaining = book_inventory(&tx, borrowing.book_id)?;
        tx.commit()?;
        Ok(remaining)
    }

    fn return_borrowing(
        &self,
        id: BorrowingId,
        returned_on: NaiveDate,
    ) -> RepoResult<ReturnReceipt> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let closed = tx.execute(
            "UPDATE borrowings
             SET actual_return_date = ?2
             WHERE id = ?1
               AND actual_return_date IS NULL;",
            params![id.to_string(), date_to_db(returned_on)],
        )?;
        if closed == 0 {
            return Err(if row_exists(&tx, "borrowings", &id.to_string())? {
                RepoError::AlreadyReturned(id)
            } else {
                RepoError::NotFound {
                    entity: "borrowing",
                    id,
                }
            });
        }

        tx.execute(
            "UPDATE books
             SET
                inventory = inventory + 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = (SELECT book_id FROM borrowings WHERE id = ?1);",
            [id.to_string()],
        )?;

        let borrowing = load_borrowing(&tx, id)?.ok_or(RepoError::NotFound {
            entity: "borrowing",
            id,
        })?;
        let inventory = book_inventory(&tx, borrowing.book_id)?;
        tx.commit()?;

        Ok(ReturnReceipt {
            borrowing,
            inventory,
        })
    }

    fn restock(&self, book_id: BookId, copies: u32) -> RepoResult<u32> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE books
             SET
                inventory = inventory + ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![book_id.to_string(), i64::from(copies)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "book",
                id: book_id,
            });
        }
        let inventory = book_inventory(&tx, book_id)?;
        tx.commit()?;
        Ok(inventory)
    }

    fn get_borrowing(&self, id: BorrowingId) -> RepoResult<Option<BorrowingRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BORROWING_RECORD_SELECT_SQL} WHERE b.id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn list_borrowings(&self, query: &BorrowingListQuery) -> RepoResult<Vec<BorrowingRecord>> {
        let mut sql = format!("{BORROWING_RECORD_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(user_id) = query.user_id {
            sql.push_str(" AND b.user_id = ?");
            bind_values.push(Value::Text(user_id.to_string()));
        }
        if let Some(book_id) = query.book_id {
            sql.push_str(" AND b.book_id = ?");
            bind_values.push(Value::Text(book_id.to_string()));
        }
        match query.is_active {
            Some(true) => sql.push_str(" AND b.actual_return_date IS NULL"),
            Some(false) => sql.push_str(" AND b.actual_return_date IS NOT NULL"),
            None => {}
        }

        sql.push_str(" ORDER BY b.expected_return_date DESC, b.id ASC");
        push_pagination(&mut sql, &mut bind_values, query.limit, query.offset);

        collect_records(self.conn, &sql, bind_values)
    }

    fn list_overdue(&self, today: NaiveDate) -> RepoResult<Vec<BorrowingRecord>> {
        let sql = format!(
            "{BORROWING_RECORD_SELECT_SQL}
             WHERE b.actual_return_date IS NULL
               AND b.expected_return_date < ?
             ORDER BY b.expected_return_date ASC, b.id ASC"
        );
        collect_records(self.conn, &sql, vec![Value::Text(date_to_db(today))])
    }
}

fn collect_records(
    conn: &Connection,
    sql: &str,
    bind_values: Vec<Value>,
) -> RepoResult<Vec<BorrowingRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(parse_record_row(row)?);
    }
    Ok(records)
}

fn load_borrowing(conn: &Connection, id: BorrowingId) -> RepoResult<Option<Borrowing>> {
    let mut stmt = conn.prepare(
        "SELECT
            id,
            book_id,
            user_id,
            borrow_date,
            expected_return_date,
            actual_return_date
         FROM borrowings
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_borrowing_row(row)?));
    }
    Ok(None)
}

fn book_inventory(conn: &Connection, book_id: BookId) -> RepoResult<u32> {
    load_book(conn, book_id)?
        .map(|book| book.inventory)
        .ok_or(RepoError::NotFound {
            entity: "book",
            id: book_id,
        })
}

fn row_exists(conn: &Connection, table: &'static str, id: &str) -> RepoResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1;"),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn parse_borrowing_row(row: &Row<'_>) -> RepoResult<Borrowing> {
    let id_text: String = row.get("id")?;
    let book_text: String = row.get("book_id")?;
    let user_text: String = row.get("user_id")?;
    let borrow_text: String = row.get("borrow_date")?;
    let expected_text: String = row.get("expected_return_date")?;
    let actual_return_date = row
        .get::<_, Option<String>>("actual_return_date")?
        .map(|value| parse_date(&value, "borrowings.actual_return_date"))
        .transpose()?;

    Ok(Borrowing {
        id: parse_uuid(&id_text, "borrowings.id")?,
        book_id: parse_uuid(&book_text, "borrowings.book_id")?,
        user_id: parse_uuid(&user_text, "borrowings.user_id")?,
        borrow_date: parse_date(&borrow_text, "borrowings.borrow_date")?,
        expected_return_date: parse_date(&expected_text, "borrowings.expected_return_date")?,
        actual_return_date,
    })
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<BorrowingRecord> {
    Ok(BorrowingRecord {
        borrowing: parse_borrowing_row(row)?,
        book_title: row.get("book_title")?,
        user_email: row.get("user_email")?,
    })
}
