//! Payment ledger repository.
//!
//! # Invariants
//! - `session_id` is unique across payments.
//! - Settlement is a one-way `PENDING -> PAID` compare-and-set.

use super::{
    date_to_db, is_unique_violation, parse_date, parse_decimal, parse_uuid, RepoError, RepoResult,
};
use crate::model::borrowing::BorrowingId;
use crate::model::payment::{Payment, PaymentId, PaymentKind, PaymentStatus};
use rusqlite::{params, Connection, Row};

const PAYMENT_SELECT_SQL: &str = "SELECT
    id,
    borrowing_id,
    payment_date,
    status,
    type,
    session_url,
    session_id,
    money_to_pay
FROM payments";

/// Repository interface for payment records.
pub trait PaymentRepository {
    fn create_payment(&self, payment: &Payment) -> RepoResult<PaymentId>;
    fn get_payment(&self, id: PaymentId) -> RepoResult<Option<Payment>>;
    fn find_by_session_id(&self, session_id: &str) -> RepoResult<Option<Payment>>;
    fn list_payments_for_borrowing(&self, borrowing_id: BorrowingId) -> RepoResult<Vec<Payment>>;
    /// Settles a pending payment; `InvalidState` when already paid.
    fn mark_paid(&self, id: PaymentId) -> RepoResult<()>;
}

/// SQLite-backed payment repository.
pub struct SqlitePaymentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePaymentRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PaymentRepository for SqlitePaymentRepository<'_> {
    fn create_payment(&self, payment: &Payment) -> RepoResult<PaymentId> {
        payment.validate()?;

        let result = self.conn.execute(
            "INSERT INTO payments (
                id,
                borrowing_id,
                payment_date,
                status,
                type,
                session_url,
                session_id,
                money_to_pay
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                payment.id.to_string(),
                payment.borrowing_id.to_string(),
                date_to_db(payment.payment_date),
                status_to_db(payment.status),
                kind_to_db(payment.kind),
                payment.session_url.as_deref(),
                payment.session_id.as_deref(),
                payment.money_to_pay.normalize().to_string(),
            ],
        );

        match result {
            Ok(_) => Ok(payment.id),
            Err(err) if is_unique_violation(&err) => Err(RepoError::Conflict(format!(
                "payment session already recorded: {}",
                payment.session_id.as_deref().unwrap_or_default()
            ))),
            Err(rusqlite::Error::SqliteFailure(inner, _))
                if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Err(RepoError::NotFound {
                    entity: "borrowing",
                    id: payment.borrowing_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get_payment(&self, id: PaymentId) -> RepoResult<Option<Payment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PAYMENT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_payment_row(row)?));
        }
        Ok(None)
    }

    fn find_by_session_id(&self, session_id: &str) -> RepoResult<Option<Payment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PAYMENT_SELECT_SQL} WHERE session_id = ?1;"))?;
        let mut rows = stmt.query([session_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_payment_row(row)?));
        }
        Ok(None)
    }

    fn list_payments_for_borrowing(&self, borrowing_id: BorrowingId) -> RepoResult<Vec<Payment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PAYMENT_SELECT_SQL} WHERE borrowing_id = ?1 ORDER BY payment_date ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([borrowing_id.to_string()])?;
        let mut payments = Vec::new();
        while let Some(row) = rows.next()? {
            payments.push(parse_payment_row(row)?);
        }
        Ok(payments)
    }

    fn mark_paid(&self, id: PaymentId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE payments SET status = 'PAID' WHERE id = ?1 AND status = 'PENDING';",
            [id.to_string()],
        )?;
        if changed == 1 {
            return Ok(());
        }
        match self.get_payment(id)? {
            Some(_) => Err(RepoError::InvalidState(format!("payment {id} is already PAID"))),
            None => Err(RepoError::NotFound {
                entity: "payment",
                id,
            }),
        }
    }
}

fn parse_payment_row(row: &Row<'_>) -> RepoResult<Payment> {
    let id_text: String = row.get("id")?;
    let borrowing_text: String = row.get("borrowing_id")?;
    let date_text: String = row.get("payment_date")?;
    let status_text: String = row.get("status")?;
    let kind_text: String = row.get("type")?;
    let money_text: String = row.get("money_to_pay")?;

    let status = match status_text.as_str() {
        "PENDING" => PaymentStatus::Pending,
        "PAID" => PaymentStatus::Paid,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid status `{other}` in payments.status"
            )))
        }
    };
    let kind = match kind_text.as_str() {
        "PAYMENT" => PaymentKind::Payment,
        "FINE" => PaymentKind::Fine,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid type `{other}` in payments.type"
            )))
        }
    };

    Ok(Payment {
        id: parse_uuid(&id_text, "payments.id")?,
        borrowing_id: parse_uuid(&borrowing_text, "payments.borrowing_id")?,
        payment_date: parse_date(&date_text, "payments.payment_date")?,
        status,
        kind,
        session_url: row.get("session_url")?,
        session_id: row.get("session_id")?,
        money_to_pay: parse_decimal(&money_text, "payments.money_to_pay")?,
    })
}

fn status_to_db(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "PENDING",
        PaymentStatus::Paid => "PAID",
    }
}

fn kind_to_db(kind: PaymentKind) -> &'static str {
    match kind {
        PaymentKind::Payment => "PAYMENT",
        PaymentKind::Fine => "FINE",
    }
}
