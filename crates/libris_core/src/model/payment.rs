//! Payment record attached to a borrowing.
//!
//! Checkout sessions are created by the payment gateway integration; this
//! record only mirrors the session reference and settlement status.

use super::borrowing::BorrowingId;
use super::{require_amount, ValidationError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PaymentId = Uuid;

const MONEY_MAX_DIGITS: u32 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentKind {
    /// Regular rental fee.
    #[default]
    Payment,
    /// Penalty for returning late.
    Fine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub borrowing_id: BorrowingId,
    pub payment_date: NaiveDate,
    pub status: PaymentStatus,
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    pub session_url: Option<String>,
    pub session_id: Option<String>,
    /// USD, `DECIMAL(7, 2)`.
    pub money_to_pay: Decimal,
}

impl Payment {
    pub fn new(
        borrowing_id: BorrowingId,
        kind: PaymentKind,
        money_to_pay: Decimal,
        payment_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrowing_id,
            payment_date,
            status: PaymentStatus::Pending,
            kind,
            session_url: None,
            session_id: None,
            money_to_pay,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId { field: "payment.id" });
        }
        if let Some(session_id) = self.session_id.as_deref() {
            super::require_text("session_id", session_id, 255)?;
        }
        require_amount("money_to_pay", self.money_to_pay, MONEY_MAX_DIGITS)
    }
}
