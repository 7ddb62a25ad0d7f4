//! Payment ledger service.
//!
//! Mirrors payment records attached to borrowings. Gateway checkout sessions
//! are created elsewhere and only their id/url are stored here.

use crate::clock::Clock;
use crate::model::borrowing::BorrowingId;
use crate::model::payment::{Payment, PaymentId, PaymentKind};
use crate::repo::payment_repo::PaymentRepository;
use crate::repo::RepoResult;
use rust_decimal::Decimal;

/// Gateway session reference for a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub session_url: String,
}

pub struct PaymentService<R: PaymentRepository, C: Clock> {
    repo: R,
    clock: C,
}

impl<R: PaymentRepository, C: Clock> PaymentService<R, C> {
    pub fn new(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    /// Records a PENDING payment dated today.
    pub fn record_payment(
        &self,
        borrowing_id: BorrowingId,
        kind: PaymentKind,
        money_to_pay: Decimal,
        session: Option<CheckoutSession>,
    ) -> RepoResult<Payment> {
        let mut payment = Payment::new(borrowing_id, kind, money_to_pay, self.clock.today());
        if let Some(session) = session {
            payment.session_id = Some(session.session_id);
            payment.session_url = Some(session.session_url);
        }
        self.repo.create_payment(&payment)?;
        Ok(payment)
    }

    pub fn get_payment(&self, id: PaymentId) -> RepoResult<Option<Payment>> {
        self.repo.get_payment(id)
    }

    pub fn list_for_borrowing(&self, borrowing_id: BorrowingId) -> RepoResult<Vec<Payment>> {
        self.repo.list_payments_for_borrowing(borrowing_id)
    }

    /// Settles the payment behind a completed gateway session.
    pub fn settle_session(&self, session_id: &str) -> RepoResult<Option<Payment>> {
        let Some(payment) = self.repo.find_by_session_id(session_id)? else {
            return Ok(None);
        };
        self.repo.mark_paid(payment.id)?;
        self.repo.get_payment(payment.id)
    }
}
