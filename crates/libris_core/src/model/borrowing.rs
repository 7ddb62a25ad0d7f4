//! Borrowing ledger record.
//!
//! # Invariants
//! - `borrow_date` is fixed at creation.
//! - `actual_return_date` transitions `None -> Some` exactly once.

use super::book::BookId;
use super::user::UserId;
use super::ValidationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BorrowingId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrowing {
    pub id: BorrowingId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub borrow_date: NaiveDate,
    pub expected_return_date: NaiveDate,
    pub actual_return_date: Option<NaiveDate>,
}

impl Borrowing {
    /// Opens a new, not yet returned borrowing.
    pub fn open(
        book_id: BookId,
        user_id: UserId,
        borrow_date: NaiveDate,
        expected_return_date: NaiveDate,
    ) -> Result<Self, ValidationError> {
        if expected_return_date < borrow_date {
            return Err(ValidationError::DueBeforeBorrow {
                borrow_date,
                expected_return_date,
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            book_id,
            user_id,
            borrow_date,
            expected_return_date,
            actual_return_date: None,
        })
    }

    pub fn is_returned(&self) -> bool {
        self.actual_return_date.is_some()
    }

    /// Overdue means still out after the due date has passed.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_returned() && self.expected_return_date < today
    }
}

#[cfg(test)]
mod tests {
    use super::Borrowing;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn due_date_is_not_overdue_on_the_day_itself() {
        let borrowing = Borrowing::open(Uuid::new_v4(), Uuid::new_v4(), date(1), date(8)).unwrap();

        assert!(!borrowing.is_overdue(date(8)));
        assert!(borrowing.is_overdue(date(9)));
    }

    #[test]
    fn returned_borrowing_is_never_overdue() {
        let mut borrowing =
            Borrowing::open(Uuid::new_v4(), Uuid::new_v4(), date(1), date(2)).unwrap();
        borrowing.actual_return_date = Some(date(20));

        assert!(!borrowing.is_overdue(date(21)));
    }

    #[test]
    fn open_rejects_due_date_before_borrow_date() {
        assert!(Borrowing::open(Uuid::new_v4(), Uuid::new_v4(), date(5), date(4)).is_err());
    }
}
