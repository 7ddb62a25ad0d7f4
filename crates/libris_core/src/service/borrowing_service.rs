//! Borrowing lifecycle coordinator.
//!
//! # Responsibility
//! - Borrow and return books with inventory moving in lockstep.
//! - Announce new borrowings to a [`BorrowingEvents`] listener after commit.
//! - Serve ledger listings for borrowers and staff.
//!
//! # Invariants
//! - Borrow is all-or-nothing: stock decrement and borrowing insert commit
//!   together, or neither does.
//! - A second return is rejected with `AlreadyReturned` and changes nothing.
//! - Listener failures are logged and never undo or fail a committed borrow.
//! - Returns emit no events.

use crate::clock::Clock;
use crate::model::book::BookId;
use crate::model::borrowing::{Borrowing, BorrowingId};
use crate::model::user::UserId;
use crate::model::ValidationError;
use crate::repo::ledger_repo::{
    BorrowingListQuery, BorrowingRecord, LedgerRepository, ReturnReceipt,
};
use crate::repo::RepoError;
use chrono::NaiveDate;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Receives ledger events once they are durable.
pub trait BorrowingEvents {
    fn on_borrowing_created(&self, borrowing: &Borrowing) -> Result<(), RepoError>;
}

impl<E: BorrowingEvents + ?Sized> BorrowingEvents for &E {
    fn on_borrowing_created(&self, borrowing: &Borrowing) -> Result<(), RepoError> {
        (**self).on_borrowing_created(borrowing)
    }
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl BorrowingEvents for NoEvents {
    fn on_borrowing_created(&self, _borrowing: &Borrowing) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Service error for borrow/return use-cases.
#[derive(Debug)]
pub enum LedgerServiceError {
    Validation(ValidationError),
    BookNotFound(BookId),
    UserNotFound(UserId),
    BorrowingNotFound(BorrowingId),
    /// No copy of the book is on the shelf.
    Unavailable(BookId),
    AlreadyReturned(BorrowingId),
    Repo(RepoError),
}

impl LedgerServiceError {
    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Unavailable(_) | Self::AlreadyReturned(_) => 400,
            Self::BookNotFound(_) | Self::UserNotFound(_) | Self::BorrowingNotFound(_) => 404,
            Self::Repo(_) => 500,
        }
    }
}

impl Display for LedgerServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::BookNotFound(id) => write!(f, "book not found: {id}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::BorrowingNotFound(id) => write!(f, "borrowing not found: {id}"),
            Self::Unavailable(id) => write!(f, "book {id} has no copies available"),
            Self::AlreadyReturned(id) => write!(f, "borrowing {id} was already returned"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LedgerServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for LedgerServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for LedgerServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound { entity: "book", id } => Self::BookNotFound(id),
            RepoError::NotFound { entity: "user", id } => Self::UserNotFound(id),
            RepoError::NotFound {
                entity: "borrowing",
                id,
            } => Self::BorrowingNotFound(id),
            RepoError::Unavailable(id) => Self::Unavailable(id),
            RepoError::AlreadyReturned(id) => Self::AlreadyReturned(id),
            other => Self::Repo(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerServiceError>;

/// Request model for taking a book out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRequest {
    pub book_id: BookId,
    /// Authenticated borrower.
    pub user_id: UserId,
    pub expected_return_date: NaiveDate,
}

/// Coordinates stock and the borrowing ledger.
pub struct InventoryCoordinator<R: LedgerRepository, E: BorrowingEvents, C: Clock> {
    repo: R,
    events: E,
    clock: C,
}

impl<R: LedgerRepository, E: BorrowingEvents, C: Clock> InventoryCoordinator<R, E, C> {
    pub fn new(repo: R, events: E, clock: C) -> Self {
        Self {
            repo,
            events,
            clock,
        }
    }

    /// Takes one copy off the shelf and records the borrowing.
    ///
    /// # Errors
    /// - `BookNotFound` / `UserNotFound` for unknown references.
    /// - `Unavailable` when inventory is zero; nothing is written.
    /// - `Validation` when the due date precedes today.
    pub fn borrow(&self, request: &BorrowRequest) -> LedgerResult<Borrowing> {
        let started_at = Instant::now();
        let borrowing = Borrowing::open(
            request.book_id,
            request.user_id,
            self.clock.today(),
            request.expected_return_date,
        )?;

        let remaining = match self.repo.borrow_book(&borrowing) {
            Ok(remaining) => remaining,
            Err(err) => {
                let err = LedgerServiceError::from(err);
                info!(
                    "event=borrow_book module=ledger status=rejected book_id={} reason={} duration_ms={}",
                    request.book_id,
                    rejection_reason(&err),
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        info!(
            "event=borrow_book module=ledger status=ok borrowing_id={} book_id={} inventory={} duration_ms={}",
            borrowing.id,
            borrowing.book_id,
            remaining,
            started_at.elapsed().as_millis()
        );

        if let Err(err) = self.events.on_borrowing_created(&borrowing) {
            warn!(
                "event=borrowing_created_dispatch module=ledger status=error borrowing_id={} error={}",
                borrowing.id, err
            );
        }

        Ok(borrowing)
    }

    /// Closes a borrowing and puts the copy back on the shelf.
    pub fn return_book(&self, id: BorrowingId) -> LedgerResult<ReturnReceipt> {
        let started_at = Instant::now();
        let receipt = self
            .repo
            .return_borrowing(id, self.clock.today())
            .map_err(LedgerServiceError::from)
            .inspect_err(|err| {
                info!(
                    "event=return_book module=ledger status=rejected borrowing_id={} reason={}",
                    id,
                    rejection_reason(err)
                );
            })?;

        info!(
            "event=return_book module=ledger status=ok borrowing_id={} book_id={} inventory={} duration_ms={}",
            id,
            receipt.borrowing.book_id,
            receipt.inventory,
            started_at.elapsed().as_millis()
        );
        Ok(receipt)
    }

    /// Adds purchased copies to a book's shelf count.
    pub fn restock(&self, book_id: BookId, copies: u32) -> LedgerResult<u32> {
        let inventory = self.repo.restock(book_id, copies)?;
        info!(
            "event=restock module=ledger status=ok book_id={} copies={} inventory={}",
            book_id, copies, inventory
        );
        Ok(inventory)
    }

    pub fn get_borrowing(&self, id: BorrowingId) -> LedgerResult<BorrowingRecord> {
        self.repo
            .get_borrowing(id)?
            .ok_or(LedgerServiceError::BorrowingNotFound(id))
    }

    /// Lists borrowings, latest due date first.
    pub fn list_borrowings(&self, query: &BorrowingListQuery) -> LedgerResult<Vec<BorrowingRecord>> {
        Ok(self.repo.list_borrowings(query)?)
    }
}

fn rejection_reason(err: &LedgerServiceError) -> &'static str {
    match err {
        LedgerServiceError::Validation(_) => "validation",
        LedgerServiceError::BookNotFound(_) => "book_not_found",
        LedgerServiceError::UserNotFound(_) => "user_not_found",
        LedgerServiceError::BorrowingNotFound(_) => "borrowing_not_found",
        LedgerServiceError::Unavailable(_) => "unavailable",
        LedgerServiceError::AlreadyReturned(_) => "already_returned",
        LedgerServiceError::Repo(_) => "storage",
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerServiceError;
    use uuid::Uuid;

    #[test]
    fn http_status_maps_domain_errors() {
        let id = Uuid::new_v4();
        assert_eq!(LedgerServiceError::Unavailable(id).http_status(), 400);
        assert_eq!(LedgerServiceError::AlreadyReturned(id).http_status(), 400);
        assert_eq!(LedgerServiceError::BookNotFound(id).http_status(), 404);
        assert_eq!(LedgerServiceError::BorrowingNotFound(id).http_status(), 404);
    }
}
