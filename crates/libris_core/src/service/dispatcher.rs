//! Notification dispatcher.
//!
//! Turns ledger events into PENDING admin notifications, each with a durable
//! delivery job created in the same transaction. Delivery status is never
//! touched here.

use crate::clock::Clock;
use crate::model::borrowing::{Borrowing, BorrowingId};
use crate::model::notification::{Notification, NotificationId, NotificationKind};
use crate::repo::notification_repo::{NotificationRepository, OverdueQueueResult};
use crate::repo::{RepoError, RepoResult};
use crate::service::borrowing_service::BorrowingEvents;
use log::debug;

pub struct NotificationDispatcher<R: NotificationRepository, C: Clock> {
    repo: R,
    clock: C,
    max_attempts: u32,
}

impl<R: NotificationRepository, C: Clock> NotificationDispatcher<R, C> {
    /// `max_attempts` is the attempt budget given to every new job.
    pub fn new(repo: R, clock: C, max_attempts: u32) -> Self {
        Self {
            repo,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn notify_new_borrowing(&self, borrowing_id: BorrowingId) -> RepoResult<NotificationId> {
        let notification = Notification::for_borrowing(
            NotificationKind::NewBorrowing,
            borrowing_id,
            self.clock.now_ms(),
        );
        let id = self.repo.create_queued(&notification, self.max_attempts)?;
        debug!(
            "event=notification_queued module=dispatcher status=ok notification_id={} type={} borrowing_id={}",
            id, notification.kind, borrowing_id
        );
        Ok(id)
    }

    /// Queues an overdue alert unless one was delivered or is still pending.
    pub fn notify_overdue(&self, borrowing_id: BorrowingId) -> RepoResult<OverdueQueueResult> {
        let notification = Notification::for_borrowing(
            NotificationKind::Overdue,
            borrowing_id,
            self.clock.now_ms(),
        );
        let result = self
            .repo
            .queue_overdue_alert(&notification, self.max_attempts)?;
        if result == OverdueQueueResult::Queued {
            debug!(
                "event=notification_queued module=dispatcher status=ok notification_id={} type={} borrowing_id={}",
                notification.id, notification.kind, borrowing_id
            );
        }
        Ok(result)
    }
}

impl<R: NotificationRepository, C: Clock> BorrowingEvents for NotificationDispatcher<R, C> {
    fn on_borrowing_created(&self, borrowing: &Borrowing) -> Result<(), RepoError> {
        self.notify_new_borrowing(borrowing.id).map(|_| ())
    }
}
