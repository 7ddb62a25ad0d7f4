//! Overdue sweeper.
//!
//! # Invariants
//! - Only open borrowings due strictly before `today` are considered.
//! - A borrowing with a SENT overdue alert is never alerted again.
//! - A borrowing whose overdue alert is still queued or being sent is
//!   skipped, so overlapping sweeps cannot queue two live alerts.
//! - Alerts that exhausted their retries do not block a new one.

use crate::clock::Clock;
use crate::repo::ledger_repo::LedgerRepository;
use crate::repo::notification_repo::{NotificationRepository, OverdueQueueResult};
use crate::repo::RepoResult;
use crate::service::dispatcher::NotificationDispatcher;
use chrono::NaiveDate;
use log::info;
use std::time::Instant;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue borrowings examined.
    pub scanned: usize,
    pub queued: usize,
    pub already_sent: usize,
    pub in_flight: usize,
}

pub struct OverdueSweeper<'d, L: LedgerRepository, N: NotificationRepository, C: Clock> {
    ledger: L,
    dispatcher: &'d NotificationDispatcher<N, C>,
}

impl<'d, L: LedgerRepository, N: NotificationRepository, C: Clock> OverdueSweeper<'d, L, N, C> {
    pub fn new(ledger: L, dispatcher: &'d NotificationDispatcher<N, C>) -> Self {
        Self { ledger, dispatcher }
    }

    /// Queues overdue alerts for every open borrowing due before `today`.
    pub fn sweep_overdue(&self, today: NaiveDate) -> RepoResult<SweepReport> {
        let started_at = Instant::now();
        let overdue = self.ledger.list_overdue(today)?;
        let mut report = SweepReport {
            scanned: overdue.len(),
            ..SweepReport::default()
        };

        for record in &overdue {
            match self.dispatcher.notify_overdue(record.borrowing.id)? {
                OverdueQueueResult::Queued => report.queued += 1,
                OverdueQueueResult::AlreadySent => report.already_sent += 1,
                OverdueQueueResult::InFlight => report.in_flight += 1,
            }
        }

        info!(
            "event=overdue_sweep module=sweeper status=ok today={} scanned={} queued={} already_sent={} in_flight={} duration_ms={}",
            today,
            report.scanned,
            report.queued,
            report.already_sent,
            report.in_flight,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }
}
