//! Retry-driven notification delivery.
//!
//! # Responsibility
//! - Claim due delivery jobs, render the admin message and send it to every
//!   configured recipient.
//! - Record each attempt's outcome and schedule bounded retries.
//!
//! # Invariants
//! - Only the worker holding a job's claim token sends or records an outcome.
//! - A failed attempt always leaves the notification `FAILED` with the error
//!   text; a claimed retry moves it back to `PENDING`.
//! - Success sets `SENT` and `sent_at` and keeps any earlier error message.
//! - Transport failures never escape as errors; they become attempt outcomes.
//! - A batch claims one job at a time; an error on one job is recorded as a
//!   failed attempt and the batch moves on.

use crate::clock::Clock;
use crate::model::delivery_job::{DeliveryJob, RetryDecision, RetryPolicy};
use crate::model::notification::{
    Notification, NotificationId, NotificationKind, TransitionError,
};
use crate::repo::ledger_repo::LedgerRepository;
use crate::repo::notification_repo::{NotificationListQuery, NotificationRepository};
use crate::repo::RepoError;
use crate::transport::{MessageTransport, TransportError};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const UNKNOWN_NOTIFICATION_TEXT: &str = "Unknown notification";

/// Engine settings derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub policy: RetryPolicy,
    /// How long a claim stays exclusive before another worker may take over.
    pub claim_lease: Duration,
    /// Admin chat ids; every one must accept the message for success.
    pub recipients: Vec<String>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            claim_lease: Duration::from_secs(300),
            recipients: Vec::new(),
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Attempt failed; another is scheduled.
    RetryScheduled { attempt: u32, next_attempt_at: i64 },
    /// Attempt failed and the budget is spent.
    Exhausted { attempts: u32 },
    /// Job was not claimable (not due, owned elsewhere, or finished).
    Skipped,
}

/// Per-job entry of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub notification_id: NotificationId,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug)]
pub enum DeliveryError {
    NotificationNotFound(NotificationId),
    /// Operation not allowed in the notification's current state.
    InvalidState(String),
    Transition(TransitionError),
    Repo(RepoError),
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotificationNotFound(id) => write!(f, "notification not found: {id}"),
            Self::InvalidState(message) => write!(f, "{message}"),
            Self::Transition(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DeliveryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transition(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for DeliveryError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                entity: "notification",
                id,
            } => Self::NotificationNotFound(id),
            RepoError::InvalidState(message) => Self::InvalidState(message),
            other => Self::Repo(other),
        }
    }
}

impl From<TransitionError> for DeliveryError {
    fn from(value: TransitionError) -> Self {
        Self::Transition(value)
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Delivers queued notifications with bounded fixed-delay retries.
pub struct DeliveryEngine<N, L, T, C>
where
    N: NotificationRepository,
    L: LedgerRepository,
    T: MessageTransport,
    C: Clock,
{
    notifications: N,
    ledger: L,
    transport: T,
    clock: C,
    options: DeliveryOptions,
}

impl<N, L, T, C> DeliveryEngine<N, L, T, C>
where
    N: NotificationRepository,
    L: LedgerRepository,
    T: MessageTransport,
    C: Clock,
{
    pub fn new(notifications: N, ledger: L, transport: T, clock: C, options: DeliveryOptions) -> Self {
        Self {
            notifications,
            ledger,
            transport,
            clock,
            options,
        }
    }

    /// Ensures a delivery job exists; `false` if one was already present or
    /// the notification is already sent.
    pub fn enqueue(&self, id: NotificationId) -> DeliveryResult<bool> {
        Ok(self.notifications.ensure_job(
            id,
            self.options.policy.max_attempts,
            self.clock.now_ms(),
        )?)
    }

    /// Attempts one notification now if its job is due.
    pub fn deliver(&self, id: NotificationId) -> DeliveryResult<DeliveryOutcome> {
        let token = Uuid::new_v4();
        let claimed = self.notifications.claim_job(
            id,
            token,
            self.clock.now_ms(),
            self.lease_ms(),
        )?;
        Ok(match claimed {
            Some(job) => self
                .attempt(&job, token)
                .unwrap_or_else(|err| self.fail_broken_attempt(&job, token, &err)),
            None => DeliveryOutcome::Skipped,
        })
    }

    /// Claims up to `limit` due jobs and attempts each of them.
    pub fn run_due(&self, limit: u32) -> DeliveryResult<Vec<DeliveryReport>> {
        let now_ms = self.clock.now_ms();
        let abandoned = self
            .notifications
            .expire_abandoned_claims(now_ms, self.lease_ms())?;
        if abandoned > 0 {
            warn!(
                "event=delivery_claims_expired module=delivery status=error count={}",
                abandoned
            );
        }

        // One claim per attempt so every lease starts when its send does.
        let mut reports = Vec::new();
        for _ in 0..limit {
            let token = Uuid::new_v4();
            let Some(job) = self
                .notifications
                .claim_next_due(token, self.clock.now_ms(), self.lease_ms())?
            else {
                break;
            };
            let outcome = match self.attempt(&job, token) {
                Ok(outcome) => outcome,
                Err(err) => self.fail_broken_attempt(&job, token, &err),
            };
            reports.push(DeliveryReport {
                notification_id: job.notification_id,
                outcome,
            });
        }
        Ok(reports)
    }

    /// Gives a FAILED notification a fresh attempt budget.
    pub fn requeue(&self, id: NotificationId) -> DeliveryResult<()> {
        self.notifications
            .requeue(id, self.options.policy.max_attempts, self.clock.now_ms())?;
        info!(
            "event=notification_requeued module=delivery status=ok notification_id={}",
            id
        );
        Ok(())
    }

    pub fn get_notification(&self, id: NotificationId) -> DeliveryResult<Notification> {
        self.notifications
            .get_notification(id)?
            .ok_or(DeliveryError::NotificationNotFound(id))
    }

    pub fn list_notifications(&self, query: &NotificationListQuery) -> DeliveryResult<Vec<Notification>> {
        Ok(self.notifications.list_notifications(query)?)
    }

    /// Builds the admin-facing text for a notification.
    pub fn render_message(&self, notification: &Notification) -> DeliveryResult<String> {
        let record = match notification.borrowing_id {
            Some(borrowing_id) => self.ledger.get_borrowing(borrowing_id)?,
            None => None,
        };
        let Some(record) = record else {
            return Ok(UNKNOWN_NOTIFICATION_TEXT.to_string());
        };

        let due = record.borrowing.expected_return_date;
        Ok(match notification.kind {
            NotificationKind::NewBorrowing => format!(
                "New borrowing: {} by {}, due {}",
                record.book_title, record.user_email, due
            ),
            NotificationKind::Overdue => format!(
                "Overdue borrowing: {} by {}, was due {}",
                record.book_title, record.user_email, due
            ),
            NotificationKind::Other(_) => UNKNOWN_NOTIFICATION_TEXT.to_string(),
        })
    }

    fn attempt(&self, job: &DeliveryJob, token: Uuid) -> DeliveryResult<DeliveryOutcome> {
        let started_at = Instant::now();
        let Some(mut notification) = self.notifications.get_notification(job.notification_id)?
        else {
            return Ok(DeliveryOutcome::Skipped);
        };

        let text = self.render_message(&notification)?;
        match self.send_to_all(&text) {
            Ok(()) => {
                let now_ms = self.clock.now_ms();
                notification.mark_sent(now_ms)?;
                match self.notifications.record_sent(&notification, token, now_ms) {
                    Ok(()) => {}
                    Err(RepoError::ClaimLost(id)) => return Ok(claim_lost(id)),
                    Err(err) => return Err(err.into()),
                }
                info!(
                    "event=notification_delivery module=delivery status=ok notification_id={} type={} attempt={} duration_ms={}",
                    notification.id,
                    notification.kind,
                    job.attempts,
                    started_at.elapsed().as_millis()
                );
                Ok(DeliveryOutcome::Sent)
            }
            Err(err) => {
                let now_ms = self.clock.now_ms();
                let decision = self.policy_for(job).after_failure(job.attempts, now_ms);
                notification.mark_failed(err.to_string())?;
                match self
                    .notifications
                    .record_failure(&notification, token, decision, now_ms)
                {
                    Ok(()) => {}
                    Err(RepoError::ClaimLost(id)) => return Ok(claim_lost(id)),
                    Err(repo_err) => return Err(repo_err.into()),
                }
                warn!(
                    "event=notification_delivery module=delivery status=error notification_id={} type={} attempt={} max_attempts={} duration_ms={} error={}",
                    notification.id,
                    notification.kind,
                    job.attempts,
                    job.max_attempts,
                    started_at.elapsed().as_millis(),
                    err
                );
                Ok(outcome_for(decision, job.attempts))
            }
        }
    }

    /// Closes a claimed attempt that errored outside the transport so the
    /// rest of the batch still runs.
    fn fail_broken_attempt(
        &self,
        job: &DeliveryJob,
        token: Uuid,
        err: &DeliveryError,
    ) -> DeliveryOutcome {
        let now_ms = self.clock.now_ms();
        let decision = self.policy_for(job).after_failure(job.attempts, now_ms);
        let error_message = format!("delivery error: {err}");
        warn!(
            "event=notification_delivery module=delivery status=error notification_id={} attempt={} max_attempts={} error={}",
            job.notification_id, job.attempts, job.max_attempts, err
        );

        match self.notifications.fail_attempt(
            job.notification_id,
            token,
            decision,
            &error_message,
            now_ms,
        ) {
            Ok(()) => outcome_for(decision, job.attempts),
            Err(RepoError::ClaimLost(id)) => claim_lost(id),
            Err(release_err) => {
                // The claim stays until its lease runs out.
                error!(
                    "event=delivery_release module=delivery status=error notification_id={} error={}",
                    job.notification_id, release_err
                );
                DeliveryOutcome::Skipped
            }
        }
    }

    fn policy_for(&self, job: &DeliveryJob) -> RetryPolicy {
        RetryPolicy {
            max_attempts: job.max_attempts,
            retry_delay: self.options.policy.retry_delay,
        }
    }

    fn send_to_all(&self, text: &str) -> Result<(), TransportError> {
        if self.options.recipients.is_empty() {
            warn!("event=notification_delivery module=delivery status=skip reason=no_recipients");
            return Ok(());
        }
        for recipient in &self.options.recipients {
            self.transport.send(recipient, text)?;
        }
        Ok(())
    }

    fn lease_ms(&self) -> i64 {
        i64::try_from(self.options.claim_lease.as_millis()).unwrap_or(i64::MAX)
    }
}

fn outcome_for(decision: RetryDecision, attempt: u32) -> DeliveryOutcome {
    match decision {
        RetryDecision::RetryAt(next_attempt_at) => DeliveryOutcome::RetryScheduled {
            attempt,
            next_attempt_at,
        },
        RetryDecision::Exhausted => DeliveryOutcome::Exhausted { attempts: attempt },
    }
}

fn claim_lost(id: NotificationId) -> DeliveryOutcome {
    warn!(
        "event=notification_delivery module=delivery status=skip reason=claim_lost notification_id={}",
        id
    );
    DeliveryOutcome::Skipped
}
