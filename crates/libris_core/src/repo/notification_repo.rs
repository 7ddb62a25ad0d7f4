//! Notification outbox repository.
//!
//! # Responsibility
//! - Persist notifications together with their durable delivery job.
//! - Provide claim/complete/reschedule primitives for delivery workers.
//! - Answer the overdue sweep's "already alerted?" question atomically.
//!
//! # Invariants
//! - A notification and its job are created in one transaction.
//! - A job is claimed with compare-and-set; outcome writes require the
//!   claim token, so a worker whose lease expired cannot overwrite a newer
//!   attempt.
//! - Claiming a retry moves the notification `FAILED -> PENDING`.

use super::{parse_count, parse_optional_uuid, parse_uuid, push_pagination, RepoError, RepoResult};
use crate::model::borrowing::BorrowingId;
use crate::model::delivery_job::{DeliveryJob, JobState, RetryDecision};
use crate::model::notification::{
    Notification, NotificationId, NotificationKind, NotificationStatus,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use uuid::Uuid;

const NOTIFICATION_SELECT_SQL: &str = "SELECT
    id,
    type,
    borrowing_id,
    payment_id,
    status,
    created_at,
    sent_at,
    error_message
FROM notifications";

const JOB_SELECT_SQL: &str = "SELECT
    notification_id,
    state,
    attempts,
    max_attempts,
    next_attempt_at,
    claim_token,
    claimed_at,
    last_error
FROM delivery_jobs";

/// Claimable: queued and due, or claimed by a worker whose lease ran out.
/// Binds: ?1 = now, ?2 = lease cutoff.
const CLAIMABLE_SQL: &str = "attempts < max_attempts
    AND (
        (state = 'queued' AND next_attempt_at <= ?1)
        OR (state = 'claimed' AND claimed_at <= ?2)
    )";

/// Query options for listing notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationListQuery {
    pub status: Option<NotificationStatus>,
    pub kind: Option<NotificationKind>,
    pub borrowing_id: Option<BorrowingId>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Result of asking to queue an overdue alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverdueQueueResult {
    Queued,
    /// An overdue alert for this borrowing was already delivered.
    AlreadySent,
    /// An overdue alert for this borrowing is still waiting or being sent.
    InFlight,
}

/// Repository interface for notifications and their delivery jobs.
pub trait NotificationRepository {
    /// Inserts a pending notification and a job due immediately.
    fn create_queued(&self, notification: &Notification, max_attempts: u32)
        -> RepoResult<NotificationId>;
    /// Queues an overdue alert unless one was already sent or is in flight.
    fn queue_overdue_alert(
        &self,
        notification: &Notification,
        max_attempts: u32,
    ) -> RepoResult<OverdueQueueResult>;
    /// Inserts a job for an existing notification; `false` if one exists.
    fn ensure_job(&self, id: NotificationId, max_attempts: u32, now_ms: i64) -> RepoResult<bool>;
    fn get_notification(&self, id: NotificationId) -> RepoResult<Option<Notification>>;
    fn list_notifications(&self, query: &NotificationListQuery) -> RepoResult<Vec<Notification>>;
    fn get_job(&self, id: NotificationId) -> RepoResult<Option<DeliveryJob>>;
    /// Claims one job if it is due; `None` when not claimable.
    fn claim_job(
        &self,
        id: NotificationId,
        token: Uuid,
        now_ms: i64,
        lease_ms: i64,
    ) -> RepoResult<Option<DeliveryJob>>;
    /// Claims the earliest due job; `None` when nothing is claimable.
    fn claim_next_due(&self, token: Uuid, now_ms: i64, lease_ms: i64)
        -> RepoResult<Option<DeliveryJob>>;
    /// Persists a SENT notification and closes its job.
    fn record_sent(&self, notification: &Notification, token: Uuid, now_ms: i64) -> RepoResult<()>;
    /// Persists a FAILED notification and reschedules or exhausts its job.
    fn record_failure(
        &self,
        notification: &Notification,
        token: Uuid,
        decision: RetryDecision,
        now_ms: i64,
    ) -> RepoResult<()>;
    /// Records an attempt that broke before an outcome could be stored.
    fn fail_attempt(
        &self,
        id: NotificationId,
        token: Uuid,
        decision: RetryDecision,
        error_message: &str,
        now_ms: i64,
    ) -> RepoResult<()>;
    /// Gives a FAILED notification a fresh attempt budget.
    fn requeue(&self, id: NotificationId, max_attempts: u32, now_ms: i64) -> RepoResult<()>;
    /// Fails jobs whose final attempt was abandoned by a dead worker.
    fn expire_abandoned_claims(&self, now_ms: i64, lease_ms: i64) -> RepoResult<usize>;
}

/// SQLite-backed notification outbox.
pub struct SqliteNotificationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotificationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl NotificationRepository for SqliteNotificationRepository<'_> {
    fn create_queued(
        &self,
        notification: &Notification,
        max_attempts: u32,
    ) -> RepoResult<NotificationId> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        insert_with_job(&tx, notification, max_attempts)?;
        tx.commit()?;
        Ok(notification.id)
    }

    fn queue_overdue_alert(
        &self,
        notification: &Notification,
        max_attempts: u32,
    ) -> RepoResult<OverdueQueueResult> {
        let borrowing_id = notification
            .borrowing_id
            .ok_or_else(|| RepoError::InvalidState("overdue alert without borrowing".into()))?
            .to_string();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let already_sent: i64 = tx.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM notifications
                WHERE borrowing_id = ?1
                  AND type = 'OVERDUE'
                  AND status = 'SENT'
            );",
            [borrowing_id.as_str()],
            |row| row.get(0),
        )?;
        if already_sent == 1 {
            return Ok(OverdueQueueResult::AlreadySent);
        }

        let in_flight: i64 = tx.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM notifications n
                INNER JOIN delivery_jobs j ON j.notification_id = n.id
                WHERE n.borrowing_id = ?1
                  AND n.type = 'OVERDUE'
                  AND j.state IN ('queued', 'claimed')
            );",
            [borrowing_id.as_str()],
            |row| row.get(0),
        )?;
        if in_flight == 1 {
            return Ok(OverdueQueueResult::InFlight);
        }

        insert_with_job(&tx, notification, max_attempts)?;
        tx.commit()?;
        Ok(OverdueQueueResult::Queued)
    }

    fn ensure_job(&self, id: NotificationId, max_attempts: u32, now_ms: i64) -> RepoResult<bool> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let notification = load_notification(&tx, id)?.ok_or(RepoError::NotFound {
            entity: "notification",
            id,
        })?;
        if notification.status == NotificationStatus::Sent {
            return Ok(false);
        }
        let inserted = tx.execute(
            "INSERT INTO delivery_jobs (
                notification_id,
                state,
                attempts,
                max_attempts,
                next_attempt_at,
                updated_at
            ) VALUES (?1, 'queued', 0, ?2, ?3, ?3)
            ON CONFLICT (notification_id) DO NOTHING;",
            params![id.to_string(), i64::from(max_attempts.max(1)), now_ms],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn get_notification(&self, id: NotificationId) -> RepoResult<Option<Notification>> {
        load_notification(self.conn, id)
    }

    fn list_notifications(&self, query: &NotificationListQuery) -> RepoResult<Vec<Notification>> {
        let mut sql = format!("{NOTIFICATION_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(kind) = query.kind.as_ref() {
            sql.push_str(" AND type = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(borrowing_id) = query.borrowing_id {
            sql.push_str(" AND borrowing_id = ?");
            bind_values.push(Value::Text(borrowing_id.to_string()));
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC");
        push_pagination(&mut sql, &mut bind_values, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next()? {
            notifications.push(parse_notification_row(row)?);
        }
        Ok(notifications)
    }

    fn get_job(&self, id: NotificationId) -> RepoResult<Option<DeliveryJob>> {
        load_job(self.conn, id)
    }

    fn claim_job(
        &self,
        id: NotificationId,
        token: Uuid,
        now_ms: i64,
        lease_ms: i64,
    ) -> RepoResult<Option<DeliveryJob>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !claim_in_tx(&tx, id, token, now_ms, lease_ms)? {
            return Ok(None);
        }
        let job = load_job(&tx, id)?;
        tx.commit()?;
        Ok(job)
    }

    fn claim_next_due(
        &self,
        token: Uuid,
        now_ms: i64,
        lease_ms: i64,
    ) -> RepoResult<Option<DeliveryJob>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let candidate: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT notification_id
                     FROM delivery_jobs
                     WHERE {CLAIMABLE_SQL}
                     ORDER BY next_attempt_at ASC, notification_id ASC
                     LIMIT 1;"
                ),
                params![now_ms, now_ms.saturating_sub(lease_ms)],
                |row| row.get(0),
            )
            .optional()?;
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let id = parse_uuid(&candidate, "delivery_jobs.notification_id")?;
        if !claim_in_tx(&tx, id, token, now_ms, lease_ms)? {
            return Ok(None);
        }
        let job = load_job(&tx, id)?;
        tx.commit()?;
        Ok(job)
    }

    fn record_sent(&self, notification: &Notification, token: Uuid, now_ms: i64) -> RepoResult<()> {
        if notification.status != NotificationStatus::Sent {
            return Err(RepoError::InvalidState(format!(
                "record_sent expects SENT, got {}",
                notification.status
            )));
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        release_claim(&tx, notification.id, token, JobState::Done, None, None, now_ms)?;

        tx.execute(
            "UPDATE notifications
             SET status = 'SENT',
                 sent_at = ?2
             WHERE id = ?1
               AND status = 'PENDING';",
            params![notification.id.to_string(), notification.sent_at],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn record_failure(
        &self,
        notification: &Notification,
        token: Uuid,
        decision: RetryDecision,
        now_ms: i64,
    ) -> RepoResult<()> {
        if notification.status != NotificationStatus::Failed {
            return Err(RepoError::InvalidState(format!(
                "record_failure expects FAILED, got {}",
                notification.status
            )));
        }
        let error_message = notification.error_message.as_deref().unwrap_or_default();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        fail_in_tx(&tx, notification.id, token, decision, error_message, now_ms)?;
        tx.commit()?;
        Ok(())
    }

    fn fail_attempt(
        &self,
        id: NotificationId,
        token: Uuid,
        decision: RetryDecision,
        error_message: &str,
        now_ms: i64,
    ) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        fail_in_tx(&tx, id, token, decision, error_message, now_ms)?;
        tx.commit()?;
        Ok(())
    }

    fn requeue(&self, id: NotificationId, max_attempts: u32, now_ms: i64) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut notification = load_notification(&tx, id)?.ok_or(RepoError::NotFound {
            entity: "notification",
            id,
        })?;
        if notification.reopen().is_err() {
            return Err(RepoError::InvalidState(format!(
                "only FAILED notifications can be requeued, {id} is {}",
                notification.status
            )));
        }
        if let Some(job) = load_job(&tx, id)? {
            if job.is_live() {
                return Err(RepoError::InvalidState(format!(
                    "notification {id} still has a live delivery job"
                )));
            }
        }

        tx.execute(
            "INSERT INTO delivery_jobs (
                notification_id,
                state,
                attempts,
                max_attempts,
                next_attempt_at,
                updated_at
            ) VALUES (?1, 'queued', 0, ?2, ?3, ?3)
            ON CONFLICT (notification_id) DO UPDATE SET
                state = 'queued',
                attempts = 0,
                max_attempts = excluded.max_attempts,
                next_attempt_at = excluded.next_attempt_at,
                claim_token = NULL,
                claimed_at = NULL,
                updated_at = excluded.updated_at;",
            params![id.to_string(), i64::from(max_attempts.max(1)), now_ms],
        )?;
        tx.execute(
            "UPDATE notifications SET status = ?2 WHERE id = ?1 AND status = 'FAILED';",
            params![id.to_string(), notification.status.as_str()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn expire_abandoned_claims(&self, now_ms: i64, lease_ms: i64) -> RepoResult<usize> {
        const ABANDONED: &str = "delivery abandoned: worker lease expired on final attempt";

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let cutoff = now_ms.saturating_sub(lease_ms);
        tx.execute(
            "UPDATE notifications
             SET status = 'FAILED',
                 error_message = ?2
             WHERE status = 'PENDING'
               AND id IN (
                 SELECT notification_id
                 FROM delivery_jobs
                 WHERE state = 'claimed'
                   AND claimed_at <= ?1
                   AND attempts >= max_attempts
               );",
            params![cutoff, ABANDONED],
        )?;
        let expired = tx.execute(
            "UPDATE delivery_jobs
             SET state = 'exhausted',
                 claim_token = NULL,
                 last_error = ?2,
                 updated_at = ?3
             WHERE state = 'claimed'
               AND claimed_at <= ?1
               AND attempts >= max_attempts;",
            params![cutoff, ABANDONED, now_ms],
        )?;
        tx.commit()?;
        Ok(expired)
    }
}

fn insert_with_job(
    conn: &Connection,
    notification: &Notification,
    max_attempts: u32,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO notifications (
            id,
            type,
            borrowing_id,
            payment_id,
            status,
            created_at,
            sent_at,
            error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            notification.id.to_string(),
            notification.kind.as_str(),
            notification.borrowing_id.map(|id| id.to_string()),
            notification.payment_id.map(|id| id.to_string()),
            notification.status.as_str(),
            notification.created_at,
            notification.sent_at,
            notification.error_message.as_deref(),
        ],
    )?;
    conn.execute(
        "INSERT INTO delivery_jobs (
            notification_id,
            state,
            attempts,
            max_attempts,
            next_attempt_at,
            updated_at
        ) VALUES (?1, 'queued', 0, ?2, ?3, ?3);",
        params![
            notification.id.to_string(),
            i64::from(max_attempts.max(1)),
            notification.created_at,
        ],
    )?;
    Ok(())
}

fn claim_in_tx(
    conn: &Connection,
    id: NotificationId,
    token: Uuid,
    now_ms: i64,
    lease_ms: i64,
) -> RepoResult<bool> {
    let claimed = conn.execute(
        &format!(
            "UPDATE delivery_jobs
             SET state = 'claimed',
                 attempts = attempts + 1,
                 claim_token = ?3,
                 claimed_at = ?1,
                 updated_at = ?1
             WHERE notification_id = ?4
               AND {CLAIMABLE_SQL};"
        ),
        params![
            now_ms,
            now_ms.saturating_sub(lease_ms),
            token.to_string(),
            id.to_string()
        ],
    )?;
    if claimed == 0 {
        return Ok(false);
    }

    conn.execute(
        "UPDATE notifications SET status = 'PENDING' WHERE id = ?1 AND status = 'FAILED';",
        [id.to_string()],
    )?;
    Ok(true)
}

fn fail_in_tx(
    conn: &Connection,
    id: NotificationId,
    token: Uuid,
    decision: RetryDecision,
    error_message: &str,
    now_ms: i64,
) -> RepoResult<()> {
    let (next_state, next_attempt_at) = match decision {
        RetryDecision::RetryAt(next_attempt_at) => (JobState::Queued, Some(next_attempt_at)),
        RetryDecision::Exhausted => (JobState::Exhausted, None),
    };
    release_claim(
        conn,
        id,
        token,
        next_state,
        next_attempt_at,
        Some(error_message),
        now_ms,
    )?;

    conn.execute(
        "UPDATE notifications
         SET status = 'FAILED',
             error_message = ?2
         WHERE id = ?1
           AND status = 'PENDING';",
        params![id.to_string(), error_message],
    )?;
    Ok(())
}

fn release_claim(
    conn: &Connection,
    id: NotificationId,
    token: Uuid,
    next_state: JobState,
    next_attempt_at: Option<i64>,
    last_error: Option<&str>,
    now_ms: i64,
) -> RepoResult<()> {
    let released = conn.execute(
        "UPDATE delivery_jobs
         SET state = ?3,
             next_attempt_at = COALESCE(?4, next_attempt_at),
             last_error = COALESCE(?5, last_error),
             claim_token = NULL,
             updated_at = ?6
         WHERE notification_id = ?1
           AND claim_token = ?2
           AND state = 'claimed';",
        params![
            id.to_string(),
            token.to_string(),
            job_state_to_db(next_state),
            next_attempt_at,
            last_error,
            now_ms,
        ],
    )?;
    if released == 0 {
        return Err(RepoError::ClaimLost(id));
    }
    Ok(())
}

fn load_notification(conn: &Connection, id: NotificationId) -> RepoResult<Option<Notification>> {
    let mut stmt = conn.prepare(&format!("{NOTIFICATION_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_notification_row(row)?));
    }
    Ok(None)
}

fn load_job(conn: &Connection, id: NotificationId) -> RepoResult<Option<DeliveryJob>> {
    let mut stmt = conn.prepare(&format!("{JOB_SELECT_SQL} WHERE notification_id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_job_row(row)?));
    }
    Ok(None)
}

fn parse_notification_row(row: &Row<'_>) -> RepoResult<Notification> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = parse_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in notifications.status"
        ))
    })?;

    Ok(Notification {
        id: parse_uuid(&id_text, "notifications.id")?,
        kind: NotificationKind::from(row.get::<_, String>("type")?),
        borrowing_id: parse_optional_uuid(row.get("borrowing_id")?, "notifications.borrowing_id")?,
        payment_id: parse_optional_uuid(row.get("payment_id")?, "notifications.payment_id")?,
        status,
        created_at: row.get("created_at")?,
        sent_at: row.get("sent_at")?,
        error_message: row.get("error_message")?,
    })
}

fn parse_job_row(row: &Row<'_>) -> RepoResult<DeliveryJob> {
    let id_text: String = row.get("notification_id")?;
    let state_text: String = row.get("state")?;
    let state = parse_job_state(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid job state `{state_text}` in delivery_jobs.state"))
    })?;

    Ok(DeliveryJob {
        notification_id: parse_uuid(&id_text, "delivery_jobs.notification_id")?,
        state,
        attempts: parse_count(row.get("attempts")?, "delivery_jobs.attempts")?,
        max_attempts: parse_count(row.get("max_attempts")?, "delivery_jobs.max_attempts")?,
        next_attempt_at: row.get("next_attempt_at")?,
        claim_token: parse_optional_uuid(row.get("claim_token")?, "delivery_jobs.claim_token")?,
        claimed_at: row.get("claimed_at")?,
        last_error: row.get("last_error")?,
    })
}

fn parse_status(value: &str) -> Option<NotificationStatus> {
    match value {
        "PENDING" => Some(NotificationStatus::Pending),
        "SENT" => Some(NotificationStatus::Sent),
        "FAILED" => Some(NotificationStatus::Failed),
        _ => None,
    }
}

fn job_state_to_db(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "queued",
        JobState::Claimed => "claimed",
        JobState::Done => "done",
        JobState::Exhausted => "exhausted",
    }
}

fn parse_job_state(value: &str) -> Option<JobState> {
    match value {
        "queued" => Some(JobState::Queued),
        "claimed" => Some(JobState::Claimed),
        "done" => Some(JobState::Done),
        "exhausted" => Some(JobState::Exhausted),
        _ => None,
    }
}
