//! Admin notification record and its delivery state machine.
//!
//! # Invariants
//! - Status moves `PENDING -> SENT`, `PENDING -> FAILED` or
//!   `FAILED -> PENDING` (retry/requeue). `SENT` is terminal.
//! - `error_message` is never cleared once written; a later success keeps
//!   the last failure for audit.
//! - Unrecognized persisted types are preserved as `Other`, not rejected.

use super::borrowing::BorrowingId;
use super::payment::PaymentId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type NotificationId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    NewBorrowing,
    Overdue,
    /// Type written by another producer; rendered with fallback text.
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewBorrowing => "NEW_BORROWING",
            Self::Overdue => "OVERDUE",
            Self::Other(value) => value.as_str(),
        }
    }
}

impl From<String> for NotificationKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "NEW_BORROWING" => Self::NewBorrowing,
            "OVERDUE" => Self::Overdue,
            _ => Self::Other(value),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(value: NotificationKind) -> Self {
        match value {
            NotificationKind::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent) | (Self::Pending, Self::Failed) | (Self::Failed, Self::Pending)
        )
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: NotificationStatus,
    pub to: NotificationStatus,
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification cannot move from {} to {}", self.from, self.to)
    }
}

impl Error for TransitionError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub borrowing_id: Option<BorrowingId>,
    pub payment_id: Option<PaymentId>,
    pub status: NotificationStatus,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds of the successful delivery.
    pub sent_at: Option<i64>,
    pub error_message: Option<String>,
}

impl Notification {
    /// Creates a pending notification about one borrowing.
    pub fn for_borrowing(kind: NotificationKind, borrowing_id: BorrowingId, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            borrowing_id: Some(borrowing_id),
            payment_id: None,
            status: NotificationStatus::Pending,
            created_at,
            sent_at: None,
            error_message: None,
        }
    }

    pub fn mark_sent(&mut self, sent_at: i64) -> Result<(), TransitionError> {
        self.transition(NotificationStatus::Sent)?;
        self.sent_at = Some(sent_at);
        Ok(())
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(NotificationStatus::Failed)?;
        self.error_message = Some(error_message.into());
        Ok(())
    }

    /// Puts a failed notification back in line for another attempt.
    pub fn reopen(&mut self) -> Result<(), TransitionError> {
        self.transition(NotificationStatus::Pending)
    }

    fn transition(&mut self, next: NotificationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
