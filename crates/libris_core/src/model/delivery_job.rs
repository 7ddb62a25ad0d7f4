//! Durable delivery job and retry policy.
//!
//! One job row exists per notification. Workers claim a job before sending,
//! so a notification is never delivered by two workers at once.

use super::notification::NotificationId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `next_attempt_at`.
    Queued,
    /// Owned by the worker holding `claim_token`.
    Claimed,
    /// Delivered.
    Done,
    /// Attempt budget spent.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJob {
    pub notification_id: NotificationId,
    pub state: JobState,
    /// Attempts started so far, including a claimed in-flight one.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Unix epoch milliseconds.
    pub next_attempt_at: i64,
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<i64>,
    pub last_error: Option<String>,
}

impl DeliveryJob {
    pub fn is_live(&self) -> bool {
        matches!(self.state, JobState::Queued | JobState::Claimed)
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule the next attempt at this epoch-ms instant.
    RetryAt(i64),
    Exhausted,
}

/// Bounded fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn after_failure(&self, attempts_made: u32, now_ms: i64) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        let delay_ms = i64::try_from(self.retry_delay.as_millis()).unwrap_or(i64::MAX);
        RetryDecision::RetryAt(now_ms.saturating_add(delay_ms))
    }
}
