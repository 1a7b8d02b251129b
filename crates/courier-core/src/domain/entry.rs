//! Queue entries: one dispatch attempt of a task against an executor type.
//!
//! State transitions:
//! - queued -> claimed -> dispatched -> completed
//! - claimed | dispatched -> failed (a fresh queued attempt is created while
//!   retry budget remains)
//! - claimed | dispatched -> quarantine (on the failure that exhausts the budget)
//! - queued | claimed | dispatched -> cancelled (administrative)
//! - quarantine -> queued (explicit operator reset)
//!
//! At most one entry per task may be in an active state (queued, claimed,
//! dispatched) at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DispatchError;
use super::executor::ExecutorType;
use super::ids::{EntryId, TaskId, TenantId};
use super::task::Rating;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Claimed,
    Dispatched,
    Completed,
    Failed,
    Quarantine,
    Cancelled,
}

impl EntryStatus {
    pub const ALL: [EntryStatus; 7] = [
        EntryStatus::Queued,
        EntryStatus::Claimed,
        EntryStatus::Dispatched,
        EntryStatus::Completed,
        EntryStatus::Failed,
        EntryStatus::Quarantine,
        EntryStatus::Cancelled,
    ];

    /// States that hold the task's single active slot.
    pub const ACTIVE: &'static [EntryStatus] = &[
        EntryStatus::Queued,
        EntryStatus::Claimed,
        EntryStatus::Dispatched,
    ];

    /// States from which an entry may be completed or failed.
    pub const IN_FLIGHT: &'static [EntryStatus] = &[EntryStatus::Claimed, EntryStatus::Dispatched];

    /// Terminal states eligible for stale cleanup.
    pub const RETIRED: &'static [EntryStatus] = &[
        EntryStatus::Completed,
        EntryStatus::Failed,
        EntryStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::Claimed => "claimed",
            EntryStatus::Dispatched => "dispatched",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Quarantine => "quarantine",
            EntryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s.trim())
            .ok_or_else(|| DispatchError::InvalidInput(format!("unknown entry status '{s}'")))
    }
}

/// Dispatch priority, `urgency × importance`, always within 1..=25.
///
/// Computed once when the entry is created and never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 25;

    pub fn from_ratings(urgency: Rating, importance: Rating) -> Self {
        Self(urgency.get() * importance.get())
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = DispatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(DispatchError::InvalidInput(format!(
                "priority must be within 1..=25, got {value}"
            )));
        }
        Ok(Self(value))
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.0
    }
}

/// Snapshot of decrypted task fields handed to the executor.
///
/// Captured at entry creation so execution never re-reads or re-decrypts the
/// task store. Serialized to JSON only at the store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryContext {
    pub task_id: TaskId,
    pub tenant: TenantId,
    pub title: String,
    pub description: String,
    pub domain: String,
    pub urgency: Rating,
    pub importance: Rating,
    pub due_at: Option<DateTime<Utc>>,
    pub executor: ExecutorType,
    /// Routing tag that selected the executor, `None` when the default applied.
    pub routed_by: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl EntryContext {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.title.trim().is_empty() {
            return Err(DispatchError::InvalidInput(
                "entry context title must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn priority(&self) -> Priority {
        Priority::from_ratings(self.urgency, self.importance)
    }
}

/// Input for creating a queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub id: EntryId,
    pub task_id: TaskId,
    pub executor: ExecutorType,
    pub priority: Priority,
    pub context: EntryContext,
    pub max_retries: u32,
    pub queued_at: DateTime<Utc>,
}

/// A stored queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub tenant: TenantId,
    pub task_id: TaskId,
    pub executor: ExecutorType,
    pub status: EntryStatus,
    pub priority: Priority,
    pub context: EntryContext,
    pub retry_count: u32,
    pub max_retries: u32,
    pub queued_at: DateTime<Utc>,
    /// Earliest time a retry attempt may be claimed.
    pub available_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_product_of_ratings() {
        let p = Priority::from_ratings(Rating::new(5).unwrap(), Rating::new(4).unwrap());
        assert_eq!(p.get(), 20);
        let lowest = Priority::from_ratings(Rating::new(1).unwrap(), Rating::new(1).unwrap());
        assert_eq!(lowest.get(), 1);
        assert!(Priority::try_from(26).is_err());
    }

    #[test]
    fn active_and_terminal_partition() {
        for st in EntryStatus::ALL {
            assert_ne!(st.is_active(), st.is_terminal());
        }
        assert!(EntryStatus::Claimed.is_active());
        assert!(EntryStatus::Quarantine.is_terminal());
    }

    #[test]
    fn status_text_round_trips() {
        for st in EntryStatus::ALL {
            assert_eq!(st.as_str().parse::<EntryStatus>().unwrap(), st);
        }
    }
}
