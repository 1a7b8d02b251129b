//! Append-only dispatch audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DispatchError;
use super::executor::ExecutorType;
use super::ids::{EntryId, TaskId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Created,
    Claimed,
    Dispatched,
    Completed,
    Failed,
    Retried,
    Quarantined,
    Abandoned,
    Reset,
    Cancelled,
    Reaped,
    Unblocked,
    Purged,
}

impl DispatchAction {
    pub const ALL: [DispatchAction; 13] = [
        DispatchAction::Created,
        DispatchAction::Claimed,
        DispatchAction::Dispatched,
        DispatchAction::Completed,
        DispatchAction::Failed,
        DispatchAction::Retried,
        DispatchAction::Quarantined,
        DispatchAction::Abandoned,
        DispatchAction::Reset,
        DispatchAction::Cancelled,
        DispatchAction::Reaped,
        DispatchAction::Unblocked,
        DispatchAction::Purged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchAction::Created => "created",
            DispatchAction::Claimed => "claimed",
            DispatchAction::Dispatched => "dispatched",
            DispatchAction::Completed => "completed",
            DispatchAction::Failed => "failed",
            DispatchAction::Retried => "retried",
            DispatchAction::Quarantined => "quarantined",
            DispatchAction::Abandoned => "abandoned",
            DispatchAction::Reset => "reset",
            DispatchAction::Cancelled => "cancelled",
            DispatchAction::Reaped => "reaped",
            DispatchAction::Unblocked => "unblocked",
            DispatchAction::Purged => "purged",
        }
    }
}

impl fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchAction {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DispatchAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DispatchError::InvalidInput(format!("unknown dispatch action '{s}'")))
    }
}

/// One audit record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLogEntry {
    pub tenant: TenantId,
    pub entry_id: Option<EntryId>,
    pub task_id: Option<TaskId>,
    pub executor: Option<ExecutorType>,
    pub action: DispatchAction,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl DispatchLogEntry {
    pub fn new(tenant: TenantId, action: DispatchAction, recorded_at: DateTime<Utc>) -> Self {
        Self {
            tenant,
            entry_id: None,
            task_id: None,
            executor: None,
            action,
            details: serde_json::Value::Null,
            recorded_at,
        }
    }

    pub fn entry(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    pub fn task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn executor(mut self, executor: ExecutorType) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
