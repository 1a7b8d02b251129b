//! StepJournal port - persisted step outputs for resumable execution.
//!
//! Running an entry is split into steps. Each step's output is written before
//! the next step starts, so a driver that crashes in between can pick up from
//! the journal instead of calling the executor again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{DispatchError, EntryId, EntryResult, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Executor call finished; output is the `EntryResult`.
    Invoke,
    /// Result applied to the queue.
    Apply,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Invoke => "invoke",
            Step::Apply => "apply",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry whose executor result was journaled but never applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApply {
    pub entry: EntryId,
    pub result: EntryResult,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait StepJournal: Send + Sync {
    /// Write a step output. Writing the same step twice keeps the first value.
    async fn put_step(
        &self,
        tenant: &TenantId,
        entry: EntryId,
        step: Step,
        output: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError>;

    async fn get_step(
        &self,
        tenant: &TenantId,
        entry: EntryId,
        step: Step,
    ) -> Result<Option<serde_json::Value>, DispatchError>;

    /// `invoke` steps with no matching `apply`, oldest first.
    async fn pending_applies(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<PendingApply>, DispatchError>;
}
