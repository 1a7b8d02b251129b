//! QueueStore port - queue entries and their lifecycle.
//!
//! Every transition is a conditional update on the entry's current status.
//! The status is the lock: a store never hands out an entry that another
//! caller has already moved out of the expected state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Decision, DispatchError, EntryId, EntryStatus, ExecutorType, NewEntry, QueueEntry, TaskId,
    TenantId,
};

/// Which quarantined entries a reset applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetFilter {
    pub executor: Option<ExecutorType>,
    pub task: Option<TaskId>,
    pub entry: Option<EntryId>,
}

impl ResetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn executor(mut self, executor: ExecutorType) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    pub fn entry(mut self, entry: EntryId) -> Self {
        self.entry = Some(entry);
        self
    }
}

/// Result of applying a failure decision.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    /// The attempt that failed, now `failed` or `quarantine`.
    pub entry: QueueEntry,
    /// Fresh `queued` attempt, present only for `Decision::Retry`.
    pub retry: Option<QueueEntry>,
}

/// Entry count for one (executor, status) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthRow {
    pub executor: ExecutorType,
    pub status: EntryStatus,
    pub count: u64,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a `queued` entry. `DuplicateActiveEntry` if the task already has
    /// one in `{queued, claimed, dispatched}`.
    async fn create_entry(
        &self,
        tenant: &TenantId,
        entry: &NewEntry,
    ) -> Result<QueueEntry, DispatchError>;

    async fn get_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
    ) -> Result<Option<QueueEntry>, DispatchError>;

    async fn active_entry_for_task(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Option<QueueEntry>, DispatchError>;

    /// Atomically claim the best `queued` entry of one executor type:
    /// highest priority, then earliest `queued_at`. Entries whose retry
    /// backoff has not elapsed are skipped.
    async fn claim_next(
        &self,
        tenant: &TenantId,
        executor: ExecutorType,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, DispatchError>;

    /// `queued -> claimed` for a specific entry. `Conflict` if someone else
    /// got there first.
    async fn claim(
        &self,
        tenant: &TenantId,
        id: EntryId,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError>;

    /// `claimed -> dispatched`.
    async fn mark_dispatched(
        &self,
        tenant: &TenantId,
        id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError>;

    /// `claimed | dispatched -> completed`; marks the task `completed` and
    /// releases its claim fields in the same transaction.
    async fn complete_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        output: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError>;

    /// Apply a `RetryDecider` decision to an in-flight entry.
    ///
    /// The update only applies while the entry is still in flight with the
    /// retry count the decision was made from, so a decision can never be
    /// applied twice.
    async fn fail_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        decision: &Decision,
        error: &str,
        retry_id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<FailedAttempt, DispatchError>;

    /// `claimed | dispatched -> quarantine` with an explicit reason.
    async fn quarantine_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError>;

    /// `queued | claimed | dispatched -> cancelled`. Does not touch the retry
    /// budget.
    async fn cancel_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError>;

    /// `quarantine -> queued` with `retry_count = 0` and the error cleared, for
    /// at most `limit` matching entries. Entries whose task already has an
    /// active entry are left alone. Returns the ids that were reset.
    async fn reset_quarantined(
        &self,
        tenant: &TenantId,
        filter: &ResetFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<EntryId>, DispatchError>;

    async fn list_entries(
        &self,
        tenant: &TenantId,
        status: Option<EntryStatus>,
        executor: Option<ExecutorType>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, DispatchError>;

    /// In-flight automated entries claimed at or before `claimed_before`.
    /// Human claims are held by operators and never listed.
    async fn list_expired_claims(
        &self,
        tenant: &TenantId,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, DispatchError>;

    async fn depth(&self, tenant: &TenantId) -> Result<Vec<DepthRow>, DispatchError>;

    /// Delete `quarantine` entries whose task also has an active entry.
    async fn delete_duplicate_quarantined(&self, tenant: &TenantId)
    -> Result<u64, DispatchError>;

    /// Delete `completed | failed | cancelled` entries finished before `cutoff`.
    async fn delete_stale(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DispatchError>;
}
