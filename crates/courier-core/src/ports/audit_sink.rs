//! AuditSink port - append-only dispatch log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DispatchAction, DispatchError, DispatchLogEntry, EntryId, TenantId};

/// Receives a record for every queue transition.
///
/// Callers treat `record` as fire-and-forget: a failed write is logged and
/// never fails the transition that produced it.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &DispatchLogEntry) -> Result<(), DispatchError>;

    /// Records for one queue entry, oldest first.
    async fn timeline(
        &self,
        tenant: &TenantId,
        entry: EntryId,
    ) -> Result<Vec<DispatchLogEntry>, DispatchError>;

    /// Number of records per action recorded at or after `since`.
    async fn action_counts(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DispatchAction, u64)>, DispatchError>;
}
