//! QueueStatus - read-only views over the queue and the dispatch log.

use chrono::{DateTime, Utc};

use crate::domain::{
    DispatchAction, DispatchError, DispatchLogEntry, EntryId, EntryStatus, ExecutorType,
    QueueEntry, TenantId,
};
use crate::ports::DepthRow;

use super::services::Services;

#[derive(Clone)]
pub struct QueueStatus {
    services: Services,
}

impl QueueStatus {
    pub(crate) fn new(services: Services) -> Self {
        Self { services }
    }

    /// Entry counts per (executor, status), zero rows omitted.
    pub async fn depth(&self, tenant: &TenantId) -> Result<Vec<DepthRow>, DispatchError> {
        self.services.queue.depth(tenant).await
    }

    pub async fn entries(
        &self,
        tenant: &TenantId,
        status: Option<EntryStatus>,
        executor: Option<ExecutorType>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, DispatchError> {
        self.services
            .queue
            .list_entries(tenant, status, executor, limit)
            .await
    }

    /// Quarantined entries with their last error.
    pub async fn quarantined(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, DispatchError> {
        self.entries(tenant, Some(EntryStatus::Quarantine), None, limit)
            .await
    }

    pub async fn entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
    ) -> Result<Option<QueueEntry>, DispatchError> {
        self.services.queue.get_entry(tenant, id).await
    }

    pub async fn timeline(
        &self,
        tenant: &TenantId,
        id: EntryId,
    ) -> Result<Vec<DispatchLogEntry>, DispatchError> {
        self.services.audit.timeline(tenant, id).await
    }

    pub async fn action_counts(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DispatchAction, u64)>, DispatchError> {
        self.services.audit.action_counts(tenant, since).await
    }
}
