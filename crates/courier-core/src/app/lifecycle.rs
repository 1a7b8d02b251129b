//! EntryLifecycle - applies claims and results to queue entries.
//!
//! Every transition is a conditional store update; the entry's status is the
//! only lock. Audit records follow each transition and never fail it.

use crate::domain::{
    Decision, DispatchAction, DispatchError, EntryId, EntryResult, EntryStatus, ExecutorType,
    FailureKind, QueueEntry, StoreError, TenantId,
};

use super::resolver::{DependencyResolver, Resolution};
use super::services::Services;

/// What applying a result did to the entry.
#[derive(Debug)]
pub enum Applied {
    Completed {
        entry: QueueEntry,
        resolution: Resolution,
    },
    Retried {
        failed: QueueEntry,
        retry: QueueEntry,
    },
    Quarantined(QueueEntry),
    Abandoned(QueueEntry),
}

impl Applied {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            Applied::Completed { entry, .. } => entry,
            Applied::Retried { failed, .. } => failed,
            Applied::Quarantined(entry) | Applied::Abandoned(entry) => entry,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Applied::Completed { .. })
    }
}

#[derive(Clone)]
pub struct EntryLifecycle {
    services: Services,
    resolver: DependencyResolver,
}

impl EntryLifecycle {
    pub(crate) fn new(services: Services, resolver: DependencyResolver) -> Self {
        Self { services, resolver }
    }

    pub async fn claim_next(
        &self,
        tenant: &TenantId,
        executor: ExecutorType,
        claimant: &str,
    ) -> Result<Option<QueueEntry>, DispatchError> {
        let now = self.services.clock.now();
        let claimed = self
            .services
            .queue
            .claim_next(tenant, executor, claimant, now)
            .await?;
        if let Some(entry) = &claimed {
            self.claimed(tenant, entry).await;
        }
        Ok(claimed)
    }

    pub async fn claim(
        &self,
        tenant: &TenantId,
        id: EntryId,
        claimant: &str,
    ) -> Result<QueueEntry, DispatchError> {
        let now = self.services.clock.now();
        let entry = self.services.queue.claim(tenant, id, claimant, now).await?;
        self.claimed(tenant, &entry).await;
        Ok(entry)
    }

    async fn claimed(&self, tenant: &TenantId, entry: &QueueEntry) {
        tracing::info!(
            tenant = %tenant,
            entry_id = %entry.id,
            task_id = %entry.task_id,
            executor = %entry.executor,
            claimed_by = entry.claimed_by.as_deref().unwrap_or_default(),
            "entry claimed"
        );
        self.services
            .record(
                self.services
                    .log(tenant, DispatchAction::Claimed)
                    .entry(entry.id)
                    .task(entry.task_id)
                    .executor(entry.executor)
                    .details(serde_json::json!({ "claimed_by": entry.claimed_by })),
            )
            .await;
    }

    pub async fn mark_dispatched(
        &self,
        tenant: &TenantId,
        id: EntryId,
    ) -> Result<QueueEntry, DispatchError> {
        let now = self.services.clock.now();
        let entry = self.services.queue.mark_dispatched(tenant, id, now).await?;
        tracing::debug!(tenant = %tenant, entry_id = %entry.id, "entry dispatched");
        self.services
            .record(
                self.services
                    .log(tenant, DispatchAction::Dispatched)
                    .entry(entry.id)
                    .task(entry.task_id)
                    .executor(entry.executor),
            )
            .await;
        Ok(entry)
    }

    /// Apply a reported result to an in-flight entry.
    pub async fn apply(
        &self,
        tenant: &TenantId,
        id: EntryId,
        result: &EntryResult,
    ) -> Result<Applied, DispatchError> {
        match result {
            EntryResult::Success { output } => self.complete(tenant, id, output).await,
            EntryResult::Failure { error, kind } => self.fail(tenant, id, *kind, error).await,
        }
    }

    /// Complete the entry and its task, then release dependents.
    pub async fn complete(
        &self,
        tenant: &TenantId,
        id: EntryId,
        output: &str,
    ) -> Result<Applied, DispatchError> {
        let now = self.services.clock.now();
        let entry = self
            .services
            .queue
            .complete_entry(tenant, id, output, now)
            .await?;

        tracing::info!(
            tenant = %tenant,
            entry_id = %entry.id,
            task_id = %entry.task_id,
            executor = %entry.executor,
            "entry completed"
        );
        self.services
            .record(
                self.services
                    .log(tenant, DispatchAction::Completed)
                    .entry(entry.id)
                    .task(entry.task_id)
                    .executor(entry.executor),
            )
            .await;

        // completion is already committed, resolver errors are only logged
        let resolution = match self.resolver.promote_dependents(tenant, entry.task_id).await {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::error!(
                    tenant = %tenant,
                    task_id = %entry.task_id,
                    error = %err,
                    "dependency resolution failed"
                );
                Resolution::default()
            }
        };
        Ok(Applied::Completed { entry, resolution })
    }

    /// Record a failed attempt and act on the retry decision.
    pub async fn fail(
        &self,
        tenant: &TenantId,
        id: EntryId,
        kind: FailureKind,
        error: &str,
    ) -> Result<Applied, DispatchError> {
        let entry = self
            .services
            .queue
            .get_entry(tenant, id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("entry {id}")))?;
        if !EntryStatus::IN_FLIGHT.contains(&entry.status) {
            return Err(DispatchError::InvalidTransition {
                entry: id,
                actual: entry.status,
                expected: EntryStatus::IN_FLIGHT,
            });
        }

        let decision = self.services.decider.decide(&entry, kind, error);
        let now = self.services.clock.now();
        let attempt = self
            .services
            .queue
            .fail_entry(tenant, id, &decision, error, self.services.ids.entry_id(), now)
            .await?;
        let failed = attempt.entry;

        tracing::warn!(
            tenant = %tenant,
            entry_id = %failed.id,
            task_id = %failed.task_id,
            executor = %failed.executor,
            retry_count = decision.retry_count(),
            max_retries = failed.max_retries,
            error,
            "entry attempt failed"
        );
        self.services
            .record(
                self.services
                    .log(tenant, DispatchAction::Failed)
                    .entry(failed.id)
                    .task(failed.task_id)
                    .executor(failed.executor)
                    .details(serde_json::json!({
                        "error": error,
                        "retry_count": decision.retry_count(),
                    })),
            )
            .await;

        match (decision, attempt.retry) {
            (Decision::Retry { delay, .. }, Some(retry)) => {
                self.services
                    .record(
                        self.services
                            .log(tenant, DispatchAction::Retried)
                            .entry(retry.id)
                            .task(retry.task_id)
                            .executor(retry.executor)
                            .details(serde_json::json!({
                                "previous": failed.id.to_string(),
                                "retry_count": retry.retry_count,
                                "delay_ms": delay.as_millis() as u64,
                            })),
                    )
                    .await;
                Ok(Applied::Retried { failed, retry })
            }
            (Decision::Quarantine { reason, .. }, _) => {
                tracing::warn!(
                    tenant = %tenant,
                    entry_id = %failed.id,
                    task_id = %failed.task_id,
                    "entry quarantined"
                );
                self.services
                    .record(
                        self.services
                            .log(tenant, DispatchAction::Quarantined)
                            .entry(failed.id)
                            .task(failed.task_id)
                            .executor(failed.executor)
                            .details(serde_json::json!({ "reason": reason })),
                    )
                    .await;
                Ok(Applied::Quarantined(failed))
            }
            (Decision::Abandon { reason, .. }, _) => {
                tracing::error!(
                    tenant = %tenant,
                    entry_id = %failed.id,
                    task_id = %failed.task_id,
                    reason = %reason,
                    "entry abandoned"
                );
                self.services
                    .record(
                        self.services
                            .log(tenant, DispatchAction::Abandoned)
                            .entry(failed.id)
                            .task(failed.task_id)
                            .executor(failed.executor)
                            .details(serde_json::json!({ "reason": reason })),
                    )
                    .await;
                Ok(Applied::Abandoned(failed))
            }
            (Decision::Retry { .. }, None) => Err(DispatchError::Store(StoreError::InvalidRow(
                format!("retry of entry {} was not created", failed.id),
            ))),
        }
    }

    /// Administrative stop. Does not consume a retry or release dependents.
    pub async fn cancel(&self, tenant: &TenantId, id: EntryId) -> Result<QueueEntry, DispatchError> {
        let now = self.services.clock.now();
        let entry = self.services.queue.cancel_entry(tenant, id, now).await?;
        tracing::info!(
            tenant = %tenant,
            entry_id = %entry.id,
            task_id = %entry.task_id,
            "entry cancelled"
        );
        self.services
            .record(
                self.services
                    .log(tenant, DispatchAction::Cancelled)
                    .entry(entry.id)
                    .task(entry.task_id)
                    .executor(entry.executor),
            )
            .await;
        Ok(entry)
    }
}
