//! Maintenance - operator resets and queue garbage collection.
//!
//! Every operation is idempotent and scoped to one tenant. None of them moves
//! an entry into quarantine; that is the lifecycle's job.

use chrono::Duration;

use crate::domain::{DispatchAction, DispatchError, EntryId, TenantId};
use crate::ports::ResetFilter;

use super::services::Services;

/// Default retention for finished entries.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Clone)]
pub struct Maintenance {
    services: Services,
}

impl Maintenance {
    pub(crate) fn new(services: Services) -> Self {
        Self { services }
    }

    /// Delete quarantined entries superseded by an active entry of the same task.
    pub async fn cleanup_duplicates(&self, tenant: &TenantId) -> Result<u64, DispatchError> {
        let deleted = self.services.queue.delete_duplicate_quarantined(tenant).await?;
        if deleted > 0 {
            tracing::info!(tenant = %tenant, deleted, "duplicate quarantined entries purged");
            self.services
                .record(self.services.log(tenant, DispatchAction::Purged).details(
                    serde_json::json!({ "kind": "duplicate_quarantine", "count": deleted }),
                ))
                .await;
        }
        Ok(deleted)
    }

    /// Delete completed, failed and cancelled entries finished before
    /// `now - retention`.
    pub async fn cleanup_stale(
        &self,
        tenant: &TenantId,
        retention: Duration,
    ) -> Result<u64, DispatchError> {
        if retention <= Duration::zero() {
            return Err(DispatchError::InvalidInput(
                "retention window must be positive".into(),
            ));
        }
        let cutoff = self
            .services
            .clock
            .now()
            .checked_sub_signed(retention)
            .ok_or_else(|| {
                DispatchError::InvalidInput("retention window is out of range".into())
            })?;
        let deleted = self.services.queue.delete_stale(tenant, cutoff).await?;
        if deleted > 0 {
            tracing::info!(tenant = %tenant, deleted, cutoff = %cutoff, "stale entries purged");
            self.services
                .record(self.services.log(tenant, DispatchAction::Purged).details(
                    serde_json::json!({ "kind": "stale", "count": deleted, "cutoff": cutoff }),
                ))
                .await;
        }
        Ok(deleted)
    }

    /// Requeue up to `limit` quarantined entries matching `filter`.
    ///
    /// Entries that are not quarantined are untouched; an empty result is not
    /// an error.
    pub async fn reset_quarantined(
        &self,
        tenant: &TenantId,
        filter: &ResetFilter,
        limit: usize,
    ) -> Result<Vec<EntryId>, DispatchError> {
        let now = self.services.clock.now();
        let reset = self
            .services
            .queue
            .reset_quarantined(tenant, filter, limit, now)
            .await?;

        tracing::info!(tenant = %tenant, count = reset.len(), limit, "quarantine reset");
        for id in &reset {
            self.services
                .record(self.services.log(tenant, DispatchAction::Reset).entry(*id))
                .await;
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Applied;
    use crate::app::test_support::Harness;
    use crate::domain::{EntryStatus, ErrorKind, ExecutorType, TaskStatus};
    use crate::ports::QueueStore;

    /// Queue `title` and fail it until the retry budget is spent.
    async fn quarantined_entry(h: &Harness, title: &str) -> EntryId {
        let task = h.task(title, TaskStatus::Next).await;
        let mut entry = h.dispatcher.enqueue_task(&h.tenant, task.id).await.unwrap();
        loop {
            h.dispatcher.claim(&h.tenant, entry.id, "ops").await.unwrap();
            match h
                .dispatcher
                .fail(&h.tenant, entry.id, "credential expired")
                .await
                .unwrap()
            {
                Applied::Retried { retry, .. } => entry = retry,
                Applied::Quarantined(parked) => return parked.id,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn reset_of_non_quarantined_entries_is_a_no_op() {
        let h = Harness::new();
        let task = h.task("[fix] css", TaskStatus::Next).await;
        let queued = h.dispatcher.enqueue_task(&h.tenant, task.id).await.unwrap();

        let reset = h
            .dispatcher
            .maintenance()
            .reset_quarantined(&h.tenant, &ResetFilter::all().entry(queued.id), 10)
            .await
            .unwrap();
        assert!(reset.is_empty());
        let unchanged = h.store.get_entry(&h.tenant, queued.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, EntryStatus::Queued);
    }

    #[tokio::test]
    async fn reset_is_capped_and_filtered() {
        let h = Harness::new();
        let first = quarantined_entry(&h, "[fix] one").await;
        let second = quarantined_entry(&h, "[fix] two").await;
        let human = quarantined_entry(&h, "[review] three").await;

        let maintenance = h.dispatcher.maintenance();
        let by_type = ResetFilter::all().executor(ExecutorType::CodeAgent);
        let reset = maintenance.reset_quarantined(&h.tenant, &by_type, 1).await.unwrap();
        assert_eq!(reset.len(), 1);
        assert!(reset[0] == first || reset[0] == second);

        let rest = maintenance.reset_quarantined(&h.tenant, &by_type, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        let parked = h.store.get_entry(&h.tenant, human).await.unwrap().unwrap();
        assert_eq!(parked.status, EntryStatus::Quarantine);

        let timeline = h.dispatcher.status().timeline(&h.tenant, reset[0]).await.unwrap();
        assert_eq!(
            timeline.last().map(|record| record.action),
            Some(DispatchAction::Reset)
        );
    }

    #[tokio::test]
    async fn stale_cleanup_honours_the_retention_window() {
        let h = Harness::new();
        let task = h.task("[fix] flaky test", TaskStatus::Next).await;
        let entry = h.dispatcher.enqueue_task(&h.tenant, task.id).await.unwrap();
        h.dispatcher.claim(&h.tenant, entry.id, "ops").await.unwrap();
        h.dispatcher.complete(&h.tenant, entry.id, "done").await.unwrap();
        quarantined_entry(&h, "[fix] parked").await;

        let maintenance = h.dispatcher.maintenance();
        let retention = Duration::days(DEFAULT_RETENTION_DAYS);
        assert_eq!(maintenance.cleanup_stale(&h.tenant, retention).await.unwrap(), 0);

        // the completed entry plus two failed attempts of the parked task
        h.clock.advance(Duration::days(8));
        assert_eq!(maintenance.cleanup_stale(&h.tenant, retention).await.unwrap(), 3);
        assert!(h.store.get_entry(&h.tenant, entry.id).await.unwrap().is_none());
        // quarantine is never garbage
        assert_eq!(h.dispatcher.status().quarantined(&h.tenant, 10).await.unwrap().len(), 1);

        let err = maintenance
            .cleanup_stale(&h.tenant, Duration::zero())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn retention_reaching_before_the_calendar_is_rejected() {
        let h = Harness::new();
        let err = h
            .dispatcher
            .maintenance()
            .cleanup_stale(&h.tenant, Duration::days(100_000_000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn duplicate_quarantine_is_purged() {
        let h = Harness::new();
        let parked = quarantined_entry(&h, "[fix] duplicate").await;
        let task_id = h.store.get_entry(&h.tenant, parked).await.unwrap().unwrap().task_id;
        h.dispatcher.enqueue_task(&h.tenant, task_id).await.unwrap();

        let maintenance = h.dispatcher.maintenance();
        assert_eq!(maintenance.cleanup_duplicates(&h.tenant).await.unwrap(), 1);
        assert_eq!(maintenance.cleanup_duplicates(&h.tenant).await.unwrap(), 0);
        assert!(h.store.get_entry(&h.tenant, parked).await.unwrap().is_none());
    }
}
