//! Reaper - reclaims entries stuck in flight past the claim timeout.
//!
//! An expired claim is failed through the normal retry path, so it consumes
//! a retry and eventually quarantines like any other failure. Human claims
//! are held by operators and are never reaped.

use crate::domain::{DispatchAction, DispatchError, FailureKind, TenantId};

use super::lifecycle::{Applied, EntryLifecycle};
use super::services::Services;

pub const CLAIM_EXPIRED: &str = "claim expired";

const REAP_BATCH: usize = 100;

#[derive(Clone)]
pub struct Reaper {
    services: Services,
    lifecycle: EntryLifecycle,
}

impl Reaper {
    pub(crate) fn new(services: Services, lifecycle: EntryLifecycle) -> Self {
        Self { services, lifecycle }
    }

    pub async fn reap(&self, tenant: &TenantId) -> Result<Vec<Applied>, DispatchError> {
        let cutoff = chrono::Duration::from_std(self.services.settings.claim_timeout)
            .ok()
            .and_then(|timeout| self.services.clock.now().checked_sub_signed(timeout))
            .ok_or_else(|| {
                DispatchError::Configuration("claim timeout is out of range".into())
            })?;
        let expired = self
            .services
            .queue
            .list_expired_claims(tenant, cutoff, REAP_BATCH)
            .await?;

        let mut reaped = Vec::new();
        for entry in expired {
            tracing::warn!(
                tenant = %tenant,
                entry_id = %entry.id,
                task_id = %entry.task_id,
                executor = %entry.executor,
                claimed_by = entry.claimed_by.as_deref().unwrap_or_default(),
                "claim expired"
            );
            self.services
                .record(
                    self.services
                        .log(tenant, DispatchAction::Reaped)
                        .entry(entry.id)
                        .task(entry.task_id)
                        .executor(entry.executor)
                        .details(serde_json::json!({
                            "claimed_by": entry.claimed_by,
                            "claimed_at": entry.claimed_at,
                        })),
                )
                .await;

            match self
                .lifecycle
                .fail(tenant, entry.id, FailureKind::Executor, CLAIM_EXPIRED)
                .await
            {
                Ok(applied) => reaped.push(applied),
                // finished or reaped by someone else in the meantime
                Err(err) if err.is_conflict() => {
                    tracing::debug!(entry_id = %entry.id, error = %err, "reap skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::Harness;
    use crate::domain::{EntryStatus, ExecutorType, TaskStatus};
    use crate::ports::QueueStore;

    #[tokio::test]
    async fn only_expired_agent_claims_are_reaped() {
        let h = Harness::new();
        h.task("[fix] memory leak", TaskStatus::Next).await;
        h.task("[call] landlord", TaskStatus::Next).await;
        h.dispatcher.enqueue_ready(&h.tenant, 10).await.unwrap();

        let agent = h
            .dispatcher
            .claim_next(&h.tenant, ExecutorType::CodeAgent, "runner-7")
            .await
            .unwrap()
            .unwrap();
        let human = h
            .dispatcher
            .claim_next(&h.tenant, ExecutorType::Human, "sam")
            .await
            .unwrap()
            .unwrap();

        let reaper = h.dispatcher.reaper();
        assert!(reaper.reap(&h.tenant).await.unwrap().is_empty());

        h.clock.advance(chrono::Duration::hours(2));
        let reaped = reaper.reap(&h.tenant).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].entry().id, agent.id);
        assert!(matches!(reaped[0], Applied::Retried { .. }));

        let held = h.store.get_entry(&h.tenant, human.id).await.unwrap().unwrap();
        assert_eq!(held.status, EntryStatus::Claimed);
    }

    #[tokio::test]
    async fn held_human_claims_do_not_starve_agent_claims() {
        let h = Harness::new();
        let humans = REAP_BATCH + 5;
        for i in 0..humans {
            h.task(&format!("[call] supplier {i}"), TaskStatus::Next).await;
        }
        h.dispatcher.enqueue_ready(&h.tenant, humans).await.unwrap();
        for _ in 0..humans {
            h.dispatcher
                .claim_next(&h.tenant, ExecutorType::Human, "sam")
                .await
                .unwrap()
                .unwrap();
        }

        h.clock.advance(chrono::Duration::minutes(1));
        let task = h.task("[fix] flaky upload", TaskStatus::Next).await;
        let entry = h.dispatcher.enqueue_task(&h.tenant, task.id).await.unwrap();
        h.dispatcher.claim(&h.tenant, entry.id, "runner-7").await.unwrap();

        h.clock.advance(chrono::Duration::hours(2));
        let reaped = h.dispatcher.reaper().reap(&h.tenant).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].entry().id, entry.id);
    }

    #[tokio::test]
    async fn out_of_range_claim_timeout_is_a_configuration_error() {
        let h = Harness::with(|builder| {
            builder.settings(crate::app::DispatchSettings {
                claim_timeout: std::time::Duration::from_secs(u64::MAX),
                ..Default::default()
            })
        });
        let err = h.dispatcher.reaper().reap(&h.tenant).await.unwrap_err();
        assert_eq!(err.kind(), crate::domain::ErrorKind::Configuration);
    }
}
