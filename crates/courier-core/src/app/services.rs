//! Shared wiring for the app components.
//!
//! `Services` bundles the ports and dispatch settings. It is cheap to clone
//! and every app component holds its own copy.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    DispatchAction, DispatchError, DispatchLogEntry, EntryContext, NewEntry, QueueEntry,
    RetryDecider, Task, TenantId,
};
use crate::ports::{AuditSink, Clock, FieldCipher, IdGenerator, QueueStore, StepJournal, TaskStore};
use crate::router;

/// Tunables for dispatch passes.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Retry budget frozen into each new entry.
    pub max_retries: u32,
    /// Upper bound on tasks enqueued per pass.
    pub batch_size: usize,
    /// In-flight entries older than this are reaped.
    pub claim_timeout: Duration,
    /// Bound on a single executor call.
    pub executor_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            batch_size: 10,
            claim_timeout: Duration::from_secs(30 * 60),
            executor_timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Clone)]
pub struct Services {
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) queue: Arc<dyn QueueStore>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) journal: Arc<dyn StepJournal>,
    pub(crate) cipher: Arc<dyn FieldCipher>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) decider: RetryDecider,
    pub(crate) settings: DispatchSettings,
}

impl Services {
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Append to the dispatch log. Failures are logged, never returned.
    pub(crate) async fn record(&self, entry: DispatchLogEntry) {
        if let Err(err) = self.audit.record(&entry).await {
            tracing::warn!(
                tenant = %entry.tenant,
                action = %entry.action,
                error = %err,
                "dispatch log write failed"
            );
        }
    }

    pub(crate) fn log(&self, tenant: &TenantId, action: DispatchAction) -> DispatchLogEntry {
        DispatchLogEntry::new(tenant.clone(), action, self.clock.now())
    }

    /// Decrypt the task's fields and capture them for the executor.
    pub(crate) fn snapshot(&self, task: &Task) -> Result<EntryContext, DispatchError> {
        let title = self.cipher.decrypt(&task.tenant, "title", &task.title)?;
        let description = self
            .cipher
            .decrypt(&task.tenant, "description", &task.description)?;
        let (executor, routed_by) = router::classify(&title);
        let context = EntryContext {
            task_id: task.id,
            tenant: task.tenant.clone(),
            title,
            description,
            domain: task.domain.clone(),
            urgency: task.urgency,
            importance: task.importance,
            due_at: task.due_at,
            executor,
            routed_by: routed_by.map(str::to_string),
            captured_at: self.clock.now(),
        };
        context.validate()?;
        Ok(context)
    }

    /// Route a task and create its queued entry.
    ///
    /// Priority is computed here from the task's current ratings and never
    /// recomputed afterwards.
    pub(crate) async fn enqueue(
        &self,
        tenant: &TenantId,
        task: &Task,
    ) -> Result<QueueEntry, DispatchError> {
        let context = self.snapshot(task)?;
        let new = NewEntry {
            id: self.ids.entry_id(),
            task_id: task.id,
            executor: context.executor,
            priority: context.priority(),
            max_retries: self.settings.max_retries,
            queued_at: self.clock.now(),
            context,
        };
        let entry = self.queue.create_entry(tenant, &new).await?;

        tracing::info!(
            tenant = %tenant,
            task_id = %entry.task_id,
            entry_id = %entry.id,
            executor = %entry.executor,
            priority = entry.priority.get(),
            "entry queued"
        );
        self.record(
            self.log(tenant, DispatchAction::Created)
                .entry(entry.id)
                .task(entry.task_id)
                .executor(entry.executor)
                .details(serde_json::json!({
                    "priority": entry.priority.get(),
                    "routed_by": entry.context.routed_by,
                })),
        )
        .await;
        Ok(entry)
    }
}
