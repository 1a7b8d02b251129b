//! Dispatcher - one bounded dispatch pass per invocation.
//!
//! # Pass
//! 1. check an executor is registered for the requested type
//! 2. reap expired claims
//! 3. re-apply journaled outcomes whose apply step is missing
//! 4. enqueue ready tasks
//! 5. claim -> dispatched -> invoke (with timeout) -> apply, up to `limit`
//!
//! There is no in-process loop. Several passes may run at once against the
//! same store; conditional updates decide every race.

use serde::Serialize;

use crate::domain::{
    DispatchError, EntryId, EntryResult, ExecutorType, FailureKind, QueueEntry, TaskId,
    TaskStatus, TenantId,
};
use crate::ports::{Executor, ExecutorError, Step};

use super::builder::DispatcherBuilder;
use super::lifecycle::{Applied, EntryLifecycle};
use super::maintenance::Maintenance;
use super::planner::Planner;
use super::reaper::Reaper;
use super::registry::ExecutorRegistry;
use super::resolver::DependencyResolver;
use super::services::{DispatchSettings, Services};
use super::status::QueueStatus;

/// Counters for one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub enqueued: usize,
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub quarantined: usize,
    pub abandoned: usize,
    pub reaped: usize,
    pub resumed: usize,
    pub promoted: usize,
    pub conflicts: usize,
}

impl PassReport {
    fn tally(&mut self, applied: &Applied) {
        match applied {
            Applied::Completed { resolution, .. } => {
                self.completed += 1;
                self.promoted += resolution.promoted.len();
            }
            Applied::Retried { .. } => self.retried += 1,
            Applied::Quarantined(_) => self.quarantined += 1,
            Applied::Abandoned(_) => self.abandoned += 1,
        }
    }

    /// Attempts that ended in anything but completion.
    pub fn failures(&self) -> usize {
        self.retried + self.quarantined + self.abandoned
    }
}

/// Ready tasks turned into entries.
#[derive(Debug, Default)]
pub struct EnqueueReport {
    pub entries: Vec<QueueEntry>,
    /// Tasks that gained an active entry from a concurrent pass.
    pub conflicts: usize,
}

pub struct Dispatcher {
    pub(crate) services: Services,
    pub(crate) registry: ExecutorRegistry,
    pub(crate) resolver: DependencyResolver,
    pub(crate) lifecycle: EntryLifecycle,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn settings(&self) -> &DispatchSettings {
        self.services.settings()
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &EntryLifecycle {
        &self.lifecycle
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn reaper(&self) -> Reaper {
        Reaper::new(self.services.clone(), self.lifecycle.clone())
    }

    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(self.services.clone())
    }

    pub fn planner(&self) -> Planner {
        Planner::new(self.services.clone(), self.resolver.clone())
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus::new(self.services.clone())
    }

    /// Queue a single `next` task explicitly.
    pub async fn enqueue_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
    ) -> Result<QueueEntry, DispatchError> {
        let task = self
            .services
            .tasks
            .get_task(tenant, id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| DispatchError::NotFound(format!("task {id}")))?;
        if task.status != TaskStatus::Next {
            return Err(DispatchError::InvalidInput(format!(
                "task {id} is {}, only next tasks can be queued",
                task.status
            )));
        }
        self.services.enqueue(tenant, &task).await
    }

    /// Queue up to `limit` ready tasks, best first.
    pub async fn enqueue_ready(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<EnqueueReport, DispatchError> {
        let ready = self.services.tasks.list_ready_tasks(tenant, limit).await?;
        let mut report = EnqueueReport::default();
        for task in ready {
            match self.services.enqueue(tenant, &task).await {
                Ok(entry) => report.entries.push(entry),
                Err(err) if err.is_conflict() => {
                    tracing::debug!(tenant = %tenant, task_id = %task.id, "already queued");
                    report.conflicts += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    pub async fn claim_next(
        &self,
        tenant: &TenantId,
        executor: ExecutorType,
        claimant: &str,
    ) -> Result<Option<QueueEntry>, DispatchError> {
        self.lifecycle.claim_next(tenant, executor, claimant).await
    }

    pub async fn claim(
        &self,
        tenant: &TenantId,
        id: EntryId,
        claimant: &str,
    ) -> Result<QueueEntry, DispatchError> {
        self.lifecycle.claim(tenant, id, claimant).await
    }

    pub async fn complete(
        &self,
        tenant: &TenantId,
        id: EntryId,
        output: &str,
    ) -> Result<Applied, DispatchError> {
        self.lifecycle.complete(tenant, id, output).await
    }

    pub async fn fail(
        &self,
        tenant: &TenantId,
        id: EntryId,
        error: &str,
    ) -> Result<Applied, DispatchError> {
        self.lifecycle
            .fail(tenant, id, FailureKind::Executor, error)
            .await
    }

    pub async fn cancel(&self, tenant: &TenantId, id: EntryId) -> Result<QueueEntry, DispatchError> {
        self.lifecycle.cancel(tenant, id).await
    }

    pub async fn run_pass(
        &self,
        tenant: &TenantId,
        executor_type: ExecutorType,
        limit: usize,
    ) -> Result<PassReport, DispatchError> {
        if !executor_type.is_automated() {
            return Err(DispatchError::InvalidInput(format!(
                "{executor_type} entries are claimed and completed by hand"
            )));
        }
        let executor = self.registry.get(executor_type).cloned().ok_or_else(|| {
            DispatchError::Configuration(format!("no executor configured for {executor_type}"))
        })?;

        let mut report = PassReport::default();
        for applied in self.reaper().reap(tenant).await? {
            report.reaped += 1;
            report.tally(&applied);
        }
        for applied in self.resume(tenant).await? {
            report.resumed += 1;
            report.tally(&applied);
        }
        let queued = self
            .enqueue_ready(tenant, self.services.settings.batch_size)
            .await?;
        report.enqueued = queued.entries.len();
        report.conflicts += queued.conflicts;

        let claimant = executor_type.as_str();
        while report.claimed < limit {
            let Some(entry) = self
                .lifecycle
                .claim_next(tenant, executor_type, claimant)
                .await?
            else {
                break;
            };
            report.claimed += 1;
            match self.execute(tenant, entry, executor.as_ref()).await {
                Ok(applied) => report.tally(&applied),
                Err(err) if err.is_conflict() => {
                    tracing::debug!(tenant = %tenant, error = %err, "entry moved during execution");
                    report.conflicts += 1;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            tenant = %tenant,
            executor = %executor_type,
            claimed = report.claimed,
            completed = report.completed,
            failures = report.failures(),
            reaped = report.reaped,
            "dispatch pass finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        tenant: &TenantId,
        entry: QueueEntry,
        executor: &dyn Executor,
    ) -> Result<Applied, DispatchError> {
        let entry = self.lifecycle.mark_dispatched(tenant, entry.id).await?;

        let timeout = self.services.settings.executor_timeout;
        let result = match tokio::time::timeout(timeout, executor.invoke(&entry.context)).await {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(err)) => err.into_result(),
            Err(_) => ExecutorError::Timeout(timeout).into_result(),
        };

        self.services
            .journal
            .put_step(
                tenant,
                entry.id,
                Step::Invoke,
                &serde_json::to_value(&result)?,
                self.services.clock.now(),
            )
            .await?;
        let applied = self.lifecycle.apply(tenant, entry.id, &result).await?;
        self.finish(tenant, entry.id, &applied).await?;
        Ok(applied)
    }

    async fn finish(
        &self,
        tenant: &TenantId,
        id: EntryId,
        applied: &Applied,
    ) -> Result<(), DispatchError> {
        let output = serde_json::json!({ "status": applied.entry().status });
        self.services
            .journal
            .put_step(tenant, id, Step::Apply, &output, self.services.clock.now())
            .await
    }

    /// Apply journaled executor outcomes that never reached the queue.
    pub async fn resume(&self, tenant: &TenantId) -> Result<Vec<Applied>, DispatchError> {
        let pending = self
            .services
            .journal
            .pending_applies(tenant, self.services.settings.batch_size)
            .await?;

        let mut resumed = Vec::with_capacity(pending.len());
        for step in pending {
            match self.lifecycle.apply(tenant, step.entry, &step.result).await {
                Ok(applied) => {
                    tracing::info!(
                        tenant = %tenant,
                        entry_id = %step.entry,
                        "journaled outcome applied"
                    );
                    self.finish(tenant, step.entry, &applied).await?;
                    resumed.push(applied);
                }
                Err(err) if err.is_conflict() || matches!(err, DispatchError::NotFound(_)) => {
                    // already applied, or the entry moved on
                    let output = serde_json::json!({ "skipped": err.to_string() });
                    let now = self.services.clock.now();
                    self.services
                        .journal
                        .put_step(tenant, step.entry, Step::Apply, &output, now)
                        .await?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(resumed)
    }

    /// Apply a result reported outside a pass, e.g. by an operator.
    pub async fn apply(
        &self,
        tenant: &TenantId,
        id: EntryId,
        result: &EntryResult,
    ) -> Result<Applied, DispatchError> {
        self.lifecycle.apply(tenant, id, result).await
    }
}
