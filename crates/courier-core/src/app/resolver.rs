//! DependencyResolver - releases tasks whose prerequisites have all completed.
//!
//! Fan-in join: a dependent with several `blocks` edges is promoted only once
//! every referenced task is `completed`, whichever finishes last. A failed or
//! cancelled prerequisite leaves its dependents in `inbox`.

use crate::domain::{
    DispatchAction, DispatchError, QueueEntry, Task, TaskId, TaskStatus, TenantId,
};

use super::services::Services;

/// Outcome of one resolution round.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Tasks moved `inbox -> next`.
    pub promoted: Vec<TaskId>,
    /// Entries created for promoted tasks.
    pub enqueued: Vec<QueueEntry>,
    /// Dependents skipped because an edge points at a missing task.
    pub integrity_errors: Vec<DispatchError>,
}

#[derive(Clone)]
pub struct DependencyResolver {
    services: Services,
}

/// Whether a dependent may move on.
enum Readiness {
    Ready,
    Blocked,
    Broken(DispatchError),
}

impl DependencyResolver {
    pub(crate) fn new(services: Services) -> Self {
        Self { services }
    }

    /// Re-evaluate every task that waits for `completed`.
    pub async fn promote_dependents(
        &self,
        tenant: &TenantId,
        completed: TaskId,
    ) -> Result<Resolution, DispatchError> {
        let dependents = self.services.tasks.list_dependents(tenant, completed).await?;
        let mut resolution = Resolution::default();

        for dependent in dependents {
            self.evaluate(tenant, dependent, &mut resolution).await?;
        }
        Ok(resolution)
    }

    /// Re-evaluate a single blocked task, e.g. one whose prerequisites may
    /// have completed before its edges were written.
    pub async fn reevaluate(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Resolution, DispatchError> {
        let mut resolution = Resolution::default();
        if let Some(task) = self.services.tasks.get_task(tenant, task).await? {
            self.evaluate(tenant, task, &mut resolution).await?;
        }
        Ok(resolution)
    }

    async fn evaluate(
        &self,
        tenant: &TenantId,
        task: Task,
        resolution: &mut Resolution,
    ) -> Result<(), DispatchError> {
        if task.is_deleted() || task.status != TaskStatus::Inbox {
            return Ok(());
        }
        match self.readiness(tenant, &task).await? {
            Readiness::Blocked => {
                tracing::debug!(tenant = %tenant, task_id = %task.id, "task still blocked");
            }
            Readiness::Broken(err) => {
                tracing::warn!(
                    tenant = %tenant,
                    task_id = %task.id,
                    error = %err,
                    "dependency integrity error, task skipped"
                );
                resolution.integrity_errors.push(err);
            }
            Readiness::Ready => self.promote(tenant, task, resolution).await?,
        }
        Ok(())
    }

    async fn readiness(&self, tenant: &TenantId, task: &Task) -> Result<Readiness, DispatchError> {
        let edges = self.services.tasks.dependency_edges(tenant, task.id).await?;
        if edges.is_empty() {
            // inbox without edges is awaiting triage
            return Ok(Readiness::Blocked);
        }
        let mut ready = true;
        for edge in edges {
            match self.services.tasks.get_task(tenant, edge.depends_on).await? {
                None => {
                    return Ok(Readiness::Broken(DispatchError::DependencyIntegrity {
                        task: task.id.to_string(),
                        depends_on: edge.depends_on.to_string(),
                    }));
                }
                Some(prerequisite) => {
                    if !prerequisite.status.is_terminal_success() {
                        ready = false;
                    }
                }
            }
        }
        Ok(if ready { Readiness::Ready } else { Readiness::Blocked })
    }

    async fn promote(
        &self,
        tenant: &TenantId,
        mut task: Task,
        resolution: &mut Resolution,
    ) -> Result<(), DispatchError> {
        let now = self.services.clock.now();
        let moved = self
            .services
            .tasks
            .transition_task(tenant, task.id, TaskStatus::Inbox, TaskStatus::Next, now)
            .await?;
        if !moved {
            // another pass got there first
            return Ok(());
        }
        task.status = TaskStatus::Next;
        task.updated_at = now;
        resolution.promoted.push(task.id);

        tracing::info!(tenant = %tenant, task_id = %task.id, "task unblocked");
        self.services
            .record(self.services.log(tenant, DispatchAction::Unblocked).task(task.id))
            .await;

        match self.services.enqueue(tenant, &task).await {
            Ok(entry) => resolution.enqueued.push(entry),
            Err(err) if err.is_conflict() => {
                tracing::debug!(tenant = %tenant, task_id = %task.id, "already queued");
            }
            Err(err) => {
                // the task is `next` now, so the next ready sweep picks it up
                tracing::warn!(
                    tenant = %tenant,
                    task_id = %task.id,
                    error = %err,
                    "promoted task could not be queued"
                );
            }
        }
        Ok(())
    }
}
