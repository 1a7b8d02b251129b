//! TaskStore port - tasks and their dependency edges.
//!
//! Every call is scoped by tenant. Status changes the dispatch engine makes
//! are conditional (`transition_task`) so concurrent passes cannot clobber
//! each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    DispatchError, NewTask, Task, TaskDependency, TaskId, TaskPatch, TaskStatus, TenantId,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        task: &NewTask,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, DispatchError>;

    async fn get_task(&self, tenant: &TenantId, id: TaskId)
    -> Result<Option<Task>, DispatchError>;

    /// Apply a validated patch. `NotFound` for unknown or deleted tasks.
    async fn update_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Task, DispatchError>;

    /// Unconditional status write (user edits).
    async fn update_task_status(
        &self,
        tenant: &TenantId,
        id: TaskId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError>;

    /// `from -> to` only if the task is currently `from` and not deleted.
    /// Returns whether the row changed.
    async fn transition_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError>;

    async fn soft_delete_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError>;

    /// Store an edge. Existence of either end is not checked here.
    async fn add_dependency(
        &self,
        tenant: &TenantId,
        dependency: &TaskDependency,
    ) -> Result<(), DispatchError>;

    /// Outgoing edges of `task` (what it waits for).
    async fn dependency_edges(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Vec<TaskDependency>, DispatchError>;

    /// Existing tasks that wait for `task`.
    async fn list_dependents(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Vec<Task>, DispatchError>;

    /// Existing tasks that `task` waits for.
    async fn list_dependencies(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Vec<Task>, DispatchError>;

    /// `next`, not deleted, and no queue entry other than completed ones,
    /// highest `urgency * importance` first.
    async fn list_ready_tasks(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<Task>, DispatchError>;

    async fn list_tasks(
        &self,
        tenant: &TenantId,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, DispatchError>;
}
