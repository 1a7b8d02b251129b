//! Planner - turns a multi-step plan into tasks, edges and queue entries.
//!
//! A plan is validated as a whole before anything is written: bad indexes,
//! cycles and missing external prerequisites reject the entire plan.

use std::collections::HashMap;

use serde::Deserialize;

use crate::domain::{
    DependencyGraph, DependencyKind, DispatchError, NewTask, QueueEntry, Task, TaskDependency,
    TaskId, TaskStatus, TenantId,
};

use super::resolver::DependencyResolver;
use super::services::Services;

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlannedTask {
    #[serde(flatten)]
    pub task: NewTask,
    /// Indexes of earlier or later steps of the same plan.
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Existing tasks this step waits for.
    #[serde(default)]
    pub after: Vec<TaskId>,
}

impl PlannedTask {
    pub fn new(task: NewTask) -> Self {
        Self {
            task,
            depends_on: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn depends_on(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }

    pub fn after(mut self, task: TaskId) -> Self {
        self.after.push(task);
        self
    }
}

#[derive(Debug, Default)]
pub struct PlanReport {
    /// Created tasks, in plan order.
    pub tasks: Vec<Task>,
    /// Entries created for tasks that were ready immediately.
    pub entries: Vec<QueueEntry>,
}

#[derive(Clone)]
pub struct Planner {
    services: Services,
    resolver: DependencyResolver,
}

impl Planner {
    pub(crate) fn new(services: Services, resolver: DependencyResolver) -> Self {
        Self { services, resolver }
    }

    pub async fn submit_plan(
        &self,
        tenant: &TenantId,
        plan: Vec<PlannedTask>,
    ) -> Result<PlanReport, DispatchError> {
        if plan.is_empty() {
            return Err(DispatchError::InvalidInput("plan has no tasks".into()));
        }
        for (index, step) in plan.iter().enumerate() {
            step.task.validate()?;
            for &dep in &step.depends_on {
                if dep >= plan.len() {
                    return Err(DispatchError::InvalidInput(format!(
                        "plan step {index} depends on unknown step {dep}"
                    )));
                }
            }
        }

        let ids: Vec<TaskId> = plan.iter().map(|_| self.services.ids.task_id()).collect();
        let order = plan_order(&plan, &ids)?;
        let blocked_externally = self.check_external(tenant, &plan, &ids).await?;

        let now = self.services.clock.now();
        let mut created: HashMap<TaskId, Task> = HashMap::with_capacity(plan.len());
        for index in order {
            let step = &plan[index];
            let status = if step.depends_on.is_empty() && !blocked_externally[index] {
                TaskStatus::Next
            } else {
                TaskStatus::Inbox
            };
            let task = self
                .services
                .tasks
                .create_task(tenant, ids[index], &step.task, status, now)
                .await?;

            let prerequisites = step
                .depends_on
                .iter()
                .map(|&dep| ids[dep])
                .chain(step.after.iter().copied());
            for depends_on in prerequisites {
                let edge = TaskDependency {
                    task_id: task.id,
                    depends_on,
                    kind: DependencyKind::Blocks,
                    created_at: now,
                };
                self.services.tasks.add_dependency(tenant, &edge).await?;
            }
            created.insert(task.id, task);
        }

        tracing::info!(tenant = %tenant, tasks = created.len(), "plan stored");

        let mut report = PlanReport::default();
        for (index, id) in ids.iter().enumerate() {
            let Some(task) = created.remove(id) else {
                continue;
            };
            if task.status == TaskStatus::Next {
                match self.services.enqueue(tenant, &task).await {
                    Ok(entry) => report.entries.push(entry),
                    Err(err) if err.is_conflict() => {}
                    Err(err) => return Err(err),
                }
            } else if plan[index].depends_on.is_empty() {
                // external prerequisites may have completed since they were checked
                let resolution = self.resolver.reevaluate(tenant, task.id).await?;
                report.entries.extend(resolution.enqueued);
            }
            report.tasks.push(task);
        }
        Ok(report)
    }

    /// Checks that every external prerequisite exists. Returns, per step,
    /// whether any of them is still unfinished.
    async fn check_external(
        &self,
        tenant: &TenantId,
        plan: &[PlannedTask],
        ids: &[TaskId],
    ) -> Result<Vec<bool>, DispatchError> {
        let mut blocked = vec![false; plan.len()];
        for (index, step) in plan.iter().enumerate() {
            for &external in &step.after {
                match self.services.tasks.get_task(tenant, external).await? {
                    Some(task) if !task.is_deleted() => {
                        if !task.status.is_terminal_success() {
                            blocked[index] = true;
                        }
                    }
                    _ => {
                        return Err(DispatchError::DependencyIntegrity {
                            task: ids[index].to_string(),
                            depends_on: external.to_string(),
                        });
                    }
                }
            }
        }
        Ok(blocked)
    }
}

/// Plan indexes with prerequisites first.
fn plan_order(plan: &[PlannedTask], ids: &[TaskId]) -> Result<Vec<usize>, DispatchError> {
    let mut graph = DependencyGraph::new();
    for (index, step) in plan.iter().enumerate() {
        graph.add_node(ids[index]);
        for &dep in &step.depends_on {
            graph.add_dependency(ids[index], ids[dep]);
        }
    }
    let order = graph.topological_order().map_err(|cycle| {
        DispatchError::InvalidInput(format!(
            "plan has a dependency cycle through {} step(s)",
            cycle.len()
        ))
    })?;

    let position: HashMap<TaskId, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    Ok(order.iter().filter_map(|id| position.get(id).copied()).collect())
}
