//! TaskStore over SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{SqliteStore, opt_ts_col, parse_col, sql_limit, to_ms, ts_col};
use crate::domain::{
    DependencyKind, DispatchError, NewTask, Rating, Task, TaskDependency, TaskField, TaskId,
    TaskPatch, TaskStatus, TenantId,
};
use crate::ports::TaskStore;

pub(super) const TASK_COLUMNS: &str = "t.id, t.tenant, t.title, t.description, t.status, \
     t.urgency, t.importance, t.domain, t.due_at_ms, t.claimed_by, t.claimed_at_ms, \
     t.deleted_at_ms, t.created_at_ms, t.updated_at_ms";

pub(super) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let urgency: u8 = row.get(5)?;
    let importance: u8 = row.get(6)?;
    Ok(Task {
        id: parse_col(row, 0)?,
        tenant: parse_col(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_col(row, 4)?,
        urgency: Rating::new(urgency).map_err(|e| super::conversion_error(5, e))?,
        importance: Rating::new(importance).map_err(|e| super::conversion_error(6, e))?,
        domain: row.get(7)?,
        due_at: opt_ts_col(row, 8)?,
        claimed_by: row.get(9)?,
        claimed_at: opt_ts_col(row, 10)?,
        deleted_at: opt_ts_col(row, 11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}

fn dependency_from_row(row: &Row<'_>) -> rusqlite::Result<TaskDependency> {
    Ok(TaskDependency {
        task_id: parse_col(row, 0)?,
        depends_on: parse_col(row, 1)?,
        kind: DependencyKind::Blocks,
        created_at: ts_col(row, 2)?,
    })
}

pub(super) fn load_task(
    conn: &rusqlite::Connection,
    tenant: &str,
    id: &str,
) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.tenant = ?1 AND t.id = ?2"),
        params![tenant, id],
        task_from_row,
    )
    .optional()
}

fn field_value(field: &TaskField) -> Value {
    match field {
        TaskField::Title(v) | TaskField::Description(v) | TaskField::Domain(v) => {
            Value::Text(v.clone())
        }
        TaskField::Urgency(r) | TaskField::Importance(r) => Value::Integer(i64::from(r.get())),
        TaskField::Due(Some(at)) => Value::Integer(to_ms(*at)),
        TaskField::Due(None) => Value::Null,
        TaskField::Status(s) => Value::Text(s.as_str().to_string()),
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        task: &NewTask,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, DispatchError> {
        task.validate()?;
        let tenant = tenant.clone();
        let task = task.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO tasks (tenant, id, title, description, status, urgency, importance,
                                    domain, due_at_ms, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    tenant.as_str(),
                    id.to_string(),
                    task.title,
                    task.description,
                    status.as_str(),
                    task.urgency.get(),
                    task.importance.get(),
                    task.domain,
                    task.due_at.map(to_ms),
                    to_ms(now),
                ],
            )?;
            load_task(conn, tenant.as_str(), &id.to_string())?
                .ok_or_else(|| DispatchError::NotFound(format!("task {id}")))
        })
        .await
    }

    async fn get_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
    ) -> Result<Option<Task>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| Ok(load_task(conn, tenant.as_str(), &id.to_string())?))
            .await
    }

    async fn update_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Task, DispatchError> {
        let tenant = tenant.clone();
        let patch = patch.clone();
        self.call(move |conn| {
            // Column names come from TaskField::column(), never from input.
            let mut sets = Vec::with_capacity(patch.fields().len() + 1);
            let mut values = Vec::with_capacity(patch.fields().len() + 3);
            for field in patch.fields() {
                values.push(field_value(field));
                sets.push(format!("{} = ?{}", field.column(), values.len()));
            }
            values.push(Value::Integer(to_ms(now)));
            sets.push(format!("updated_at_ms = ?{}", values.len()));
            values.push(Value::Text(tenant.as_str().to_string()));
            let tenant_idx = values.len();
            values.push(Value::Text(id.to_string()));
            let id_idx = values.len();

            let sql = format!(
                "UPDATE tasks SET {} WHERE tenant = ?{tenant_idx} AND id = ?{id_idx} \
                 AND deleted_at_ms IS NULL",
                sets.join(", ")
            );
            let changed = conn.execute(&sql, params_from_iter(values))?;
            if changed == 0 {
                return Err(DispatchError::NotFound(format!("task {id}")));
            }
            load_task(conn, tenant.as_str(), &id.to_string())?
                .ok_or_else(|| DispatchError::NotFound(format!("task {id}")))
        })
        .await
    }

    async fn update_task_status(
        &self,
        tenant: &TenantId,
        id: TaskId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?3, updated_at_ms = ?4
                 WHERE tenant = ?1 AND id = ?2 AND deleted_at_ms IS NULL",
                params![tenant.as_str(), id.to_string(), status.as_str(), to_ms(now)],
            )?;
            if changed == 0 {
                return Err(DispatchError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn transition_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?4, updated_at_ms = ?5
                 WHERE tenant = ?1 AND id = ?2 AND status = ?3 AND deleted_at_ms IS NULL",
                params![
                    tenant.as_str(),
                    id.to_string(),
                    from.as_str(),
                    to.as_str(),
                    to_ms(now)
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn soft_delete_task(
        &self,
        tenant: &TenantId,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET deleted_at_ms = ?3, updated_at_ms = ?3
                 WHERE tenant = ?1 AND id = ?2 AND deleted_at_ms IS NULL",
                params![tenant.as_str(), id.to_string(), to_ms(now)],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn add_dependency(
        &self,
        tenant: &TenantId,
        dependency: &TaskDependency,
    ) -> Result<(), DispatchError> {
        if dependency.task_id == dependency.depends_on {
            return Err(DispatchError::InvalidInput(format!(
                "task {} cannot depend on itself",
                dependency.task_id
            )));
        }
        let tenant = tenant.clone();
        let dependency = dependency.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO task_dependencies
                    (tenant, task_id, depends_on, kind, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    tenant.as_str(),
                    dependency.task_id.to_string(),
                    dependency.depends_on.to_string(),
                    dependency.kind.as_str(),
                    to_ms(dependency.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn dependency_edges(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Vec<TaskDependency>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, depends_on, created_at_ms FROM task_dependencies
                 WHERE tenant = ?1 AND task_id = ?2 AND kind = 'blocks'
                 ORDER BY created_at_ms, depends_on",
            )?;
            let rows = stmt
                .query_map(params![tenant.as_str(), task.to_string()], dependency_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_dependents(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Vec<Task>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM task_dependencies d
                 JOIN tasks t ON t.tenant = d.tenant AND t.id = d.task_id
                 WHERE d.tenant = ?1 AND d.depends_on = ?2 AND d.kind = 'blocks'
                 ORDER BY t.created_at_ms, t.id"
            ))?;
            let rows = stmt
                .query_map(params![tenant.as_str(), task.to_string()], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_dependencies(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Vec<Task>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM task_dependencies d
                 JOIN tasks t ON t.tenant = d.tenant AND t.id = d.depends_on
                 WHERE d.tenant = ?1 AND d.task_id = ?2 AND d.kind = 'blocks'
                 ORDER BY t.created_at_ms, t.id"
            ))?;
            let rows = stmt
                .query_map(params![tenant.as_str(), task.to_string()], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_ready_tasks(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<Task>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks t
                 WHERE t.tenant = ?1 AND t.status = 'next' AND t.deleted_at_ms IS NULL
                   AND NOT EXISTS (
                       SELECT 1 FROM queue_entries q
                       WHERE q.tenant = t.tenant AND q.task_id = t.id AND q.status <> 'completed'
                   )
                 ORDER BY t.urgency * t.importance DESC, t.created_at_ms ASC, t.rowid ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![tenant.as_str(), sql_limit(limit)], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_tasks(
        &self,
        tenant: &TenantId,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks t
                 WHERE t.tenant = ?1 AND t.deleted_at_ms IS NULL
                   AND (?2 IS NULL OR t.status = ?2)
                 ORDER BY t.created_at_ms ASC, t.rowid ASC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![tenant.as_str(), status.map(TaskStatus::as_str), sql_limit(limit)],
                    task_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn alice() -> TenantId {
        TenantId::new("alice").unwrap()
    }

    async fn seeded(store: &SqliteStore, title: &str, status: TaskStatus) -> Task {
        store
            .create_task(&alice(), TaskId::generate(), &NewTask::new(title), status, t0())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let new = NewTask::new("[fix] flaky test")
            .with_description("see CI run 812")
            .with_ratings(Rating::new(5).unwrap(), Rating::new(4).unwrap())
            .with_due(t0() + chrono::Duration::days(2));
        let id = TaskId::generate();
        let created = store
            .create_task(&alice(), id, &new, TaskStatus::Next, t0())
            .await
            .unwrap();

        let fetched = store.get_task(&alice(), id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.urgency.get(), 5);
        assert_eq!(fetched.due_at, Some(t0() + chrono::Duration::days(2)));
        assert_eq!(fetched.domain, "personal");
    }

    #[tokio::test]
    async fn tasks_are_invisible_to_other_tenants() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = seeded(&store, "private", TaskStatus::Next).await;
        let bob = TenantId::new("bob").unwrap();

        assert!(store.get_task(&bob, task.id).await.unwrap().is_none());
        assert!(store.list_ready_tasks(&bob, 10).await.unwrap().is_empty());
        assert!(!store
            .transition_task(&bob, task.id, TaskStatus::Next, TaskStatus::Completed, t0())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn patch_updates_only_named_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = seeded(&store, "draft", TaskStatus::Inbox).await;
        let patch = TaskPatch::builder()
            .title("[write] final copy")
            .importance(Rating::new(5).unwrap())
            .due(None)
            .build()
            .unwrap();

        let later = t0() + chrono::Duration::minutes(5);
        let updated = store.update_task(&alice(), task.id, &patch, later).await.unwrap();
        assert_eq!(updated.title, "[write] final copy");
        assert_eq!(updated.importance.get(), 5);
        assert_eq!(updated.urgency, task.urgency);
        assert_eq!(updated.status, TaskStatus::Inbox);
        assert_eq!(updated.updated_at, later);
    }

    #[tokio::test]
    async fn transition_is_conditional() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = seeded(&store, "blocked", TaskStatus::Inbox).await;

        assert!(store
            .transition_task(&alice(), task.id, TaskStatus::Inbox, TaskStatus::Next, t0())
            .await
            .unwrap());
        // second promotion sees `next`, not `inbox`
        assert!(!store
            .transition_task(&alice(), task.id, TaskStatus::Inbox, TaskStatus::Next, t0())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn deleted_tasks_are_not_ready_and_not_editable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = seeded(&store, "gone", TaskStatus::Next).await;
        assert!(store.soft_delete_task(&alice(), task.id, t0()).await.unwrap());
        assert!(!store.soft_delete_task(&alice(), task.id, t0()).await.unwrap());

        assert!(store.list_ready_tasks(&alice(), 10).await.unwrap().is_empty());
        let patch = TaskPatch::builder().title("x").build().unwrap();
        let err = store.update_task(&alice(), task.id, &patch, t0()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn ready_tasks_are_ordered_by_priority() {
        let store = SqliteStore::open_in_memory().unwrap();
        let low = seeded(&store, "low", TaskStatus::Next).await;
        let high = store
            .create_task(
                &alice(),
                TaskId::generate(),
                &NewTask::new("high").with_ratings(Rating::new(5).unwrap(), Rating::new(5).unwrap()),
                TaskStatus::Next,
                t0(),
            )
            .await
            .unwrap();
        seeded(&store, "inbox", TaskStatus::Inbox).await;

        let ready = store.list_ready_tasks(&alice(), 10).await.unwrap();
        let ids: Vec<_> = ready.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high.id, low.id]);
    }

    #[tokio::test]
    async fn dependency_edges_both_directions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = seeded(&store, "a", TaskStatus::Next).await;
        let b = seeded(&store, "b", TaskStatus::Inbox).await;
        let edge = TaskDependency {
            task_id: b.id,
            depends_on: a.id,
            kind: DependencyKind::Blocks,
            created_at: t0(),
        };
        store.add_dependency(&alice(), &edge).await.unwrap();
        store.add_dependency(&alice(), &edge).await.unwrap();

        assert_eq!(store.dependency_edges(&alice(), b.id).await.unwrap(), vec![edge]);
        let dependents = store.list_dependents(&alice(), a.id).await.unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].id, b.id);
        let deps = store.list_dependencies(&alice(), b.id).await.unwrap();
        assert_eq!(deps[0].id, a.id);
    }

    #[tokio::test]
    async fn self_dependency_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = seeded(&store, "a", TaskStatus::Next).await;
        let edge = TaskDependency {
            task_id: a.id,
            depends_on: a.id,
            kind: DependencyKind::Blocks,
            created_at: t0(),
        };
        assert!(store.add_dependency(&alice(), &edge).await.is_err());
    }
}
