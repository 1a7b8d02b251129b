//! QueueStore over SQLite.
//!
//! Transitions are single conditional UPDATEs guarded by the expected prior
//! status. When an UPDATE changes nothing, the current row is read back only
//! to report why (`NotFound` or `InvalidTransition`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};

use super::{SqliteStore, opt_ts_col, parse_col, sql_limit, to_ms, ts_col};
use crate::domain::{
    Decision, DispatchError, EntryContext, EntryId, EntryStatus, ExecutorType, NewEntry,
    Priority, QueueEntry, TaskId, TenantId,
};
use crate::ports::{DepthRow, FailedAttempt, QueueStore, ResetFilter};

const ENTRY_COLUMNS: &str = "q.id, q.tenant, q.task_id, q.executor, q.status, q.priority, \
     q.context, q.retry_count, q.max_retries, q.queued_at_ms, q.available_at_ms, \
     q.claimed_at_ms, q.claimed_by, q.completed_at_ms, q.result, q.error";

const ACTIVE: &str = "('queued','claimed','dispatched')";
const IN_FLIGHT: &str = "('claimed','dispatched')";
const RETIRED: &str = "('completed','failed','cancelled')";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let priority: u8 = row.get(5)?;
    let context: String = row.get(6)?;
    let context: EntryContext =
        serde_json::from_str(&context).map_err(|e| super::conversion_error(6, e))?;
    Ok(QueueEntry {
        id: parse_col(row, 0)?,
        tenant: parse_col(row, 1)?,
        task_id: parse_col(row, 2)?,
        executor: parse_col(row, 3)?,
        status: parse_col(row, 4)?,
        priority: Priority::try_from(priority).map_err(|e| super::conversion_error(5, e))?,
        context,
        retry_count: row.get(7)?,
        max_retries: row.get(8)?,
        queued_at: ts_col(row, 9)?,
        available_at: ts_col(row, 10)?,
        claimed_at: opt_ts_col(row, 11)?,
        claimed_by: row.get(12)?,
        completed_at: opt_ts_col(row, 13)?,
        result: row.get(14)?,
        error: row.get(15)?,
    })
}

fn load_entry(conn: &Connection, tenant: &str, id: &str) -> rusqlite::Result<Option<QueueEntry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM queue_entries q WHERE q.tenant = ?1 AND q.id = ?2"),
        params![tenant, id],
        entry_from_row,
    )
    .optional()
}

fn require_entry(conn: &Connection, tenant: &str, id: EntryId) -> Result<QueueEntry, DispatchError> {
    load_entry(conn, tenant, &id.to_string())?
        .ok_or_else(|| DispatchError::NotFound(format!("entry {id}")))
}

/// Turn "0 rows changed" into the reason the transition was refused.
fn ensure_changed(
    conn: &Connection,
    tenant: &str,
    id: EntryId,
    changed: usize,
    expected: &'static [EntryStatus],
) -> Result<(), DispatchError> {
    if changed == 1 {
        return Ok(());
    }
    let current = require_entry(conn, tenant, id)?;
    if expected.contains(&current.status) {
        // Right status, stale retry accounting: someone else applied first.
        return Err(DispatchError::Conflict(format!(
            "entry {id} changed concurrently (retry_count {})",
            current.retry_count
        )));
    }
    Err(DispatchError::InvalidTransition {
        entry: id,
        actual: current.status,
        expected,
    })
}

fn set_task_claim(
    tx: &Transaction<'_>,
    tenant: &str,
    task_id: TaskId,
    claimant: Option<&str>,
    at: Option<i64>,
    now: i64,
) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE tasks SET claimed_by = ?3, claimed_at_ms = ?4, updated_at_ms = ?5
         WHERE tenant = ?1 AND id = ?2",
        params![tenant, task_id.to_string(), claimant, at, now],
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn find_active(conn: &Connection, tenant: &str, task: TaskId) -> rusqlite::Result<Option<QueueEntry>> {
    conn.query_row(
        &format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries q
             WHERE q.tenant = ?1 AND q.task_id = ?2 AND q.status IN {ACTIVE}"
        ),
        params![tenant, task.to_string()],
        entry_from_row,
    )
    .optional()
}

fn immediate(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn create_entry(
        &self,
        tenant: &TenantId,
        entry: &NewEntry,
    ) -> Result<QueueEntry, DispatchError> {
        entry.context.validate()?;
        let tenant = tenant.clone();
        let entry = entry.clone();
        self.call(move |conn| {
            let context = serde_json::to_string(&entry.context)?;
            let queued_at = to_ms(entry.queued_at);
            let inserted = conn.execute(
                "INSERT INTO queue_entries
                    (tenant, id, task_id, executor, status, priority, context,
                     retry_count, max_retries, queued_at_ms, available_at_ms)
                 VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?6, 0, ?7, ?8, ?8)",
                params![
                    tenant.as_str(),
                    entry.id.to_string(),
                    entry.task_id.to_string(),
                    entry.executor.as_str(),
                    entry.priority.get(),
                    context,
                    entry.max_retries,
                    queued_at,
                ],
            );
            match inserted {
                Ok(_) => require_entry(conn, tenant.as_str(), entry.id),
                Err(err) if is_unique_violation(&err) => {
                    match find_active(conn, tenant.as_str(), entry.task_id)? {
                        Some(active) => Err(DispatchError::DuplicateActiveEntry {
                            task: entry.task_id,
                            entry: active.id,
                        }),
                        None => Err(DispatchError::Conflict(format!(
                            "entry {} already exists",
                            entry.id
                        ))),
                    }
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn get_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
    ) -> Result<Option<QueueEntry>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| Ok(load_entry(conn, tenant.as_str(), &id.to_string())?))
            .await
    }

    async fn active_entry_for_task(
        &self,
        tenant: &TenantId,
        task: TaskId,
    ) -> Result<Option<QueueEntry>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| Ok(find_active(conn, tenant.as_str(), task)?))
            .await
    }

    async fn claim_next(
        &self,
        tenant: &TenantId,
        executor: ExecutorType,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, DispatchError> {
        let tenant = tenant.clone();
        let claimant = claimant.to_string();
        self.call(move |conn| {
            let now = to_ms(now);
            let tx = immediate(conn)?;
            let claimed: Option<(String, String)> = tx
                .query_row(
                    "UPDATE queue_entries
                     SET status = 'claimed', claimed_at_ms = ?4, claimed_by = ?3
                     WHERE rowid = (
                         SELECT rowid FROM queue_entries
                         WHERE tenant = ?1 AND executor = ?2 AND status = 'queued'
                           AND available_at_ms <= ?4
                         ORDER BY priority DESC, queued_at_ms ASC, rowid ASC
                         LIMIT 1
                     ) AND status = 'queued'
                     RETURNING id, task_id",
                    params![tenant.as_str(), executor.as_str(), claimant, now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((id, task_id)) = claimed else {
                return Ok(None);
            };
            let task_id: TaskId = task_id
                .parse()
                .map_err(|e| super::conversion_error(1, e))?;
            set_task_claim(&tx, tenant.as_str(), task_id, Some(&claimant), Some(now), now)?;
            let entry = load_entry(&tx, tenant.as_str(), &id)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn claim(
        &self,
        tenant: &TenantId,
        id: EntryId,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError> {
        let tenant = tenant.clone();
        let claimant = claimant.to_string();
        self.call(move |conn| {
            let now = to_ms(now);
            let tx = immediate(conn)?;
            let changed = tx.execute(
                "UPDATE queue_entries SET status = 'claimed', claimed_at_ms = ?3, claimed_by = ?4
                 WHERE tenant = ?1 AND id = ?2 AND status = 'queued'",
                params![tenant.as_str(), id.to_string(), now, claimant],
            )?;
            ensure_changed(&tx, tenant.as_str(), id, changed, &[EntryStatus::Queued])?;
            let entry = require_entry(&tx, tenant.as_str(), id)?;
            set_task_claim(&tx, tenant.as_str(), entry.task_id, Some(&claimant), Some(now), now)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn mark_dispatched(
        &self,
        tenant: &TenantId,
        id: EntryId,
        _now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE queue_entries SET status = 'dispatched'
                 WHERE tenant = ?1 AND id = ?2 AND status = 'claimed'",
                params![tenant.as_str(), id.to_string()],
            )?;
            ensure_changed(conn, tenant.as_str(), id, changed, &[EntryStatus::Claimed])?;
            require_entry(conn, tenant.as_str(), id)
        })
        .await
    }

    async fn complete_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        output: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError> {
        let tenant = tenant.clone();
        let output = output.to_string();
        self.call(move |conn| {
            let now = to_ms(now);
            let tx = immediate(conn)?;
            let changed = tx.execute(
                &format!(
                    "UPDATE queue_entries
                     SET status = 'completed', completed_at_ms = ?3, result = ?4, error = NULL
                     WHERE tenant = ?1 AND id = ?2 AND status IN {IN_FLIGHT}"
                ),
                params![tenant.as_str(), id.to_string(), now, output],
            )?;
            ensure_changed(&tx, tenant.as_str(), id, changed, EntryStatus::IN_FLIGHT)?;
            let entry = require_entry(&tx, tenant.as_str(), id)?;
            tx.execute(
                "UPDATE tasks
                 SET status = 'completed', claimed_by = NULL, claimed_at_ms = NULL, updated_at_ms = ?3
                 WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), entry.task_id.to_string(), now],
            )?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn fail_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        decision: &Decision,
        error: &str,
        retry_id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<FailedAttempt, DispatchError> {
        let tenant = tenant.clone();
        let decision = decision.clone();
        let error = error.to_string();
        self.call(move |conn| {
            let now_ms = to_ms(now);
            let retry_count = decision.retry_count();
            let prior = retry_count.saturating_sub(1);
            let (status, message) = match &decision {
                Decision::Retry { .. } => (EntryStatus::Failed, error.as_str()),
                Decision::Quarantine { reason, .. } => (EntryStatus::Quarantine, reason.as_str()),
                Decision::Abandon { reason, .. } => (EntryStatus::Failed, reason.as_str()),
            };

            let tx = immediate(conn)?;
            let changed = tx.execute(
                &format!(
                    "UPDATE queue_entries
                     SET status = ?3, retry_count = ?4, error = ?5, completed_at_ms = ?6
                     WHERE tenant = ?1 AND id = ?2 AND status IN {IN_FLIGHT} AND retry_count = ?7"
                ),
                params![
                    tenant.as_str(),
                    id.to_string(),
                    status.as_str(),
                    retry_count,
                    message,
                    now_ms,
                    prior
                ],
            )?;
            ensure_changed(&tx, tenant.as_str(), id, changed, EntryStatus::IN_FLIGHT)?;
            let entry = require_entry(&tx, tenant.as_str(), id)?;
            set_task_claim(&tx, tenant.as_str(), entry.task_id, None, None, now_ms)?;

            let retry = match &decision {
                Decision::Retry { delay, .. } => {
                    let delay = chrono::Duration::from_std(*delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    let available_at = to_ms(now + delay);
                    tx.execute(
                        "INSERT INTO queue_entries
                            (tenant, id, task_id, executor, status, priority, context,
                             retry_count, max_retries, queued_at_ms, available_at_ms)
                         SELECT tenant, ?3, task_id, executor, 'queued', priority, context,
                                retry_count, max_retries, ?4, ?5
                         FROM queue_entries WHERE tenant = ?1 AND id = ?2",
                        params![
                            tenant.as_str(),
                            id.to_string(),
                            retry_id.to_string(),
                            now_ms,
                            available_at
                        ],
                    )?;
                    Some(require_entry(&tx, tenant.as_str(), retry_id)?)
                }
                Decision::Quarantine { .. } | Decision::Abandon { .. } => None,
            };
            tx.commit()?;
            Ok(FailedAttempt { entry, retry })
        })
        .await
    }

    async fn quarantine_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError> {
        let tenant = tenant.clone();
        let reason = reason.to_string();
        self.call(move |conn| {
            let now = to_ms(now);
            let tx = immediate(conn)?;
            let changed = tx.execute(
                &format!(
                    "UPDATE queue_entries SET status = 'quarantine', error = ?3, completed_at_ms = ?4
                     WHERE tenant = ?1 AND id = ?2 AND status IN {IN_FLIGHT}"
                ),
                params![tenant.as_str(), id.to_string(), reason, now],
            )?;
            ensure_changed(&tx, tenant.as_str(), id, changed, EntryStatus::IN_FLIGHT)?;
            let entry = require_entry(&tx, tenant.as_str(), id)?;
            set_task_claim(&tx, tenant.as_str(), entry.task_id, None, None, now)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn cancel_entry(
        &self,
        tenant: &TenantId,
        id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let now = to_ms(now);
            let tx = immediate(conn)?;
            let changed = tx.execute(
                &format!(
                    "UPDATE queue_entries SET status = 'cancelled', completed_at_ms = ?3
                     WHERE tenant = ?1 AND id = ?2 AND status IN {ACTIVE}"
                ),
                params![tenant.as_str(), id.to_string(), now],
            )?;
            ensure_changed(&tx, tenant.as_str(), id, changed, EntryStatus::ACTIVE)?;
            let entry = require_entry(&tx, tenant.as_str(), id)?;
            set_task_claim(&tx, tenant.as_str(), entry.task_id, None, None, now)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn reset_quarantined(
        &self,
        tenant: &TenantId,
        filter: &ResetFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<EntryId>, DispatchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let tenant = tenant.clone();
        let filter = filter.clone();
        self.call(move |conn| {
            let now = to_ms(now);
            let tx = immediate(conn)?;
            let candidates: Vec<String> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT q.id FROM queue_entries q
                     WHERE q.tenant = ?1 AND q.status = 'quarantine'
                       AND (?2 IS NULL OR q.executor = ?2)
                       AND (?3 IS NULL OR q.task_id = ?3)
                       AND (?4 IS NULL OR q.id = ?4)
                       AND NOT EXISTS (
                           SELECT 1 FROM queue_entries a
                           WHERE a.tenant = q.tenant AND a.task_id = q.task_id
                             AND a.status IN {ACTIVE}
                       )
                     ORDER BY q.priority DESC, q.queued_at_ms ASC, q.rowid ASC"
                ))?;
                let ids = stmt
                    .query_map(
                        params![
                            tenant.as_str(),
                            filter.executor.map(ExecutorType::as_str),
                            filter.task.map(|t| t.to_string()),
                            filter.entry.map(|e| e.to_string()),
                        ],
                        |row| row.get(0),
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            let mut reset = Vec::new();
            for id in candidates {
                if reset.len() >= limit {
                    break;
                }
                // Two quarantined attempts of one task: only the first may
                // take the active slot.
                let changed = tx.execute(
                    &format!(
                        "UPDATE queue_entries
                         SET status = 'queued', retry_count = 0, error = NULL, result = NULL,
                             queued_at_ms = ?3, available_at_ms = ?3,
                             claimed_at_ms = NULL, claimed_by = NULL, completed_at_ms = NULL
                         WHERE tenant = ?1 AND id = ?2 AND status = 'quarantine'
                           AND NOT EXISTS (
                               SELECT 1 FROM queue_entries a
                               WHERE a.tenant = queue_entries.tenant
                                 AND a.task_id = queue_entries.task_id
                                 AND a.status IN {ACTIVE}
                           )"
                    ),
                    params![tenant.as_str(), id, now],
                )?;
                if changed == 1 {
                    reset.push(id.parse().map_err(|e| super::conversion_error(0, e))?);
                }
            }
            tx.commit()?;
            Ok(reset)
        })
        .await
    }

    async fn list_entries(
        &self,
        tenant: &TenantId,
        status: Option<EntryStatus>,
        executor: Option<ExecutorType>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries q
                 WHERE q.tenant = ?1
                   AND (?2 IS NULL OR q.status = ?2)
                   AND (?3 IS NULL OR q.executor = ?3)
                 ORDER BY q.priority DESC, q.queued_at_ms ASC, q.rowid ASC
                 LIMIT ?4"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        tenant.as_str(),
                        status.map(EntryStatus::as_str),
                        executor.map(ExecutorType::as_str),
                        sql_limit(limit)
                    ],
                    entry_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_expired_claims(
        &self,
        tenant: &TenantId,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries q
                 WHERE q.tenant = ?1 AND q.status IN {IN_FLIGHT} AND q.claimed_at_ms <= ?2
                   AND q.executor <> ?4
                 ORDER BY q.claimed_at_ms ASC, q.rowid ASC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        tenant.as_str(),
                        to_ms(claimed_before),
                        sql_limit(limit),
                        ExecutorType::Human.as_str()
                    ],
                    entry_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn depth(&self, tenant: &TenantId) -> Result<Vec<DepthRow>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT executor, status, COUNT(*) FROM queue_entries
                 WHERE tenant = ?1
                 GROUP BY executor, status
                 ORDER BY executor, status",
            )?;
            let rows = stmt
                .query_map(params![tenant.as_str()], |row| {
                    let count: i64 = row.get(2)?;
                    Ok(DepthRow {
                        executor: parse_col(row, 0)?,
                        status: parse_col(row, 1)?,
                        count: count.max(0) as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_duplicate_quarantined(
        &self,
        tenant: &TenantId,
    ) -> Result<u64, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let deleted = conn.execute(
                &format!(
                    "DELETE FROM queue_entries
                     WHERE tenant = ?1 AND status = 'quarantine'
                       AND EXISTS (
                           SELECT 1 FROM queue_entries a
                           WHERE a.tenant = queue_entries.tenant
                             AND a.task_id = queue_entries.task_id
                             AND a.status IN {ACTIVE}
                       )"
                ),
                params![tenant.as_str()],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn delete_stale(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let tx = immediate(conn)?;
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM queue_entries
                     WHERE tenant = ?1 AND status IN {RETIRED}
                       AND COALESCE(completed_at_ms, queued_at_ms) < ?2"
                ),
                params![tenant.as_str(), to_ms(cutoff)],
            )?;
            tx.execute(
                "DELETE FROM step_journal
                 WHERE tenant = ?1
                   AND entry_id NOT IN (SELECT id FROM queue_entries WHERE tenant = ?1)",
                params![tenant.as_str()],
            )?;
            tx.commit()?;
            Ok(deleted as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, Rating, Task, TaskStatus};
    use crate::ports::TaskStore;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn alice() -> TenantId {
        TenantId::new("alice").unwrap()
    }

    async fn task(store: &SqliteStore, title: &str, urgency: u8, importance: u8) -> Task {
        let new = NewTask::new(title)
            .with_ratings(Rating::new(urgency).unwrap(), Rating::new(importance).unwrap());
        store
            .create_task(&alice(), TaskId::generate(), &new, TaskStatus::Next, t0())
            .await
            .unwrap()
    }

    fn new_entry(task: &Task, executor: ExecutorType, queued_at: DateTime<Utc>) -> NewEntry {
        let context = EntryContext {
            task_id: task.id,
            tenant: task.tenant.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            domain: task.domain.clone(),
            urgency: task.urgency,
            importance: task.importance,
            due_at: task.due_at,
            executor,
            routed_by: None,
            captured_at: queued_at,
        };
        NewEntry {
            id: EntryId::generate(),
            task_id: task.id,
            executor,
            priority: context.priority(),
            context,
            max_retries: 3,
            queued_at,
        }
    }

    async fn enqueue(store: &SqliteStore, task: &Task, at: DateTime<Utc>) -> QueueEntry {
        store
            .create_entry(&alice(), &new_entry(task, ExecutorType::CodeAgent, at))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_active_entry_is_a_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task(&store, "x", 3, 3).await;
        let first = enqueue(&store, &t, t0()).await;

        let err = store
            .create_entry(&alice(), &new_entry(&t, ExecutorType::Human, t0()))
            .await
            .unwrap_err();
        match err {
            DispatchError::DuplicateActiveEntry { task, entry } => {
                assert_eq!(task, t.id);
                assert_eq!(entry, first.id);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claim_next_prefers_priority_then_fifo() {
        let store = SqliteStore::open_in_memory().unwrap();
        let low = task(&store, "low", 1, 2).await;
        let high_late = task(&store, "high late", 5, 4).await;
        let high_early = task(&store, "high early", 4, 5).await;
        enqueue(&store, &low, t0()).await;
        enqueue(&store, &high_late, t0() + chrono::Duration::seconds(2)).await;
        enqueue(&store, &high_early, t0() + chrono::Duration::seconds(1)).await;

        let now = t0() + chrono::Duration::minutes(1);
        let mut order = Vec::new();
        while let Some(e) = store
            .claim_next(&alice(), ExecutorType::CodeAgent, "runner", now)
            .await
            .unwrap()
        {
            assert_eq!(e.status, EntryStatus::Claimed);
            order.push(e.task_id);
        }
        assert_eq!(order, vec![high_early.id, high_late.id, low.id]);
    }

    #[tokio::test]
    async fn claim_next_is_scoped_to_executor_and_tenant() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task(&store, "x", 3, 3).await;
        enqueue(&store, &t, t0()).await;

        let bob = TenantId::new("bob").unwrap();
        assert!(store
            .claim_next(&bob, ExecutorType::CodeAgent, "r", t0())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .claim_next(&alice(), ExecutorType::Human, "r", t0())
            .await
            .unwrap()
            .is_none());
        let claimed = store
            .claim_next(&alice(), ExecutorType::CodeAgent, "r", t0())
            .await
            .unwrap()
            .unwrap();
        let task_row = store.get_task(&alice(), t.id).await.unwrap().unwrap();
        assert_eq!(task_row.claimed_by.as_deref(), Some("r"));
        assert_eq!(claimed.claimed_by.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn claiming_twice_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task(&store, "x", 3, 3).await;
        let e = enqueue(&store, &t, t0()).await;

        store.claim(&alice(), e.id, "first", t0()).await.unwrap();
        let err = store.claim(&alice(), e.id, "second", t0()).await.unwrap_err();
        assert!(err.is_conflict());

        let missing = store
            .claim(&alice(), EntryId::generate(), "x", t0())
            .await
            .unwrap_err();
        assert!(matches!(missing, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn retry_creates_fresh_attempt_after_backoff() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task(&store, "x", 5, 4).await;
        let e = enqueue(&store, &t, t0()).await;
        store.claim(&alice(), e.id, "r", t0()).await.unwrap();

        let decision = Decision::Retry {
            retry_count: 1,
            delay: Duration::from_secs(60),
        };
        let retry_id = EntryId::generate();
        let failed = store
            .fail_entry(&alice(), e.id, &decision, "boom", retry_id, t0())
            .await
            .unwrap();
        assert_eq!(failed.entry.status, EntryStatus::Failed);
        assert_eq!(failed.entry.error.as_deref(), Some("boom"));
        let retry = failed.retry.unwrap();
        assert_eq!(retry.id, retry_id);
        assert_eq!(retry.status, EntryStatus::Queued);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.priority.get(), 20);
        assert_eq!(retry.available_at, t0() + chrono::Duration::seconds(60));

        // not claimable before the backoff elapses
        assert!(store
            .claim_next(&alice(), ExecutorType::CodeAgent, "r", t0())
            .await
            .unwrap()
            .is_none());
        let later = t0() + chrono::Duration::seconds(60);
        let next = store
            .claim_next(&alice(), ExecutorType::CodeAgent, "r", later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, retry_id);

        // the same decision cannot be applied twice
        let again = store
            .fail_entry(&alice(), e.id, &decision, "boom", EntryId::generate(), t0())
            .await
            .unwrap_err();
        assert!(again.is_conflict());
    }

    #[tokio::test]
    async fn reset_only_touches_quarantined_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task(&store, "x", 3, 3).await;
        let e = enqueue(&store, &t, t0()).await;

        // queued entry: nothing to reset
        let none = store
            .reset_quarantined(&alice(), &ResetFilter::all().entry(e.id), 10, t0())
            .await
            .unwrap();
        assert!(none.is_empty());

        store.claim(&alice(), e.id, "r", t0()).await.unwrap();
        store
            .quarantine_entry(&alice(), e.id, "retries exhausted (3/3): boom", t0())
            .await
            .unwrap();

        let later = t0() + chrono::Duration::hours(1);
        let reset = store
            .reset_quarantined(&alice(), &ResetFilter::all(), 10, later)
            .await
            .unwrap();
        assert_eq!(reset, vec![e.id]);
        let entry = store.get_entry(&alice(), e.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Queued);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.error, None);
        assert_eq!(entry.queued_at, later);
    }

    #[tokio::test]
    async fn reset_respects_limit_and_active_slot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut quarantined = Vec::new();
        for title in ["a", "b", "c"] {
            let t = task(&store, title, 3, 3).await;
            let e = enqueue(&store, &t, t0()).await;
            store.claim(&alice(), e.id, "r", t0()).await.unwrap();
            store.quarantine_entry(&alice(), e.id, "x", t0()).await.unwrap();
            quarantined.push((t, e));
        }
        // task "c" got a new active entry meanwhile
        enqueue(&store, &quarantined[2].0, t0()).await;

        let reset = store
            .reset_quarantined(&alice(), &ResetFilter::all(), 1, t0())
            .await
            .unwrap();
        assert_eq!(reset.len(), 1);
        let rest = store
            .reset_quarantined(&alice(), &ResetFilter::all(), 10, t0())
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(!rest.contains(&quarantined[2].1.id));
    }

    #[tokio::test]
    async fn cleanup_removes_duplicates_and_stale_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dup_task = task(&store, "dup", 3, 3).await;
        let q = enqueue(&store, &dup_task, t0()).await;
        store.claim(&alice(), q.id, "r", t0()).await.unwrap();
        store.quarantine_entry(&alice(), q.id, "x", t0()).await.unwrap();
        let active = enqueue(&store, &dup_task, t0()).await;

        let done_task = task(&store, "done", 3, 3).await;
        let done = enqueue(&store, &done_task, t0()).await;
        store.claim(&alice(), done.id, "r", t0()).await.unwrap();
        store.complete_entry(&alice(), done.id, "ok", t0()).await.unwrap();

        assert_eq!(store.delete_duplicate_quarantined(&alice()).await.unwrap(), 1);
        assert!(store.get_entry(&alice(), q.id).await.unwrap().is_none());
        assert!(store.get_entry(&alice(), active.id).await.unwrap().is_some());

        let cutoff = t0() + chrono::Duration::days(7);
        assert_eq!(store.delete_stale(&alice(), t0()).await.unwrap(), 0);
        assert_eq!(store.delete_stale(&alice(), cutoff).await.unwrap(), 1);
        // active entries are never stale
        assert!(store.get_entry(&alice(), active.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn depth_groups_by_executor_and_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        for title in ["a", "b"] {
            let t = task(&store, title, 3, 3).await;
            enqueue(&store, &t, t0()).await;
        }
        let rows = store.depth(&alice()).await.unwrap();
        assert_eq!(
            rows,
            vec![DepthRow {
                executor: ExecutorType::CodeAgent,
                status: EntryStatus::Queued,
                count: 2
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_on_one_file_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let a = SqliteStore::open(&path).unwrap();
        let b = SqliteStore::open(&path).unwrap();

        let t = task(&a, "contended", 3, 3).await;
        let e = enqueue(&a, &t, t0()).await;

        let tenant = alice();
        let (ra, rb) = tokio::join!(
            a.claim(&tenant, e.id, "runner-a", t0()),
            b.claim(&tenant, e.id, "runner-b", t0()),
        );
        let winners = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(loser.unwrap_err().is_conflict());

        let (na, nb) = tokio::join!(
            a.claim_next(&tenant, ExecutorType::CodeAgent, "runner-a", t0()),
            b.claim_next(&tenant, ExecutorType::CodeAgent, "runner-b", t0()),
        );
        assert!(na.unwrap().is_none());
        assert!(nb.unwrap().is_none());
    }
}
