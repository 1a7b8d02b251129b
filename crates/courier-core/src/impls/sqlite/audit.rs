//! AuditSink over SQLite: the `dispatch_log` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use super::{SqliteStore, conversion_error, parse_col, to_ms, ts_col};
use crate::domain::{
    DispatchAction, DispatchError, DispatchLogEntry, EntryId, ExecutorType, TaskId, TenantId,
};
use crate::ports::AuditSink;

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<DispatchLogEntry> {
    let entry_id: Option<String> = row.get(1)?;
    let task_id: Option<String> = row.get(2)?;
    let executor: Option<String> = row.get(3)?;
    let details: String = row.get(5)?;
    Ok(DispatchLogEntry {
        tenant: parse_col(row, 0)?,
        entry_id: entry_id
            .map(|v| v.parse::<EntryId>())
            .transpose()
            .map_err(|e| conversion_error(1, e))?,
        task_id: task_id
            .map(|v| v.parse::<TaskId>())
            .transpose()
            .map_err(|e| conversion_error(2, e))?,
        executor: executor
            .map(|v| v.parse::<ExecutorType>())
            .transpose()
            .map_err(|e| conversion_error(3, e))?,
        action: parse_col(row, 4)?,
        details: serde_json::from_str(&details).map_err(|e| conversion_error(5, e))?,
        recorded_at: ts_col(row, 6)?,
    })
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn record(&self, entry: &DispatchLogEntry) -> Result<(), DispatchError> {
        let entry = entry.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO dispatch_log
                    (tenant, entry_id, task_id, executor, action, details, recorded_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.tenant.as_str(),
                    entry.entry_id.map(|id| id.to_string()),
                    entry.task_id.map(|id| id.to_string()),
                    entry.executor.map(|e| e.as_str()),
                    entry.action.as_str(),
                    serde_json::to_string(&entry.details)?,
                    to_ms(entry.recorded_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn timeline(
        &self,
        tenant: &TenantId,
        entry: EntryId,
    ) -> Result<Vec<DispatchLogEntry>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT tenant, entry_id, task_id, executor, action, details, recorded_at_ms
                 FROM dispatch_log
                 WHERE tenant = ?1 AND entry_id = ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![tenant.as_str(), entry.to_string()], log_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn action_counts(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DispatchAction, u64)>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT action, COUNT(*) FROM dispatch_log
                 WHERE tenant = ?1 AND recorded_at_ms >= ?2
                 GROUP BY action
                 ORDER BY action",
            )?;
            let rows = stmt
                .query_map(params![tenant.as_str(), to_ms(since)], |row| {
                    let count: i64 = row.get(1)?;
                    Ok((parse_col::<DispatchAction>(row, 0)?, count.max(0) as u64))
                })?
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

    #[tokio::test]
    async fn timeline_is_ordered_and_tenant_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = TenantId::new("alice").unwrap();
        let bob = TenantId::new("bob").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let entry = EntryId::generate();
        let task = TaskId::generate();

        for action in [DispatchAction::Created, DispatchAction::Claimed, DispatchAction::Completed] {
            let record = DispatchLogEntry::new(alice.clone(), action, at)
                .entry(entry)
                .task(task)
                .executor(ExecutorType::CodeAgent)
                .details(serde_json::json!({ "note": action.as_str() }));
            store.record(&record).await.unwrap();
        }

        let timeline = store.timeline(&alice, entry).await.unwrap();
        let actions: Vec<_> = timeline.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![DispatchAction::Created, DispatchAction::Claimed, DispatchAction::Completed]
        );
        assert_eq!(timeline[0].task_id, Some(task));
        assert_eq!(timeline[2].details["note"], "completed");
        assert!(store.timeline(&bob, entry).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn action_counts_since() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = TenantId::new("alice").unwrap();
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        store
            .record(&DispatchLogEntry::new(alice.clone(), DispatchAction::Failed, old))
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .record(&DispatchLogEntry::new(alice.clone(), DispatchAction::Retried, new))
                .await
                .unwrap();
        }

        let counts = store.action_counts(&alice, new).await.unwrap();
        assert_eq!(counts, vec![(DispatchAction::Retried, 2)]);
    }
}
