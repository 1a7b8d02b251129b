//! StepJournal over SQLite: the `step_journal` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{SqliteStore, conversion_error, parse_col, sql_limit, to_ms, ts_col};
use crate::domain::{DispatchError, EntryId, TenantId};
use crate::ports::{PendingApply, Step, StepJournal};

#[async_trait]
impl StepJournal for SqliteStore {
    async fn put_step(
        &self,
        tenant: &TenantId,
        entry: EntryId,
        step: Step,
        output: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let tenant = tenant.clone();
        let output = serde_json::to_string(output)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO step_journal (tenant, entry_id, step, output, recorded_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    tenant.as_str(),
                    entry.to_string(),
                    step.as_str(),
                    output,
                    to_ms(now)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_step(
        &self,
        tenant: &TenantId,
        entry: EntryId,
        step: Step,
    ) -> Result<Option<serde_json::Value>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT output FROM step_journal
                     WHERE tenant = ?1 AND entry_id = ?2 AND step = ?3",
                    params![tenant.as_str(), entry.to_string(), step.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.map(|r| serde_json::from_str::<serde_json::Value>(&r)).transpose()?)
        })
        .await
    }

    async fn pending_applies(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<PendingApply>, DispatchError> {
        let tenant = tenant.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT i.entry_id, i.output, i.recorded_at_ms FROM step_journal i
                 WHERE i.tenant = ?1 AND i.step = 'invoke'
                   AND NOT EXISTS (
                       SELECT 1 FROM step_journal a
                       WHERE a.tenant = i.tenant AND a.entry_id = i.entry_id AND a.step = 'apply'
                   )
                 ORDER BY i.recorded_at_ms ASC, i.rowid ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![tenant.as_str(), sql_limit(limit)], |row| {
                    let output: String = row.get(1)?;
                    Ok(PendingApply {
                        entry: parse_col(row, 0)?,
                        result: serde_json::from_str(&output)
                            .map_err(|e| conversion_error(1, e))?,
                        recorded_at: ts_col(row, 2)?,
                    })
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
    use crate::domain::EntryResult;
    use chrono::TimeZone;

    #[tokio::test]
    async fn pending_applies_lists_unapplied_invokes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tenant = TenantId::new("alice").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let done = EntryId::generate();
        let pending = EntryId::generate();
        let result = serde_json::to_value(EntryResult::success("shipped")).unwrap();

        for entry in [done, pending] {
            store
                .put_step(&tenant, entry, Step::Invoke, &result, at)
                .await
                .unwrap();
        }
        store
            .put_step(&tenant, done, Step::Apply, &serde_json::json!({}), at)
            .await
            .unwrap();

        let open = store.pending_applies(&tenant, 10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].entry, pending);
        assert_eq!(open[0].result, EntryResult::success("shipped"));
    }

    #[tokio::test]
    async fn first_write_of_a_step_wins() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tenant = TenantId::new("alice").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let entry = EntryId::generate();

        store
            .put_step(&tenant, entry, Step::Invoke, &serde_json::json!(1), at)
            .await
            .unwrap();
        store
            .put_step(&tenant, entry, Step::Invoke, &serde_json::json!(2), at)
            .await
            .unwrap();
        let stored = store.get_step(&tenant, entry, Step::Invoke).await.unwrap();
        assert_eq!(stored, Some(serde_json::json!(1)));
    }
}
