//! Schema installation, tracked with `PRAGMA user_version`.

use rusqlite::Connection;

use crate::domain::StoreError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current < 1 {
        conn.execute_batch(V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::info!(version = SCHEMA_VERSION, "installed store schema");
    }
    Ok(())
}

const V1: &str = r#"
BEGIN;

CREATE TABLE IF NOT EXISTS tasks (
    tenant        TEXT NOT NULL,
    id            TEXT NOT NULL,
    title         TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    status        TEXT NOT NULL,
    urgency       INTEGER NOT NULL CHECK (urgency BETWEEN 1 AND 5),
    importance    INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 5),
    domain        TEXT NOT NULL,
    due_at_ms     INTEGER,
    claimed_by    TEXT,
    claimed_at_ms INTEGER,
    deleted_at_ms INTEGER,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (tenant, id)
);
CREATE INDEX IF NOT EXISTS tasks_by_status ON tasks (tenant, status);

CREATE TABLE IF NOT EXISTS task_dependencies (
    tenant        TEXT NOT NULL,
    task_id       TEXT NOT NULL,
    depends_on    TEXT NOT NULL,
    kind          TEXT NOT NULL DEFAULT 'blocks',
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (tenant, task_id, depends_on)
);
CREATE INDEX IF NOT EXISTS task_dependencies_reverse ON task_dependencies (tenant, depends_on);

CREATE TABLE IF NOT EXISTS queue_entries (
    tenant          TEXT NOT NULL,
    id              TEXT NOT NULL,
    task_id         TEXT NOT NULL,
    executor        TEXT NOT NULL,
    status          TEXT NOT NULL CHECK (status IN
                        ('queued','claimed','dispatched','completed','failed','quarantine','cancelled')),
    priority        INTEGER NOT NULL CHECK (priority BETWEEN 1 AND 25),
    context         TEXT NOT NULL,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL,
    queued_at_ms    INTEGER NOT NULL,
    available_at_ms INTEGER NOT NULL,
    claimed_at_ms   INTEGER,
    claimed_by      TEXT,
    completed_at_ms INTEGER,
    result          TEXT,
    error           TEXT,
    PRIMARY KEY (tenant, id)
);
-- at most one active entry per task
CREATE UNIQUE INDEX IF NOT EXISTS queue_entries_one_active
    ON queue_entries (tenant, task_id)
    WHERE status IN ('queued','claimed','dispatched');
CREATE INDEX IF NOT EXISTS queue_entries_pick
    ON queue_entries (tenant, executor, status, priority DESC, queued_at_ms);
CREATE INDEX IF NOT EXISTS queue_entries_by_task ON queue_entries (tenant, task_id);

CREATE TABLE IF NOT EXISTS dispatch_log (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant         TEXT NOT NULL,
    entry_id       TEXT,
    task_id        TEXT,
    executor       TEXT,
    action         TEXT NOT NULL,
    details        TEXT NOT NULL,
    recorded_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS dispatch_log_by_entry ON dispatch_log (tenant, entry_id, id);
CREATE INDEX IF NOT EXISTS dispatch_log_by_time ON dispatch_log (tenant, recorded_at_ms);

CREATE TABLE IF NOT EXISTS step_journal (
    tenant         TEXT NOT NULL,
    entry_id       TEXT NOT NULL,
    step           TEXT NOT NULL,
    output         TEXT NOT NULL,
    recorded_at_ms INTEGER NOT NULL,
    PRIMARY KEY (tenant, entry_id, step)
);

COMMIT;
"#;
