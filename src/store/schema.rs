//! SQLite DDL for the GarageLog engine store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the engine database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent. The
/// partial unique index on `notifications` is the dedup contract for
/// auto-generated rows: an `INSERT OR IGNORE` hitting it is a no-op.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads during writes.
PRAGMA journal_mode = WAL;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- User-defined reminders.
CREATE TABLE IF NOT EXISTS reminders (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id          INTEGER NOT NULL,
    title               TEXT NOT NULL,
    note                TEXT,
    due_date            TEXT NOT NULL,       -- YYYY-MM-DD
    recurrence          TEXT NOT NULL DEFAULT 'none',
    recurrence_interval INTEGER NOT NULL DEFAULT 1,
    recurrence_end      TEXT,                -- YYYY-MM-DD, NULL = open-ended
    lead_time           TEXT NOT NULL DEFAULT 'three_days_before',
    completed           INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_reminders_active ON reminders(completed, due_date);

-- Insurance policies.
CREATE TABLE IF NOT EXISTS insurance_policies (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id          INTEGER NOT NULL,
    insurer             TEXT NOT NULL,
    policy_number       TEXT NOT NULL,
    end_date            TEXT,                -- YYYY-MM-DD, NULL = perpetual
    recurrence          TEXT NOT NULL DEFAULT 'none',
    recurrence_interval INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_policies_end ON insurance_policies(end_date);

-- Pollution-under-control certificates.
CREATE TABLE IF NOT EXISTS pollution_certificates (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    vehicle_id          INTEGER NOT NULL,
    certificate_number  TEXT NOT NULL,
    expiry_date         TEXT,                -- YYYY-MM-DD, NULL = no expiry
    recurrence          TEXT NOT NULL DEFAULT 'none',
    recurrence_interval INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_certificates_expiry ON pollution_certificates(expiry_date);

-- Notifications produced by trigger jobs and the CRUD layer.
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY,
    vehicle_id INTEGER NOT NULL,
    kind       TEXT NOT NULL,
    message    TEXT NOT NULL,
    source     TEXT NOT NULL,
    due_date   TEXT NOT NULL,               -- YYYY-MM-DD
    is_read    INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT 0,  -- epoch seconds UTC
    updated_at INTEGER NOT NULL DEFAULT 0
);

-- Dedup key: at most one auto notification per (vehicle, kind, due date).
CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_dedup
    ON notifications(vehicle_id, kind, due_date) WHERE source = 'auto';

CREATE INDEX IF NOT EXISTS idx_notifications_unread
    ON notifications(is_read, due_date, created_at);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version into `schema_meta`
/// if this is a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the current schema version from the database.
///
/// Returns `None` if the `schema_meta` table is empty or the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
