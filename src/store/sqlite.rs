//! SQLite-backed engine store.
//!
//! Thread-safe via an internal `Mutex<Connection>`. All writes are
//! serialized; the scheduler's job bodies run on blocking tasks, so holding
//! the mutex for the duration of a statement is fine.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use super::schema::{apply_schema, read_schema_version};
use super::{NotificationStore, ObligationSource};
use crate::error::{GarageLogError, Result};
use crate::model::{
    InsurancePolicy, LeadTime, Notification, NotificationSource as Source, Obligation,
    ObligationKind, PollutionCertificate, RecurrenceKind, Reminder,
};

/// Database filename within the data directory.
const DB_FILENAME: &str = "garagelog.db";

const DATE_FMT: &str = "%Y-%m-%d";

/// SQLite-backed store implementing both engine-facing traits.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        apply_schema(&conn).map_err(db_err)?;
        if let Some(version) = read_schema_version(&conn).map_err(db_err)? {
            debug!(version, path = %path.display(), "engine database ready");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a fresh in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        apply_schema(&conn).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database location for the daemon.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("garagelog").join(DB_FILENAME))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GarageLogError::Store(format!("store mutex poisoned: {e}")))
    }

    // -----------------------------------------------------------------------
    // Obligation writes (used by the CRUD layer and tests to seed records)
    // -----------------------------------------------------------------------

    /// Insert a reminder after checking its invariants; returns the row id.
    pub fn insert_reminder(&self, reminder: &Reminder) -> Result<i64> {
        reminder.validate()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reminders \
             (vehicle_id, title, note, due_date, recurrence, recurrence_interval, \
              recurrence_end, lead_time, completed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                reminder.vehicle_id,
                reminder.title,
                reminder.note,
                fmt_date(reminder.due_date),
                reminder.recurrence.as_str(),
                reminder.recurrence_interval,
                reminder.recurrence_end.map(fmt_date),
                reminder.lead_time.as_str(),
                reminder.completed,
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Flip a reminder's completion flag; returns whether it was found.
    pub fn set_reminder_completed(&self, id: i64, completed: bool) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE reminders SET completed = ?1 WHERE id = ?2",
                params![completed, id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Insert an insurance policy; returns the row id.
    pub fn insert_policy(&self, policy: &InsurancePolicy) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO insurance_policies \
             (vehicle_id, insurer, policy_number, end_date, recurrence, recurrence_interval) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                policy.vehicle_id,
                policy.insurer,
                policy.policy_number,
                policy.end_date.map(fmt_date),
                policy.recurrence.as_str(),
                policy.recurrence_interval,
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a pollution certificate; returns the row id.
    pub fn insert_certificate(&self, cert: &PollutionCertificate) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pollution_certificates \
             (vehicle_id, certificate_number, expiry_date, recurrence, recurrence_interval) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cert.vehicle_id,
                cert.certificate_number,
                cert.expiry_date.map(fmt_date),
                cert.recurrence.as_str(),
                cert.recurrence_interval,
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Total notification rows (any source, read or unread).
    pub fn notification_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }
}

impl ObligationSource for SqliteStore {
    fn active_obligations(&self, kind: ObligationKind) -> Result<Vec<Obligation>> {
        let conn = self.lock()?;
        match kind {
            ObligationKind::Reminder => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, vehicle_id, title, note, due_date, recurrence, \
                         recurrence_interval, recurrence_end, lead_time, completed \
                         FROM reminders WHERE completed = 0 ORDER BY due_date",
                    )
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map([], row_to_reminder)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                Ok(rows.into_iter().map(Obligation::Reminder).collect())
            }
            ObligationKind::Insurance => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, vehicle_id, insurer, policy_number, end_date, \
                         recurrence, recurrence_interval \
                         FROM insurance_policies ORDER BY end_date",
                    )
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map([], row_to_policy)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                Ok(rows.into_iter().map(Obligation::Insurance).collect())
            }
            ObligationKind::PollutionCertificate => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, vehicle_id, certificate_number, expiry_date, \
                         recurrence, recurrence_interval \
                         FROM pollution_certificates ORDER BY expiry_date",
                    )
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map([], row_to_certificate)
                    .map_err(db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db_err)?;
                Ok(rows.into_iter().map(Obligation::Pollution).collect())
            }
        }
    }
}

impl NotificationStore for SqliteStore {
    fn insert_notification(&self, notification: &Notification) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO notifications \
                 (id, vehicle_id, kind, message, source, due_date, is_read, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    notification.id,
                    notification.vehicle_id,
                    notification.kind.as_str(),
                    notification.message,
                    notification.source.as_str(),
                    fmt_date(notification.due_date),
                    notification.is_read,
                    notification.created_at.timestamp(),
                    notification.updated_at.timestamp(),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            debug!(
                vehicle_id = notification.vehicle_id,
                kind = notification.kind.as_str(),
                due = %notification.due_date,
                "duplicate auto notification suppressed by dedup index"
            );
        }
        Ok(changed > 0)
    }

    fn find_auto_notification(
        &self,
        vehicle_id: i64,
        kind: ObligationKind,
        due_date: NaiveDate,
    ) -> Result<Option<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, vehicle_id, kind, message, source, due_date, is_read, \
                 created_at, updated_at \
                 FROM notifications \
                 WHERE vehicle_id = ?1 AND kind = ?2 AND due_date = ?3 AND source = 'auto' \
                 LIMIT 1",
            )
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(
                params![vehicle_id, kind.as_str(), fmt_date(due_date)],
                row_to_notification,
            )
            .map_err(db_err)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(db_err)?)),
            None => Ok(None),
        }
    }

    fn unread_notifications(&self) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, vehicle_id, kind, message, source, due_date, is_read, \
                 created_at, updated_at \
                 FROM notifications WHERE is_read = 0 \
                 ORDER BY due_date ASC, created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_notification)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    fn mark_read(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE notifications SET is_read = 1, updated_at = ?1 WHERE id = ?2",
                params![now.timestamp(), id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    fn mark_all_read(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE notifications SET is_read = 1, updated_at = ?1 WHERE is_read = 0",
                params![now.timestamp()],
            )
            .map_err(db_err)?;
        Ok(changed)
    }

    fn delete_read_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM notifications WHERE is_read = 1 AND created_at < ?1",
                params![cutoff.timestamp()],
            )
            .map_err(db_err)?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Row mappers and conversions
// ---------------------------------------------------------------------------

fn db_err(e: rusqlite::Error) -> GarageLogError {
    GarageLogError::Store(e.to_string())
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn parse_date(s: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_opt_date(s: Option<String>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match s {
        Some(s) => parse_date(&s, idx).map(Some),
        None => Ok(None),
    }
}

fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        title: row.get(2)?,
        note: row.get(3)?,
        due_date: parse_date(&row.get::<_, String>(4)?, 4)?,
        recurrence: RecurrenceKind::parse(&row.get::<_, String>(5)?)
            .unwrap_or(RecurrenceKind::None),
        recurrence_interval: row.get(6)?,
        recurrence_end: parse_opt_date(row.get(7)?, 7)?,
        lead_time: LeadTime::parse(&row.get::<_, String>(8)?).unwrap_or(LeadTime::ThreeDaysBefore),
        completed: row.get(9)?,
    })
}

fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<InsurancePolicy> {
    Ok(InsurancePolicy {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        insurer: row.get(2)?,
        policy_number: row.get(3)?,
        end_date: parse_opt_date(row.get(4)?, 4)?,
        recurrence: RecurrenceKind::parse(&row.get::<_, String>(5)?)
            .unwrap_or(RecurrenceKind::None),
        recurrence_interval: row.get(6)?,
    })
}

fn row_to_certificate(row: &rusqlite::Row<'_>) -> rusqlite::Result<PollutionCertificate> {
    Ok(PollutionCertificate {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        certificate_number: row.get(2)?,
        expiry_date: parse_opt_date(row.get(3)?, 3)?,
        recurrence: RecurrenceKind::parse(&row.get::<_, String>(4)?)
            .unwrap_or(RecurrenceKind::None),
        recurrence_interval: row.get(5)?,
    })
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        kind: ObligationKind::parse(&row.get::<_, String>(2)?).unwrap_or(ObligationKind::Reminder),
        message: row.get(3)?,
        source: Source::parse(&row.get::<_, String>(4)?).unwrap_or(Source::System),
        due_date: parse_date(&row.get::<_, String>(5)?, 5)?,
        is_read: row.get(6)?,
        created_at: epoch_to_utc(row.get(7)?),
        updated_at: epoch_to_utc(row.get(8)?),
    })
}
