//! Persistence contracts and the SQLite-backed store.
//!
//! The engine talks to the data layer through two narrow traits:
//! [`ObligationSource`] (read-only view of what is due and when) and
//! [`NotificationStore`] (idempotent insert plus the filtered queries the
//! sweeper and digest need). [`SqliteStore`] implements both.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::model::{Notification, Obligation, ObligationKind};

/// Read-only view over persisted obligations.
pub trait ObligationSource: Send + Sync {
    /// All active obligations of one kind (completed reminders excluded).
    fn active_obligations(&self, kind: ObligationKind) -> Result<Vec<Obligation>>;
}

/// Notification persistence used by the trigger, sweeper, and digest jobs.
pub trait NotificationStore: Send + Sync {
    /// Insert a notification.
    ///
    /// A duplicate of an existing auto notification (same vehicle, kind, and
    /// due date) is a no-op, not an error; returns whether a row was added.
    fn insert_notification(&self, notification: &Notification) -> Result<bool>;

    /// Look up an existing auto notification by its dedup key.
    fn find_auto_notification(
        &self,
        vehicle_id: i64,
        kind: ObligationKind,
        due_date: NaiveDate,
    ) -> Result<Option<Notification>>;

    /// Unread notifications ordered by due date, then creation time.
    fn unread_notifications(&self) -> Result<Vec<Notification>>;

    /// Mark one notification read; returns whether it was found.
    fn mark_read(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Mark every unread notification read; returns the count updated.
    fn mark_all_read(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Delete read notifications created before `cutoff`; returns the count
    /// deleted. Unread rows are never touched.
    fn delete_read_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
