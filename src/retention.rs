//! Retention sweep for read notifications.
//!
//! Read notifications older than the retention period are deleted; unread
//! ones are kept indefinitely so nothing disappears before the user saw it.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::NotificationStore;

/// Days a read notification is kept before the sweep removes it.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Deletes read notifications past their retention period.
pub struct RetentionSweeper {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    retention_days: i64,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(store, clock, DEFAULT_RETENTION_DAYS)
    }

    /// Override the retention period (kept at least one day).
    pub fn with_retention(
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            clock,
            retention_days: retention_days.max(1),
        }
    }

    /// Run one sweep; returns the number of rows deleted.
    pub fn sweep(&self) -> Result<usize> {
        let cutoff = self.clock.now() - Duration::days(self.retention_days);
        let deleted = self.store.delete_read_created_before(cutoff)?;
        if deleted > 0 {
            info!(deleted, retention_days = self.retention_days, "retention sweep removed read notifications");
        }
        Ok(deleted)
    }
}
