//! GarageLog notification engine.
//!
//! Scans vehicle obligations (reminders, insurance policies, pollution
//! certificates), turns the ones entering their lead-time window into
//! deduplicated notifications, composes digests of whatever is unread, and
//! sweeps read notifications past their retention period. Cron-style timers
//! in [`scheduler`] drive the recurring jobs.

pub mod clock;
pub mod config;
pub mod digest;
pub mod error;
pub mod model;
pub mod recurrence;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use error::{GarageLogError, Result};
pub use store::SqliteStore;
