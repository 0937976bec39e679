//! Time source abstraction.
//!
//! All temporal logic in the engine (firing windows, retention cutoffs,
//! digest urgency) asks a [`Clock`] for "now" instead of reading the system
//! time directly, so tests can pin the calendar day.

use chrono::{DateTime, NaiveDate, Utc};

/// Source of the current instant and calendar day.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar day in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Pin the clock to midnight UTC of the given calendar day.
    pub fn at_midnight(date: NaiveDate) -> Self {
        Self(
            date.and_hms_opt(0, 0, 0)
                .unwrap_or_default()
                .and_utc(),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
