//! Pure calendar arithmetic for recurring obligations.
//!
//! No store or clock access — callers pass "today" in explicitly so the
//! open-ended horizon stays deterministic under test.

use chrono::{Days, Months, NaiveDate};

use crate::model::RecurrenceKind;

/// Hard cap on the number of dates a single enumeration may produce.
pub const MAX_OCCURRENCES: usize = 100;

/// Horizon for open-ended recurrences: `today` plus this many months.
const OPEN_ENDED_HORIZON_MONTHS: u32 = 24;

/// Advance `date` by `interval` units of the recurrence cadence.
///
/// Month and year steps use calendar-correct arithmetic: chrono clamps to
/// the last valid day of the target month (Jan 31 + 1 month = Feb 28/29).
/// Non-recurring kinds (`None`, `NoEnd`) return the date unchanged.
pub fn next_occurrence(date: NaiveDate, kind: RecurrenceKind, interval: u32) -> NaiveDate {
    let interval = interval.max(1);
    match kind {
        RecurrenceKind::None | RecurrenceKind::NoEnd => date,
        RecurrenceKind::Daily => date
            .checked_add_days(Days::new(u64::from(interval)))
            .unwrap_or(date),
        RecurrenceKind::Weekly => date
            .checked_add_days(Days::new(u64::from(interval) * 7))
            .unwrap_or(date),
        RecurrenceKind::Monthly => date
            .checked_add_months(Months::new(interval))
            .unwrap_or(date),
        RecurrenceKind::Yearly => date
            .checked_add_months(Months::new(interval.saturating_mul(12)))
            .unwrap_or(date),
    }
}

/// Enumerate occurrence dates starting at `start`.
///
/// Always includes `start`. Non-recurring kinds yield `[start]`. Otherwise
/// steps until the next date would pass `end` — or, when `end` is `None`,
/// pass `today + 2 years` — or until `max` entries have been produced,
/// whichever comes first. The horizon and cap are safety bounds against
/// unbounded generation for indefinite recurrences.
pub fn occurrences(
    start: NaiveDate,
    end: Option<NaiveDate>,
    kind: RecurrenceKind,
    interval: u32,
    today: NaiveDate,
    max: usize,
) -> Vec<NaiveDate> {
    let max = max.min(MAX_OCCURRENCES).max(1);
    if !kind.is_recurring() {
        return vec![start];
    }

    let horizon = match end {
        Some(end) => end,
        None => today
            .checked_add_months(Months::new(OPEN_ENDED_HORIZON_MONTHS))
            .unwrap_or(today),
    };

    let mut out = vec![start];
    let mut current = start;
    while out.len() < max {
        let next = next_occurrence(current, kind, interval);
        if next <= current || next > horizon {
            break;
        }
        out.push(next);
        current = next;
    }
    out
}

/// Whether a recurrence has run past its configured end date.
///
/// An absent end date means the cadence never ends.
pub fn has_ended(current: NaiveDate, end: Option<NaiveDate>) -> bool {
    match end {
        None => false,
        Some(end) => current > end,
    }
}
