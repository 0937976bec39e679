//! Notification trigger engine.
//!
//! One scan pass per obligation kind: resolve each obligation's effective
//! due date (advancing recurring ones to the first occurrence not in the
//! past), check the lead-time window, and insert an auto notification unless
//! the dedup key already has one. A failure on one obligation is logged and
//! skipped; the rest of the pass continues.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::model::{Notification, Obligation, ObligationKind};
use crate::recurrence::{has_ended, next_occurrence};
use crate::store::{NotificationStore, ObligationSource};

/// Counters for one trigger pass, used for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    /// Obligations examined.
    pub scanned: usize,
    /// Notifications inserted.
    pub created: usize,
    /// Skipped because the dedup key already had an auto notification.
    pub duplicates: usize,
    /// Obligations that errored; the pass continued past them.
    pub errors: usize,
}

/// Scans obligations and creates due-date notifications.
pub struct TriggerEngine {
    source: Arc<dyn ObligationSource>,
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
}

impl TriggerEngine {
    pub fn new(
        source: Arc<dyn ObligationSource>,
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            store,
            clock,
        }
    }

    /// Run one scan pass over all active obligations of `kind`.
    pub fn process(&self, kind: ObligationKind) -> Result<TriggerOutcome> {
        let today = self.clock.today();
        let obligations = self.source.active_obligations(kind)?;

        let mut outcome = TriggerOutcome::default();
        for obligation in &obligations {
            outcome.scanned += 1;
            match self.process_one(obligation, today) {
                Ok(ItemResult::Created) => outcome.created += 1,
                Ok(ItemResult::Duplicate) => outcome.duplicates += 1,
                Ok(ItemResult::OutOfWindow) => {}
                Err(e) => {
                    outcome.errors += 1;
                    warn!(
                        kind = kind.as_str(),
                        vehicle_id = obligation.vehicle_id(),
                        title = obligation.title(),
                        "trigger pass skipped one obligation: {e}"
                    );
                }
            }
        }

        info!(
            kind = kind.as_str(),
            scanned = outcome.scanned,
            created = outcome.created,
            duplicates = outcome.duplicates,
            errors = outcome.errors,
            "trigger pass complete"
        );
        Ok(outcome)
    }

    fn process_one(&self, obligation: &Obligation, today: NaiveDate) -> Result<ItemResult> {
        if !obligation.is_active() {
            return Ok(ItemResult::OutOfWindow);
        }
        // Perpetual policies/certificates have nothing to notify about.
        let Some(anchor) = obligation.due_date() else {
            return Ok(ItemResult::OutOfWindow);
        };

        let Some(due) = effective_due_date(obligation, anchor, today) else {
            // Cadence ran past its configured end.
            return Ok(ItemResult::OutOfWindow);
        };

        if !in_window(obligation.window_start(due), due, today) {
            return Ok(ItemResult::OutOfWindow);
        }

        let kind = obligation.kind();
        let vehicle_id = obligation.vehicle_id();
        if self
            .store
            .find_auto_notification(vehicle_id, kind, due)?
            .is_some()
        {
            debug!(
                kind = kind.as_str(),
                vehicle_id,
                due = %due,
                "notification already exists for this occurrence"
            );
            return Ok(ItemResult::Duplicate);
        }

        let message = compose_message(obligation, due, today);
        let notification = Notification::auto(vehicle_id, kind, message, due, self.clock.now());
        if self.store.insert_notification(&notification)? {
            Ok(ItemResult::Created)
        } else {
            Ok(ItemResult::Duplicate)
        }
    }
}

enum ItemResult {
    Created,
    Duplicate,
    OutOfWindow,
}

/// The firing window: any day from the lead-time date through the due date,
/// inclusive, at calendar-day granularity. The whole range is eligible so a
/// job outage inside the window does not permanently suppress a
/// notification; past the due date the window is closed.
pub fn in_window(window_start: NaiveDate, due: NaiveDate, today: NaiveDate) -> bool {
    window_start <= today && today <= due
}

/// Safety bound on recurrence roll-forward. A daily cadence takes under 300
/// steps per year of backlog, so any real anchor reaches today well inside
/// this; hitting it means the date arithmetic is not advancing.
const ROLL_FORWARD_LIMIT: usize = 100_000;

/// Resolve the occurrence a notification should target.
///
/// Recurring obligations advance from the anchor to the first occurrence on
/// or after `today`, however far back the anchor sits; earlier occurrences
/// are considered handled. Returns `None` when the cadence ends before
/// reaching today, or when the date arithmetic stops advancing (skip, never
/// a stale date). Non-recurring obligations keep their anchor date even when
/// it is in the past.
fn effective_due_date(
    obligation: &Obligation,
    anchor: NaiveDate,
    today: NaiveDate,
) -> Option<NaiveDate> {
    if !obligation.recurrence().is_recurring() {
        return Some(anchor);
    }

    let kind = obligation.recurrence();
    let interval = obligation.recurrence_interval();
    let end = obligation.recurrence_end();

    let mut due = anchor;
    for _ in 0..ROLL_FORWARD_LIMIT {
        if has_ended(due, end) {
            return None;
        }
        if due >= today {
            return Some(due);
        }
        let next = next_occurrence(due, kind, interval);
        if next <= due {
            return None;
        }
        due = next;
    }
    None
}

/// Human-readable message for a notification.
fn compose_message(obligation: &Obligation, due: NaiveDate, today: NaiveDate) -> String {
    let label = obligation.kind().label();
    let title = obligation.title();
    let days = (due - today).num_days();

    let mut message = if days == 0 {
        format!("{label} '{title}' is due today")
    } else if days == 1 {
        format!("{label} '{title}' is due tomorrow")
    } else if days > 1 {
        format!("{label} '{title}' is due in {days} days")
    } else if days == -1 {
        format!("{label} '{title}' is overdue by 1 day")
    } else {
        format!("{label} '{title}' is overdue by {} days", -days)
    };

    if let Some(note) = obligation.note() {
        message.push_str(&format!(" ({note})"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{InsurancePolicy, LeadTime, RecurrenceKind, Reminder};
    use crate::store::SqliteStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn engine_with_store() -> (TriggerEngine, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
        let clock = Arc::new(FixedClock::at_midnight(date(2024, 3, 5)));
        let engine = TriggerEngine::new(store.clone(), store.clone(), clock);
        (engine, store)
    }

    fn reminder(due: NaiveDate, lead_time: LeadTime) -> Reminder {
        Reminder {
            id: 0,
            vehicle_id: 1,
            title: "Annual service".to_owned(),
            note: None,
            due_date: due,
            recurrence: RecurrenceKind::None,
            recurrence_interval: 1,
            recurrence_end: None,
            lead_time,
            completed: false,
        }
    }

    #[test]
    fn inside_window_creates_notification() {
        let (engine, store) = engine_with_store();
        // Due 2024-03-10 with a one-week lead: window opens 2024-03-03,
        // today is 2024-03-05.
        store
            .insert_reminder(&reminder(date(2024, 3, 10), LeadTime::OneWeekBefore))
            .expect("insert");

        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.created, 1);

        let unread = store.unread_notifications().expect("unread");
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].due_date, date(2024, 3, 10));
        assert_eq!(unread[0].message, "Reminder 'Annual service' is due in 5 days");
    }

    #[test]
    fn before_window_creates_nothing() {
        let (engine, store) = engine_with_store();
        // Same due date, three-day lead: window opens 2024-03-07.
        store
            .insert_reminder(&reminder(date(2024, 3, 10), LeadTime::ThreeDaysBefore))
            .expect("insert");

        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.created, 0);
        assert!(store.unread_notifications().expect("unread").is_empty());
    }

    #[test]
    fn second_pass_is_idempotent() {
        let (engine, store) = engine_with_store();
        store
            .insert_reminder(&reminder(date(2024, 3, 10), LeadTime::OneWeekBefore))
            .expect("insert");

        assert_eq!(engine.process(ObligationKind::Reminder).expect("first").created, 1);
        let second = engine.process(ObligationKind::Reminder).expect("second");
        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.notification_count().expect("count"), 1);
    }

    #[test]
    fn window_bounds_are_inclusive_and_close_after_due() {
        let start = date(2024, 3, 3);
        let due = date(2024, 3, 10);
        assert!(in_window(start, due, date(2024, 3, 3)));
        assert!(in_window(start, due, date(2024, 3, 5)));
        assert!(in_window(start, due, date(2024, 3, 10)));
        assert!(!in_window(start, due, date(2024, 3, 1)));
        assert!(!in_window(start, due, date(2024, 3, 11)));
    }

    #[test]
    fn past_due_one_shot_is_out_of_window() {
        let (engine, store) = engine_with_store();
        store
            .insert_reminder(&reminder(date(2024, 3, 1), LeadTime::SameDay))
            .expect("insert");

        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.created, 0);
        assert!(store.unread_notifications().expect("unread").is_empty());
    }

    #[test]
    fn message_phrasing_covers_today_and_overdue() {
        let o = crate::model::Obligation::Reminder(reminder(date(2024, 3, 5), LeadTime::SameDay));
        assert_eq!(
            compose_message(&o, date(2024, 3, 5), date(2024, 3, 5)),
            "Reminder 'Annual service' is due today"
        );
        assert_eq!(
            compose_message(&o, date(2024, 3, 6), date(2024, 3, 5)),
            "Reminder 'Annual service' is due tomorrow"
        );
        assert_eq!(
            compose_message(&o, date(2024, 3, 1), date(2024, 3, 5)),
            "Reminder 'Annual service' is overdue by 4 days"
        );
    }

    #[test]
    fn recurring_reminder_advances_past_stale_occurrences() {
        let (engine, store) = engine_with_store();
        let mut r = reminder(date(2024, 2, 5), LeadTime::OneWeekBefore);
        r.recurrence = RecurrenceKind::Weekly;
        store.insert_reminder(&r).expect("insert");

        // Anchor 2024-02-05 weekly: occurrences land on Mondays; the first
        // on or after today (2024-03-05, a Tuesday) is 2024-03-11, and its
        // one-week window opened on 2024-03-04.
        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.created, 1);
        let unread = store.unread_notifications().expect("unread");
        assert_eq!(unread[0].due_date, date(2024, 3, 11));
    }

    #[test]
    fn long_overdue_daily_reminder_rolls_forward_to_today() {
        let (engine, store) = engine_with_store();
        // Anchored 150 days before today, open-ended daily cadence.
        let mut r = reminder(date(2023, 10, 7), LeadTime::SameDay);
        r.recurrence = RecurrenceKind::Daily;
        store.insert_reminder(&r).expect("insert");

        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.created, 1);
        let unread = store.unread_notifications().expect("unread");
        assert_eq!(unread[0].due_date, date(2024, 3, 5));
        assert_eq!(unread[0].message, "Reminder 'Annual service' is due today");
    }

    #[test]
    fn ended_cadence_creates_nothing() {
        let (engine, store) = engine_with_store();
        let mut r = reminder(date(2024, 1, 1), LeadTime::SameDay);
        r.recurrence = RecurrenceKind::Weekly;
        r.recurrence_end = Some(date(2024, 2, 1));
        store.insert_reminder(&r).expect("insert");

        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.created, 0);
        assert!(store.unread_notifications().expect("unread").is_empty());
    }

    #[test]
    fn completed_reminders_are_ignored() {
        let (engine, store) = engine_with_store();
        let id = store
            .insert_reminder(&reminder(date(2024, 3, 10), LeadTime::OneWeekBefore))
            .expect("insert");
        store.set_reminder_completed(id, true).expect("complete");

        let outcome = engine.process(ObligationKind::Reminder).expect("process");
        assert_eq!(outcome.scanned, 0);
        assert_eq!(outcome.created, 0);
    }

    #[test]
    fn insurance_uses_fixed_lookahead() {
        let (engine, store) = engine_with_store();
        let policy = |vehicle_id, end_date| InsurancePolicy {
            id: 0,
            vehicle_id,
            insurer: "Acme Mutual".to_owned(),
            policy_number: "AM-100".to_owned(),
            end_date,
            recurrence: RecurrenceKind::None,
            recurrence_interval: 1,
        };
        // 27 days out: inside the 30-day lookahead.
        store.insert_policy(&policy(1, Some(date(2024, 4, 1)))).expect("insert");
        // 36 days out: not yet.
        store.insert_policy(&policy(2, Some(date(2024, 4, 10)))).expect("insert");
        // Perpetual: never scanned.
        store.insert_policy(&policy(3, None)).expect("insert");

        let outcome = engine.process(ObligationKind::Insurance).expect("process");
        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.created, 1);
        let unread = store.unread_notifications().expect("unread");
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].vehicle_id, 1);
        assert_eq!(unread[0].message, "Insurance policy 'Acme Mutual' is due in 27 days");
    }

    #[test]
    fn note_is_appended_to_message() {
        let (engine, store) = engine_with_store();
        let mut r = reminder(date(2024, 3, 5), LeadTime::SameDay);
        r.note = Some("use synthetic oil".to_owned());
        store.insert_reminder(&r).expect("insert");

        engine.process(ObligationKind::Reminder).expect("process");
        let unread = store.unread_notifications().expect("unread");
        assert_eq!(
            unread[0].message,
            "Reminder 'Annual service' is due today (use synthetic oil)"
        );
    }
}
