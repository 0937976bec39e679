//! Core domain types for the reminder engine.
//!
//! An [`Obligation`] is any vehicle-linked item with a due or expiry date:
//! a user-defined reminder, an insurance policy, or a pollution certificate.
//! The trigger engine iterates obligations through one shared surface rather
//! than branching on ad hoc fields.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GarageLogError, Result};

/// Lookahead window (days) for insurance and certificate expiry scans.
///
/// Policies and certificates whose end date is further out than this are not
/// yet candidates; records with no end date are perpetual and never scanned.
pub const EXPIRY_LOOKAHEAD_DAYS: u64 = 30;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which kind of obligation a notification refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Reminder,
    Insurance,
    PollutionCertificate,
}

impl ObligationKind {
    /// Stable string form used in the store and config keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::Insurance => "insurance",
            Self::PollutionCertificate => "pollution_certificate",
        }
    }

    /// Human-readable label used in notification messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Reminder => "Reminder",
            Self::Insurance => "Insurance policy",
            Self::PollutionCertificate => "Pollution certificate",
        }
    }

    /// Parse the stable string form back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reminder" => Some(Self::Reminder),
            "insurance" => Some(Self::Insurance),
            "pollution_certificate" => Some(Self::PollutionCertificate),
            _ => None,
        }
    }
}

/// Calendar cadence by which an obligation's due date regenerates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    /// One-shot obligation.
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Recurring with no stored cadence end (legacy flag kept for import).
    NoEnd,
}

impl RecurrenceKind {
    /// True for cadences that actually advance the date.
    pub fn is_recurring(self) -> bool {
        matches!(self, Self::Daily | Self::Weekly | Self::Monthly | Self::Yearly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::NoEnd => "no_end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "no_end" => Some(Self::NoEnd),
            _ => None,
        }
    }
}

/// Offset before a due date at which a notification is first allowed to
/// appear.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadTime {
    SameDay,
    OneDayBefore,
    ThreeDaysBefore,
    OneWeekBefore,
    OneMonthBefore,
}

impl LeadTime {
    /// Earliest calendar day a notification for `due` may be created.
    ///
    /// `OneMonthBefore` steps back one calendar month (chrono clamps to the
    /// last valid day of the target month); the day-based variants subtract
    /// fixed day counts.
    pub fn notification_date(self, due: NaiveDate) -> NaiveDate {
        match self {
            Self::SameDay => due,
            Self::OneDayBefore => due.checked_sub_days(Days::new(1)).unwrap_or(due),
            Self::ThreeDaysBefore => due.checked_sub_days(Days::new(3)).unwrap_or(due),
            Self::OneWeekBefore => due.checked_sub_days(Days::new(7)).unwrap_or(due),
            Self::OneMonthBefore => due.checked_sub_months(Months::new(1)).unwrap_or(due),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SameDay => "same_day",
            Self::OneDayBefore => "one_day_before",
            Self::ThreeDaysBefore => "three_days_before",
            Self::OneWeekBefore => "one_week_before",
            Self::OneMonthBefore => "one_month_before",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "same_day" => Some(Self::SameDay),
            "one_day_before" => Some(Self::OneDayBefore),
            "three_days_before" => Some(Self::ThreeDaysBefore),
            "one_week_before" => Some(Self::OneWeekBefore),
            "one_month_before" => Some(Self::OneMonthBefore),
            _ => None,
        }
    }
}

/// Who created a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    System,
    User,
    /// Created by a trigger job; participates in the dedup key.
    Auto,
}

impl NotificationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Obligation variants
// ---------------------------------------------------------------------------

/// A user-defined reminder (service, tyre rotation, renewal paperwork, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub vehicle_id: i64,
    pub title: String,
    /// Optional free-text note appended to generated messages.
    #[serde(default)]
    pub note: Option<String>,
    pub due_date: NaiveDate,
    pub recurrence: RecurrenceKind,
    /// Units of `recurrence` between occurrences; always >= 1.
    pub recurrence_interval: u32,
    /// Day after which the cadence stops; `None` = open-ended.
    #[serde(default)]
    pub recurrence_end: Option<NaiveDate>,
    pub lead_time: LeadTime,
    /// Explicit completion flag; completed reminders are never scanned.
    #[serde(default)]
    pub completed: bool,
}

impl Reminder {
    /// Check the structural invariants before the record is stored.
    ///
    /// `recurrence_end` must be strictly after the anchor due date, and the
    /// interval must be at least 1.
    pub fn validate(&self) -> Result<()> {
        if self.recurrence_interval == 0 {
            return Err(GarageLogError::Obligation(format!(
                "reminder '{}': recurrence interval must be >= 1",
                self.title
            )));
        }
        if let Some(end) = self.recurrence_end {
            if end <= self.due_date {
                return Err(GarageLogError::Obligation(format!(
                    "reminder '{}': recurrence end {end} is not after due date {}",
                    self.title, self.due_date
                )));
            }
        }
        Ok(())
    }
}

/// An insurance policy for a vehicle.
///
/// A renewing policy (recurrence other than `None`) carries no authoritative
/// cadence end date, so none is stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: i64,
    pub vehicle_id: i64,
    pub insurer: String,
    pub policy_number: String,
    /// Policy end date; `None` = perpetual cover, never scanned.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub recurrence: RecurrenceKind,
    pub recurrence_interval: u32,
}

/// A pollution-under-control certificate for a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollutionCertificate {
    pub id: i64,
    pub vehicle_id: i64,
    pub certificate_number: String,
    /// Certificate expiry; `None` = no expiry on record, never scanned.
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub recurrence: RecurrenceKind,
    pub recurrence_interval: u32,
}

/// Any vehicle-linked item with a due or expiry date.
#[derive(Debug, Clone)]
pub enum Obligation {
    Reminder(Reminder),
    Insurance(InsurancePolicy),
    Pollution(PollutionCertificate),
}

impl Obligation {
    pub fn kind(&self) -> ObligationKind {
        match self {
            Self::Reminder(_) => ObligationKind::Reminder,
            Self::Insurance(_) => ObligationKind::Insurance,
            Self::Pollution(_) => ObligationKind::PollutionCertificate,
        }
    }

    pub fn vehicle_id(&self) -> i64 {
        match self {
            Self::Reminder(r) => r.vehicle_id,
            Self::Insurance(p) => p.vehicle_id,
            Self::Pollution(c) => c.vehicle_id,
        }
    }

    /// Anchor due/expiry date; `None` for perpetual insurance/certificates.
    pub fn due_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Reminder(r) => Some(r.due_date),
            Self::Insurance(p) => p.end_date,
            Self::Pollution(c) => c.expiry_date,
        }
    }

    /// Whether the obligation should be scanned at all.
    ///
    /// Reminders carry an explicit completion flag; insurance and
    /// certificates are active by virtue of existing.
    pub fn is_active(&self) -> bool {
        match self {
            Self::Reminder(r) => !r.completed,
            Self::Insurance(_) | Self::Pollution(_) => true,
        }
    }

    pub fn recurrence(&self) -> RecurrenceKind {
        match self {
            Self::Reminder(r) => r.recurrence,
            Self::Insurance(p) => p.recurrence,
            Self::Pollution(c) => c.recurrence,
        }
    }

    pub fn recurrence_interval(&self) -> u32 {
        match self {
            Self::Reminder(r) => r.recurrence_interval,
            Self::Insurance(p) => p.recurrence_interval,
            Self::Pollution(c) => c.recurrence_interval,
        }
    }

    /// Day after which a reminder's cadence stops.
    ///
    /// Always `None` for insurance/certificates: a recurrence other than
    /// `None` on those means the renewal is open-ended (normalized rule).
    pub fn recurrence_end(&self) -> Option<NaiveDate> {
        match self {
            Self::Reminder(r) => r.recurrence_end,
            Self::Insurance(_) | Self::Pollution(_) => None,
        }
    }

    /// Free-text note appended to generated messages, if any.
    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Reminder(r) => r.note.as_deref(),
            Self::Insurance(_) | Self::Pollution(_) => None,
        }
    }

    /// Short human label used in message composition.
    pub fn title(&self) -> &str {
        match self {
            Self::Reminder(r) => &r.title,
            Self::Insurance(p) => &p.insurer,
            Self::Pollution(c) => &c.certificate_number,
        }
    }

    /// Earliest calendar day a notification for `due` may appear.
    ///
    /// Reminders use their stored lead time; insurance and certificates use
    /// the fixed expiry lookahead.
    pub fn window_start(&self, due: NaiveDate) -> NaiveDate {
        match self {
            Self::Reminder(r) => r.lead_time.notification_date(due),
            Self::Insurance(_) | Self::Pollution(_) => due
                .checked_sub_days(Days::new(EXPIRY_LOOKAHEAD_DAYS))
                .unwrap_or(due),
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A notification record produced by a trigger job or the CRUD layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub vehicle_id: i64,
    pub kind: ObligationKind,
    pub message: String,
    pub source: NotificationSource,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Build a fresh unread auto-generated notification.
    pub fn auto(
        vehicle_id: i64,
        kind: ObligationKind,
        message: impl Into<String>,
        due_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vehicle_id,
            kind,
            message: message.into(),
            source: NotificationSource::Auto,
            due_date,
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn lead_time_offsets() {
        let due = date(2024, 3, 10);
        assert_eq!(LeadTime::SameDay.notification_date(due), due);
        assert_eq!(LeadTime::OneDayBefore.notification_date(due), date(2024, 3, 9));
        assert_eq!(LeadTime::ThreeDaysBefore.notification_date(due), date(2024, 3, 7));
        assert_eq!(LeadTime::OneWeekBefore.notification_date(due), date(2024, 3, 3));
        assert_eq!(LeadTime::OneMonthBefore.notification_date(due), date(2024, 2, 10));
    }

    #[test]
    fn one_month_before_clamps_to_month_end() {
        // March 31 minus one calendar month clamps to February 29 (leap year).
        let due = date(2024, 3, 31);
        assert_eq!(LeadTime::OneMonthBefore.notification_date(due), date(2024, 2, 29));
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            ObligationKind::Reminder,
            ObligationKind::Insurance,
            ObligationKind::PollutionCertificate,
        ] {
            assert_eq!(ObligationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ObligationKind::parse("fuel_log"), None);
    }

    #[test]
    fn recurrence_end_before_due_is_rejected() {
        let reminder = Reminder {
            id: 1,
            vehicle_id: 1,
            title: "Service".to_owned(),
            note: None,
            due_date: date(2024, 6, 1),
            recurrence: RecurrenceKind::Monthly,
            recurrence_interval: 1,
            recurrence_end: Some(date(2024, 5, 1)),
            lead_time: LeadTime::OneWeekBefore,
            completed: false,
        };
        assert!(reminder.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let reminder = Reminder {
            id: 1,
            vehicle_id: 1,
            title: "Service".to_owned(),
            note: None,
            due_date: date(2024, 6, 1),
            recurrence: RecurrenceKind::Monthly,
            recurrence_interval: 0,
            recurrence_end: None,
            lead_time: LeadTime::SameDay,
            completed: false,
        };
        assert!(reminder.validate().is_err());
    }

    #[test]
    fn perpetual_policy_has_no_due_date() {
        let policy = Obligation::Insurance(InsurancePolicy {
            id: 1,
            vehicle_id: 7,
            insurer: "Acme Mutual".to_owned(),
            policy_number: "AM-100".to_owned(),
            end_date: None,
            recurrence: RecurrenceKind::Yearly,
            recurrence_interval: 1,
        });
        assert!(policy.due_date().is_none());
        assert!(policy.is_active());
        assert_eq!(policy.recurrence_end(), None);
    }

    #[test]
    fn expiry_window_start_uses_lookahead() {
        let cert = Obligation::Pollution(PollutionCertificate {
            id: 1,
            vehicle_id: 7,
            certificate_number: "PUC-42".to_owned(),
            expiry_date: Some(date(2024, 7, 31)),
            recurrence: RecurrenceKind::None,
            recurrence_interval: 1,
        });
        assert_eq!(cert.window_start(date(2024, 7, 31)), date(2024, 7, 1));
    }

    #[test]
    fn auto_notification_starts_unread() {
        let now = date(2024, 3, 5).and_hms_opt(8, 0, 0).expect("time").and_utc();
        let n = Notification::auto(3, ObligationKind::Reminder, "Service due", date(2024, 3, 10), now);
        assert!(!n.is_read);
        assert_eq!(n.source, NotificationSource::Auto);
        assert_eq!(n.created_at, n.updated_at);
        assert!(!n.id.is_empty());
    }
}
