//! Cron schedule expressions for job timers.
//!
//! Supports the classic 5-field form `minute hour day-of-month month
//! day-of-week`, with `*`, steps (`*/15`), ranges (`1-5`), and comma lists.
//! Day-of-week uses 0–6 with 0 = Sunday (7 is accepted as Sunday).

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{GarageLogError, Result};

/// Upper bound on the next-fire scan, in minutes (366 days).
///
/// Any satisfiable expression fires within a year; expressions that never
/// match (e.g. `0 0 30 2 *`) return `None` instead of looping forever.
const SCAN_LIMIT_MINUTES: i64 = 366 * 24 * 60;

/// A parsed, validated cron expression.
///
/// Each field is a bitmask of permitted values; matching a timestamp is a
/// handful of bit tests.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_is_wildcard: bool,
    dow_is_wildcard: bool,
}

impl CronSchedule {
    /// Parse and validate a 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(GarageLogError::Schedule(format!(
                "expected 5 fields in cron expression, got {} in '{expr}'",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, expr)?;
        let hours = parse_field(fields[1], 0, 23, expr)?;
        let days_of_month = parse_field(fields[2], 1, 31, expr)?;
        let months = parse_field(fields[3], 1, 12, expr)?;
        let mut days_of_week = parse_field(fields[4], 0, 7, expr)?;
        // Fold 7 (alternate Sunday) into bit 0.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expr: expr.to_owned(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_is_wildcard: fields[2] == "*",
            dow_is_wildcard: fields[4] == "*",
        })
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Whether the expression matches the given instant (minute granularity).
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if self.minutes & (1 << t.minute()) == 0 {
            return false;
        }
        if self.hours & (1 << t.hour()) == 0 {
            return false;
        }
        if self.months & (1 << t.month()) == 0 {
            return false;
        }

        let dom_hit = self.days_of_month & (1 << t.day()) != 0;
        let dow_hit = self.days_of_week & (1 << t.weekday().num_days_from_sunday()) != 0;

        // Classic cron rule: when both day fields are restricted, either may
        // match; otherwise the restricted one decides.
        match (self.dom_is_wildcard, self.dow_is_wildcard) {
            (true, true) => true,
            (false, true) => dom_hit,
            (true, false) => dow_hit,
            (false, false) => dom_hit || dow_hit,
        }
    }

    /// The first instant strictly after `after` that matches.
    ///
    /// Bounded minute scan; returns `None` for unsatisfiable expressions.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after)
            + Duration::minutes(1);

        for _ in 0..SCAN_LIMIT_MINUTES {
            if self.matches(t) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

/// Parse one cron field into a bitmask over `[min, max]`.
fn parse_field(field: &str, min: u32, max: u32, expr: &str) -> Result<u64> {
    let mut mask: u64 = 0;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| bad_field(part, expr))?;
                if step == 0 {
                    return Err(bad_field(part, expr));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| bad_field(part, expr))?;
            let hi: u32 = hi.parse().map_err(|_| bad_field(part, expr))?;
            (lo, hi)
        } else {
            let v: u32 = range.parse().map_err(|_| bad_field(part, expr))?;
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(GarageLogError::Schedule(format!(
                "value out of range ({min}-{max}) in cron field '{part}' of '{expr}'"
            )));
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }

    if mask == 0 {
        return Err(bad_field(field, expr));
    }
    Ok(mask)
}

fn bad_field(part: &str, expr: &str) -> GarageLogError {
    GarageLogError::Schedule(format!("invalid cron field '{part}' in '{expr}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .expect("valid date")
            .and_hms_opt(h, min, 0)
            .expect("valid time")
            .and_utc()
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("0 8 * *").is_err());
        assert!(CronSchedule::parse("0 8 * * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("0 24 * * *").is_err());
        assert!(CronSchedule::parse("0 0 0 * *").is_err());
        assert!(CronSchedule::parse("0 0 * 13 *").is_err());
        assert!(CronSchedule::parse("0 0 * * 8").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("boom * * * *").is_err());
    }

    #[test]
    fn hourly_fires_on_the_hour() {
        let s = CronSchedule::parse("0 * * * *").expect("parse");
        assert_eq!(s.next_after(at(2024, 3, 5, 9, 15)), Some(at(2024, 3, 5, 10, 0)));
        // Strictly after: a fire exactly on the boundary moves to the next hour.
        assert_eq!(s.next_after(at(2024, 3, 5, 9, 0)), Some(at(2024, 3, 5, 10, 0)));
    }

    #[test]
    fn daily_at_eight() {
        let s = CronSchedule::parse("0 8 * * *").expect("parse");
        assert_eq!(s.next_after(at(2024, 3, 5, 7, 59)), Some(at(2024, 3, 5, 8, 0)));
        assert_eq!(s.next_after(at(2024, 3, 5, 8, 0)), Some(at(2024, 3, 6, 8, 0)));
    }

    #[test]
    fn half_past_eight() {
        let s = CronSchedule::parse("30 8 * * *").expect("parse");
        assert_eq!(s.next_after(at(2024, 3, 5, 8, 29)), Some(at(2024, 3, 5, 8, 30)));
    }

    #[test]
    fn step_field() {
        let s = CronSchedule::parse("*/15 * * * *").expect("parse");
        assert_eq!(s.next_after(at(2024, 3, 5, 9, 1)), Some(at(2024, 3, 5, 9, 15)));
        assert_eq!(s.next_after(at(2024, 3, 5, 9, 45)), Some(at(2024, 3, 5, 10, 0)));
    }

    #[test]
    fn day_of_week_restriction() {
        // 2024-03-04 is a Monday.
        let s = CronSchedule::parse("0 9 * * 1").expect("parse");
        assert_eq!(s.next_after(at(2024, 3, 1, 0, 0)), Some(at(2024, 3, 4, 9, 0)));
    }

    #[test]
    fn sunday_as_seven() {
        let s7 = CronSchedule::parse("0 9 * * 7").expect("parse");
        let s0 = CronSchedule::parse("0 9 * * 0").expect("parse");
        let from = at(2024, 3, 1, 0, 0);
        assert_eq!(s7.next_after(from), s0.next_after(from));
    }

    #[test]
    fn list_and_range_fields() {
        let s = CronSchedule::parse("0 6,18 * * 1-5").expect("parse");
        // Friday 2024-03-08 19:00 → Monday 2024-03-11 06:00.
        assert_eq!(s.next_after(at(2024, 3, 8, 19, 0)), Some(at(2024, 3, 11, 6, 0)));
    }

    #[test]
    fn unsatisfiable_expression_returns_none() {
        // February 30th never exists.
        let s = CronSchedule::parse("0 0 30 2 *").expect("parse");
        assert_eq!(s.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn month_end_dom() {
        let s = CronSchedule::parse("0 0 31 * *").expect("parse");
        // After Jan 31 the next 31st is in March.
        assert_eq!(s.next_after(at(2024, 1, 31, 0, 0)), Some(at(2024, 3, 31, 0, 0)));
    }
}
