//! Five-field cron parsing and next-fire calculation.
//!
//! Expressions are the standard Unix form
//! `minute hour day-of-month month day-of-week`. Evaluation is delegated to
//! the `cron` crate, which expects `second minute hour dom month dow year`
//! and numbers weekdays 1-7 from Sunday, so numeric weekdays are rewritten
//! to names before handing the expression over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use querybeat_core::ValidationError;
use serde::{Deserialize, Serialize};

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// The five fields of a cron expression, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month: String,
    pub day_of_week: String,
}

impl CronFields {
    /// Split an expression into its five fields.
    ///
    /// Only the field count is checked here; [`CronSchedule::parse`] also
    /// checks that every field is evaluable.
    pub fn split(expression: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        match parts.as_slice() {
            [minute, hour, day_of_month, month, day_of_week] => Ok(Self {
                minute: minute.to_string(),
                hour: hour.to_string(),
                day_of_month: day_of_month.to_string(),
                month: month.to_string(),
                day_of_week: day_of_week.to_string(),
            }),
            _ => Err(ValidationError::MalformedCron {
                expression: expression.to_string(),
                found: parts.len(),
            }),
        }
    }

    /// Seven-field form understood by the `cron` crate: fires at second 0,
    /// any year.
    fn to_cron_crate_format(&self) -> String {
        format!(
            "0 {} {} {} {} {} *",
            self.minute,
            self.hour,
            self.day_of_month,
            self.month,
            translate_day_of_week(&self.day_of_week)
        )
    }
}

impl fmt::Display for CronFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

/// A validated cron expression ready for next-fire queries.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    fields: CronFields,
    compiled: ::cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        Self::from_fields(CronFields::split(expression)?)
    }

    pub fn from_fields(fields: CronFields) -> Result<Self, ValidationError> {
        let compiled = ::cron::Schedule::from_str(&fields.to_cron_crate_format()).map_err(|e| {
            ValidationError::InvalidCron {
                expression: fields.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { fields, compiled })
    }

    pub fn fields(&self) -> &CronFields {
        &self.fields
    }

    /// First slot strictly after `after`, with fields evaluated in `tz`.
    ///
    /// `None` only for expressions that can never fire again
    /// (e.g. February 30th).
    pub fn next_after(&self, after: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(tz);
        self.compiled
            .after(&local_after)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Rewrite Unix weekday numbers (0-7, Sunday = 0 or 7) as names.
///
/// A numeric range with a step is expanded to an explicit list
/// (`3-7/2` -> `WED,FRI,SUN`), since the `cron` crate counts the step from
/// its own numbering. A plain range ending in 7 is split so it never wraps
/// (`5-7` -> `FRI-SAT,SUN`).
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| match item.split_once('/') {
            Some((range, step)) => expand_stepped(range, step)
                .unwrap_or_else(|| format!("{}/{step}", translate_range(range))),
            None => translate_range(item),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_range(range: &str) -> String {
    match range.split_once('-') {
        Some(("7", "7")) => "SUN".to_string(),
        Some(("0", "7")) => "SUN-SAT".to_string(),
        Some((start, "7")) => format!("{}-SAT,SUN", weekday_name(start)),
        Some((start, end)) => format!("{}-{}", weekday_name(start), weekday_name(end)),
        None => weekday_name(range),
    }
}

/// `a-b/n` with numeric bounds as a comma list of names. `None` for
/// anything else (`*/n`, names, out-of-range numbers), which is passed
/// through for the `cron` crate to accept or reject.
fn expand_stepped(range: &str, step: &str) -> Option<String> {
    let (start, end) = range.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    let step: usize = step.parse().ok()?;
    if step == 0 || start > end || end >= WEEKDAYS.len() {
        return None;
    }

    let mut days: Vec<&str> = Vec::new();
    for n in (start..=end).step_by(step) {
        if !days.contains(&WEEKDAYS[n]) {
            days.push(WEEKDAYS[n]);
        }
    }
    Some(days.join(","))
}

fn weekday_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => WEEKDAYS[n].to_string(),
        _ => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn splits_fields_in_order() {
        let fields = CronFields::split("5 4 3 2 1").unwrap();
        assert_eq!(fields.minute, "5");
        assert_eq!(fields.hour, "4");
        assert_eq!(fields.day_of_month, "3");
        assert_eq!(fields.month, "2");
        assert_eq!(fields.day_of_week, "1");
        assert_eq!(fields.to_string(), "5 4 3 2 1");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        for expr in ["* * * *", "0 0 * * * *", "", "hourly"] {
            match CronFields::split(expr) {
                Err(ValidationError::MalformedCron { found, .. }) => {
                    assert_eq!(found, expr.split_whitespace().count())
                }
                other => panic!("expected MalformedCron for {expr:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn out_of_range_field_is_invalid() {
        assert!(matches!(
            CronSchedule::parse("60 0 * * *"),
            Err(ValidationError::InvalidCron { .. })
        ));
    }

    #[test]
    fn daily_midnight() {
        let schedule = CronSchedule::parse("0 0 * * *").unwrap();
        let next = schedule
            .next_after(utc(2026, 1, 19, 10, 30), &Tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 1, 20, 0, 0));
    }

    #[test]
    fn every_fifteen_minutes() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        let next = schedule
            .next_after(utc(2026, 1, 19, 10, 32), &Tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 1, 19, 10, 45));
    }

    #[test]
    fn next_is_strictly_after() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let at = utc(2026, 1, 19, 10, 32);
        assert_eq!(
            schedule.next_after(at, &Tz::UTC).unwrap(),
            utc(2026, 1, 19, 10, 33)
        );
    }

    #[test]
    fn evaluated_in_configured_timezone() {
        // 9am Sydney on Jan 20 is 22:00 UTC on Jan 19 (AEDT, UTC+11)
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        let next = schedule
            .next_after(utc(2026, 1, 19, 20, 0), &chrono_tz::Australia::Sydney)
            .unwrap();
        assert_eq!(next, utc(2026, 1, 19, 22, 0));
    }

    #[test]
    fn weekday_numbers_follow_unix_convention() {
        // 2026-01-17 is a Saturday
        let weekdays = CronSchedule::parse("0 9 * * 1-5").unwrap();
        let next = weekdays
            .next_after(utc(2026, 1, 17, 12, 0), &Tz::UTC)
            .unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);

        for sunday in ["0 9 * * 0", "0 9 * * 7"] {
            let next = CronSchedule::parse(sunday)
                .unwrap()
                .next_after(utc(2026, 1, 17, 12, 0), &Tz::UTC)
                .unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{sunday}");
        }

        // stepped range through 7 keeps the trailing Sunday
        let stepped = CronSchedule::parse("0 9 * * 3-7/2").unwrap();
        let mut at = utc(2026, 1, 17, 12, 0);
        let mut days = Vec::new();
        for _ in 0..3 {
            at = stepped.next_after(at, &Tz::UTC).unwrap();
            days.push(at.weekday());
        }
        assert_eq!(days, [Weekday::Sun, Weekday::Wed, Weekday::Fri]);
        assert_eq!(at, utc(2026, 1, 23, 9, 0));
    }

    #[test]
    fn day_of_week_translation() {
        assert_eq!(translate_day_of_week("*"), "*");
        assert_eq!(translate_day_of_week("1-5"), "MON-FRI");
        assert_eq!(translate_day_of_week("0,6"), "SUN,SAT");
        assert_eq!(translate_day_of_week("5-7"), "FRI-SAT,SUN");
        assert_eq!(translate_day_of_week("0-7"), "SUN-SAT");
        assert_eq!(translate_day_of_week("*/2"), "*/2");
        assert_eq!(translate_day_of_week("1-5/2"), "MON,WED,FRI");
        assert_eq!(translate_day_of_week("3-7/2"), "WED,FRI,SUN");
        assert_eq!(translate_day_of_week("0-7/7"), "SUN");
        assert_eq!(translate_day_of_week("7-7"), "SUN");
        assert_eq!(translate_day_of_week("1,4-7/3"), "MON,THU,SUN");
        assert_eq!(translate_day_of_week("6-2/2"), "SAT-TUE/2");
        assert_eq!(translate_day_of_week("mon"), "mon");
    }
}
