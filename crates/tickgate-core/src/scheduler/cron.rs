use std::collections::BTreeSet;

use time::{Date, Duration, OffsetDateTime, Time, UtcOffset};

use super::Trigger;
use crate::ConfigurationError;

/// Five-field cron schedule evaluated in UTC.
///
/// Fields are `minute hour day-of-month month day-of-week`. Each field accepts
/// `*`, numbers, `a-b` ranges, comma lists and `/n` steps. Day-of-week uses
/// 0-6 with Sunday as 0 (7 is also Sunday). As in classic cron, when both day
/// fields are restricted a day matching either one fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTrigger {
    expression: String,
    minutes: BTreeSet<u8>,
    hours: BTreeSet<u8>,
    days_of_month: BTreeSet<u8>,
    months: BTreeSet<u8>,
    days_of_week: BTreeSet<u8>,
    dom_restricted: bool,
    dow_restricted: bool,
}

/// Days searched ahead before giving up (covers leap-day schedules).
const SEARCH_DAYS: u32 = 366 * 5;

impl CronTrigger {
    pub fn parse(expression: &str) -> Result<Self, ConfigurationError> {
        let trimmed = expression.trim();
        let expanded = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                trimmed,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let minutes = parse_field(trimmed, fields[0], 0, 59)?;
        let hours = parse_field(trimmed, fields[1], 0, 23)?;
        let days_of_month = parse_field(trimmed, fields[2], 1, 31)?;
        let months = parse_field(trimmed, fields[3], 1, 12)?;
        let mut days_of_week = parse_field(trimmed, fields[4], 0, 7)?;
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            expression: trimmed.to_owned(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: Date) -> bool {
        if !self.months.contains(&(u8::from(date.month()))) {
            return false;
        }
        let dom = self.days_of_month.contains(&date.day());
        let dow = self
            .days_of_week
            .contains(&date.weekday().number_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First `(hour, minute)` on a matching day at or after `from`.
    fn first_time_from(&self, from: Option<(u8, u8)>) -> Option<Time> {
        for &hour in &self.hours {
            for &minute in &self.minutes {
                if from.map_or(true, |start| (hour, minute) >= start) {
                    return Time::from_hms(hour, minute, 0).ok();
                }
            }
        }
        None
    }
}

impl Trigger for CronTrigger {
    fn next_fire_time(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        // Strictly after `now`, at minute resolution.
        let start = now
            .to_offset(UtcOffset::UTC)
            .replace_second(0)
            .ok()?
            .replace_nanosecond(0)
            .ok()?
            + Duration::minutes(1);

        let mut day = start.date();
        let mut from = Some((start.hour(), start.minute()));
        for _ in 0..SEARCH_DAYS {
            if self.day_matches(day) {
                if let Some(at) = self.first_time_from(from) {
                    return Some(day.with_time(at).assume_utc());
                }
            }
            day = day.next_day()?;
            from = None;
        }
        None
    }

    fn describe(&self) -> String {
        format!("cron '{}' (UTC)", self.expression)
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidCron {
        expression: expression.to_owned(),
        reason: reason.into(),
    }
}

fn parse_field(
    expression: &str,
    field: &str,
    min: u8,
    max: u8,
) -> Result<BTreeSet<u8>, ConfigurationError> {
    let mut values = BTreeSet::new();
    for item in field.split(',') {
        let (span, step) = match item.split_once('/') {
            Some((span, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| invalid(expression, format!("bad step in '{item}'")))?;
                if step == 0 {
                    return Err(invalid(expression, format!("zero step in '{item}'")));
                }
                (span, step)
            }
            None => (item, 1),
        };

        let (low, high) = if span == "*" {
            (min, max)
        } else if let Some((a, b)) = span.split_once('-') {
            (
                parse_number(expression, a, min, max)?,
                parse_number(expression, b, min, max)?,
            )
        } else {
            let value = parse_number(expression, span, min, max)?;
            // `a/n` means "from a to the end, every n".
            if item.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if low > high {
            return Err(invalid(expression, format!("inverted range '{span}'")));
        }
        values.extend((low..=high).step_by(usize::from(step)));
    }
    Ok(values)
}

fn parse_number(expression: &str, raw: &str, min: u8, max: u8) -> Result<u8, ConfigurationError> {
    let value: u8 = raw
        .parse()
        .map_err(|_| invalid(expression, format!("'{raw}' is not a number")))?;
    if value < min || value > max {
        return Err(invalid(
            expression,
            format!("{value} is outside {min}-{max}"),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn daily_shorthand_fires_at_next_midnight() {
        let trigger = CronTrigger::parse("@daily").expect("cron");
        assert_eq!(
            trigger.next_fire_time(datetime!(2026-03-02 13:45 UTC)),
            Some(datetime!(2026-03-03 00:00 UTC))
        );
    }

    #[test]
    fn next_fire_is_strictly_after_now() {
        let trigger = CronTrigger::parse("30 6 * * *").expect("cron");
        assert_eq!(
            trigger.next_fire_time(datetime!(2026-03-02 06:30 UTC)),
            Some(datetime!(2026-03-03 06:30 UTC))
        );
        assert_eq!(
            trigger.next_fire_time(datetime!(2026-03-02 06:29:59 UTC)),
            Some(datetime!(2026-03-02 06:30 UTC))
        );
    }

    #[test]
    fn weekday_schedule_skips_the_weekend() {
        // 2026-03-06 is a Friday.
        let trigger = CronTrigger::parse("0 22 * * 1-5").expect("cron");
        assert_eq!(
            trigger.next_fire_time(datetime!(2026-03-06 23:00 UTC)),
            Some(datetime!(2026-03-09 22:00 UTC))
        );
    }

    #[test]
    fn steps_and_lists_expand() {
        let trigger = CronTrigger::parse("*/15 0,12 * * *").expect("cron");
        assert_eq!(trigger.minutes, BTreeSet::from([0, 15, 30, 45]));
        assert_eq!(trigger.hours, BTreeSet::from([0, 12]));
        assert_eq!(
            trigger.next_fire_time(datetime!(2026-03-02 00:50 UTC)),
            Some(datetime!(2026-03-02 12:00 UTC))
        );
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // 1st of the month or any Monday.
        let trigger = CronTrigger::parse("0 0 1 * 1").expect("cron");
        // 2026-03-02 is a Monday.
        assert_eq!(
            trigger.next_fire_time(datetime!(2026-03-01 12:00 UTC)),
            Some(datetime!(2026-03-02 00:00 UTC))
        );
    }

    #[test]
    fn sunday_may_be_written_as_seven() {
        let trigger = CronTrigger::parse("0 0 * * 7").expect("cron");
        assert!(trigger.days_of_week.contains(&0));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "* * * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "5-1 * * * *", "a * * * *"] {
            let error = CronTrigger::parse(bad).expect_err(bad);
            assert!(matches!(error, ConfigurationError::InvalidCron { .. }), "{bad}");
        }
    }
}
