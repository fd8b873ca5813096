use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::{Date, Weekday};

use super::DateRange;

/// Dates on which an instrument is expected to print a new observation.
///
/// Calendars are configuration input: market-specific holiday lists are
/// supplied by the operator rather than derived here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingCalendar {
    /// Exclude Saturdays and Sundays.
    #[serde(default = "default_weekdays_only")]
    pub weekdays_only: bool,
    /// Additional non-trading dates.
    #[serde(default)]
    pub holidays: BTreeSet<Date>,
}

fn default_weekdays_only() -> bool {
    true
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::weekdays()
    }
}

impl TradingCalendar {
    /// Monday through Friday, no holidays.
    pub fn weekdays() -> Self {
        Self {
            weekdays_only: true,
            holidays: BTreeSet::new(),
        }
    }

    /// Every calendar day (e.g. crypto or continuously published series).
    pub fn every_day() -> Self {
        Self {
            weekdays_only: false,
            holidays: BTreeSet::new(),
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = Date>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn is_trading_day(&self, date: Date) -> bool {
        if self.holidays.contains(&date) {
            return false;
        }
        !(self.weekdays_only && matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday))
    }

    /// All trading days in the inclusive range, ascending.
    pub fn trading_days(&self, range: DateRange) -> Vec<Date> {
        let mut days = Vec::new();
        let mut cursor = Some(range.start);
        while let Some(day) = cursor {
            if day > range.end {
                break;
            }
            if self.is_trading_day(day) {
                days.push(day);
            }
            cursor = day.next_day();
        }
        days
    }

    pub fn count_trading_days(&self, range: DateRange) -> usize {
        self.trading_days(range).len()
    }

    /// Trading days strictly between `after` and `before`.
    pub fn trading_days_between(&self, after: Date, before: Date) -> usize {
        let mut count = 0;
        let mut cursor = after.next_day();
        while let Some(day) = cursor {
            if day >= before {
                break;
            }
            if self.is_trading_day(day) {
                count += 1;
            }
            cursor = day.next_day();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn weekday_calendar_skips_weekends_and_holidays() {
        let calendar = TradingCalendar::weekdays().with_holidays([date!(2026 - 01 - 01)]);

        assert!(!calendar.is_trading_day(date!(2026 - 01 - 01)));
        assert!(calendar.is_trading_day(date!(2026 - 01 - 02)));
        assert!(!calendar.is_trading_day(date!(2026 - 01 - 03)));
        assert!(!calendar.is_trading_day(date!(2026 - 01 - 04)));
    }

    #[test]
    fn counts_trading_days_in_a_month() {
        let calendar = TradingCalendar::weekdays();
        let range = DateRange::new(date!(2026 - 03 - 01), date!(2026 - 03 - 31)).expect("range");

        assert_eq!(calendar.count_trading_days(range), 22);
        assert_eq!(TradingCalendar::every_day().count_trading_days(range), 31);
    }

    #[test]
    fn between_excludes_both_endpoints() {
        let calendar = TradingCalendar::weekdays();
        // Friday to the following Monday: nothing missing.
        assert_eq!(
            calendar.trading_days_between(date!(2026 - 03 - 06), date!(2026 - 03 - 09)),
            0
        );
        // Monday to Friday: Tue, Wed, Thu missing.
        assert_eq!(
            calendar.trading_days_between(date!(2026 - 03 - 02), date!(2026 - 03 - 06)),
            3
        );
    }
}
