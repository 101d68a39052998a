//! Crontab-style recurrence rules.
//!
//! スケジュールは空白区切りの 5 フィールド `minute hour day month weekday` です。
//! 各フィールドは `*`、単一値、`lo-hi` の範囲、またはカンマ区切りのリストを受け付けます。
//!
//! 注意: day と weekday は両方とも一致する必要があります（AND）。
//! 一般的な cron は両方が制限されている場合に OR として扱いますが、ここではしません。

mod field;
mod next;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use field::{Field, FieldSet, parse_field};

/// How far ahead (in years) the next fire time is searched for.
///
/// Any satisfiable schedule fires at least once in a 400-year Gregorian cycle.
pub const SEARCH_HORIZON_YEARS: i32 = 400;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("expected 5 fields (minute hour day month weekday) but found {found}")]
    FieldCount { found: usize },

    #[error("invalid {field} field '{token}'")]
    InvalidField { field: Field, token: String },

    #[error("schedule '{schedule}' never fires")]
    Unsatisfiable { schedule: String },
}

impl ScheduleError {
    /// Syntax errors, as opposed to a well-formed schedule that never fires.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ScheduleError::Unsatisfiable { .. })
    }
}

/// A parsed recurrence rule.
///
/// Serialized as its original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    text: String,
    minutes: FieldSet,
    hours: FieldSet,
    days: FieldSet,
    months: FieldSet,
    weekdays: FieldSet,
}

impl Schedule {
    /// Parse a schedule and reject ones that can never fire (e.g. `0 0 30 2 *`).
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() != Field::ALL.len() {
            return Err(ScheduleError::FieldCount {
                found: tokens.len(),
            });
        }

        let schedule = Self {
            text: tokens.join(" "),
            minutes: parse_field(tokens[0], Field::Minute)?,
            hours: parse_field(tokens[1], Field::Hour)?,
            days: parse_field(tokens[2], Field::Day)?,
            months: parse_field(tokens[3], Field::Month)?,
            weekdays: parse_field(tokens[4], Field::Weekday)?,
        };

        if !schedule.has_reachable_day() {
            return Err(schedule.unsatisfiable());
        }
        Ok(schedule)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn field(&self, field: Field) -> &FieldSet {
        match field {
            Field::Minute => &self.minutes,
            Field::Hour => &self.hours,
            Field::Day => &self.days,
            Field::Month => &self.months,
            Field::Weekday => &self.weekdays,
        }
    }

    /// Does this schedule fire at the given minute? Seconds are ignored.
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        use chrono::{Datelike, Timelike};
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.days.contains(at.day())
            && self.months.contains(at.month())
            && self.weekdays.contains(at.weekday().num_days_from_sunday())
    }

    /// Earliest fire time strictly after `from`, on the naive (wall-clock) calendar.
    ///
    /// The result always has zero seconds.
    pub fn next_after(&self, from: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
        next::next_fire_time(self, from).ok_or_else(|| self.unsatisfiable())
    }

    /// Earliest fire time strictly after `from`, evaluated on `from`'s local calendar.
    ///
    /// Local times that do not exist in the zone (DST gaps) are skipped;
    /// ambiguous ones resolve to the earlier instant.
    pub fn next_after_in<Tz: TimeZone>(
        &self,
        from: &DateTime<Tz>,
    ) -> Result<DateTime<Tz>, ScheduleError> {
        let tz = from.timezone();
        let mut cursor = from.naive_local();
        loop {
            let candidate = self.next_after(cursor)?;
            match tz.from_local_datetime(&candidate).earliest() {
                Some(at) if at > *from => return Ok(at),
                _ => cursor = candidate,
            }
        }
    }

    /// At least one allowed day number exists in at least one allowed month.
    ///
    /// February counts as 29 days. Once a (month, day) pair exists, every
    /// weekday lands on it somewhere inside the 400-year cycle.
    fn has_reachable_day(&self) -> bool {
        self.months.iter().any(|month| {
            let longest = next::max_days_in_month(month);
            self.days.first().is_some_and(|day| day <= longest)
        })
    }

    fn unsatisfiable(&self) -> ScheduleError {
        ScheduleError::Unsatisfiable {
            schedule: self.text.clone(),
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Schedule {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(value: Schedule) -> Self {
        value.text
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Convenience for building calendar values in tests and callers.
pub fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(y, mo, d)?.and_hms_opt(h, mi, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use rstest::rstest;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        naive(y, mo, d, h, mi).unwrap()
    }

    #[rstest]
    #[case("0 2 * * *", at(2023, 1, 1, 2, 30), at(2023, 1, 2, 2, 0))]
    #[case("0 2 * * *", at(2023, 1, 1, 2, 0), at(2023, 1, 2, 2, 0))]
    #[case("0 2 * * *", at(2023, 1, 1, 1, 59), at(2023, 1, 1, 2, 0))]
    #[case("* * * * *", at(2023, 1, 1, 23, 59), at(2023, 1, 2, 0, 0))]
    #[case("30 8 * * 0", at(2023, 1, 2, 0, 0), at(2023, 1, 8, 8, 30))]
    #[case("0 0 1 1 *", at(2023, 6, 1, 0, 0), at(2024, 1, 1, 0, 0))]
    #[case("0 0 31 * *", at(2023, 4, 1, 0, 0), at(2023, 5, 31, 0, 0))]
    #[case("0 0 31 4-6 *", at(2023, 1, 1, 0, 0), at(2023, 5, 31, 0, 0))]
    #[case("0 0 29 2 *", at(2023, 3, 1, 0, 0), at(2024, 2, 29, 0, 0))]
    #[case("0,30 9-17 * * 1-5", at(2023, 1, 6, 17, 30), at(2023, 1, 9, 9, 0))]
    #[case("15 10 * 12 *", at(2023, 12, 31, 10, 15), at(2024, 12, 1, 10, 15))]
    fn next_fire_time_is_the_earliest_match(
        #[case] text: &str,
        #[case] from: NaiveDateTime,
        #[case] expected: NaiveDateTime,
    ) {
        let schedule = Schedule::parse(text).unwrap();
        assert_eq!(schedule.next_after(from).unwrap(), expected);
    }

    #[test]
    fn day_and_weekday_must_both_match() {
        // 15th of a month that is also a Monday; first one after 2023-01-01 is May 15th.
        let schedule = Schedule::parse("0 0 15 * 1").unwrap();
        assert_eq!(
            schedule.next_after(at(2023, 1, 1, 0, 0)).unwrap(),
            at(2023, 5, 15, 0, 0)
        );
    }

    #[test]
    fn leap_day_on_a_given_weekday_is_found_decades_ahead() {
        // Feb 29th falling on a Monday: 2044.
        let schedule = Schedule::parse("0 12 29 2 1").unwrap();
        assert_eq!(
            schedule.next_after(at(2023, 1, 1, 0, 0)).unwrap(),
            at(2044, 2, 29, 12, 0)
        );
    }

    #[test]
    fn seconds_and_fractions_are_dropped() {
        let schedule = Schedule::parse("* * * * *").unwrap();
        let from = at(2023, 1, 1, 2, 30)
            .checked_add_signed(chrono::Duration::milliseconds(45_500))
            .unwrap();
        assert_eq!(schedule.next_after(from).unwrap(), at(2023, 1, 1, 2, 31));
    }

    #[rstest]
    #[case("0 0 30 2 *")]
    #[case("0 0 31 2,4 *")]
    #[case("0 0 31 4,6 *")]
    #[case("0 0 31 9,11 *")]
    fn impossible_days_are_unsatisfiable(#[case] text: &str) {
        let err = Schedule::parse(text).unwrap_err();
        assert!(matches!(err, ScheduleError::Unsatisfiable { .. }));
        assert!(!err.is_malformed());
    }

    #[rstest]
    #[case("0 2 * *", 4)]
    #[case("0 2 * * * *", 6)]
    #[case("", 0)]
    fn wrong_field_count_is_malformed(#[case] text: &str, #[case] found: usize) {
        let err = Schedule::parse(text).unwrap_err();
        assert_eq!(err, ScheduleError::FieldCount { found });
        assert!(err.is_malformed());
    }

    #[test]
    fn invalid_field_reports_which_field() {
        let err = Schedule::parse("0 25 * * *").unwrap_err();
        assert_eq!(
            err,
            ScheduleError::InvalidField {
                field: Field::Hour,
                token: "25".to_string()
            }
        );
    }

    #[test]
    fn successive_fire_times_strictly_increase_and_match() {
        let texts = [
            "* * * * *",
            "0 2 * * *",
            "0,15,30,45 * * * 1-5",
            "5 4 1-7 * 0",
            "59 23 31 12 *",
            "0 0 29 2 *",
        ];
        for text in texts {
            let schedule = Schedule::parse(text).unwrap();
            let mut cursor = at(2023, 12, 30, 23, 58);
            for _ in 0..20 {
                let next = schedule.next_after(cursor).unwrap();
                assert!(next > cursor, "{text}: {next} <= {cursor}");
                assert!(schedule.matches(next), "{text}: {next} does not match");
                cursor = next;
            }
        }
    }

    #[test]
    fn serializes_as_text() {
        let schedule = Schedule::parse("0  2 * *   *").unwrap();
        assert_eq!(schedule.as_str(), "0 2 * * *");
        assert_eq!(serde_json::to_string(&schedule).unwrap(), "\"0 2 * * *\"");

        let back: Schedule = serde_json::from_str("\"0 2 * * *\"").unwrap();
        assert_eq!(back, schedule);
        assert!(serde_json::from_str::<Schedule>("\"0 2 * *\"").is_err());
    }

    #[test]
    fn zoned_evaluation_uses_local_wall_clock() {
        let schedule = Schedule::parse("0 2 * * *").unwrap();
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let from = tokyo.with_ymd_and_hms(2023, 1, 1, 2, 30, 0).unwrap();
        let next = schedule.next_after_in(&from).unwrap();
        assert_eq!(next, tokyo.with_ymd_and_hms(2023, 1, 2, 2, 0, 0).unwrap());

        let utc_from = Utc.with_ymd_and_hms(2023, 1, 1, 2, 30, 0).unwrap();
        let utc_next = schedule.next_after_in(&utc_from).unwrap();
        assert_eq!(utc_next, Utc.with_ymd_and_hms(2023, 1, 2, 2, 0, 0).unwrap());
    }
}
