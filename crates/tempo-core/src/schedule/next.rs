//! Next-fire-time search.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::{SEARCH_HORIZON_YEARS, Schedule};

/// Cursor state while searching.
///
/// `minute` may temporarily be 60 and `hour` 24; `normalize` carries them.
struct Cursor {
    date: NaiveDate,
    hour: u32,
    minute: u32,
}

impl Cursor {
    fn normalize(&mut self) -> Option<()> {
        if self.minute >= 60 {
            self.minute = 0;
            self.hour += 1;
        }
        if self.hour >= 24 {
            self.hour = 0;
            self.date = self.date.succ_opt()?;
        }
        Some(())
    }

    fn start_of_day(&mut self, date: NaiveDate) {
        self.date = date;
        self.hour = 0;
        self.minute = 0;
    }
}

/// Earliest time strictly after `from` matching every field, or `None` if
/// nothing matches within the search horizon.
///
/// The cursor starts one minute past `from` (seconds dropped). At each step the
/// highest field that does not match is advanced to its next allowed value and
/// every lower field is reset to its minimum; advancing past the end of a field
/// carries into the next higher one.
pub(super) fn next_fire_time(schedule: &Schedule, from: NaiveDateTime) -> Option<NaiveDateTime> {
    let limit_year = from.year().checked_add(SEARCH_HORIZON_YEARS)?;
    let mut cursor = Cursor {
        date: from.date(),
        hour: from.hour(),
        minute: from.minute() + 1,
    };
    cursor.normalize()?;

    loop {
        if cursor.date.year() > limit_year {
            return None;
        }

        let (year, month) = (cursor.date.year(), cursor.date.month());
        match schedule.months.next_from(month) {
            Some(m) if m == month => {}
            Some(m) => {
                cursor.start_of_day(NaiveDate::from_ymd_opt(year, m, 1)?);
                continue;
            }
            None => {
                cursor.start_of_day(NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?);
                continue;
            }
        }

        let day = cursor.date.day();
        let next_day = schedule
            .days
            .next_from(day)
            .filter(|d| *d <= days_in_month(year, month));
        match next_day {
            Some(d) if d == day => {}
            Some(d) => {
                cursor.start_of_day(cursor.date.with_day(d)?);
                continue;
            }
            None => {
                cursor.start_of_day(first_of_next_month(year, month)?);
                continue;
            }
        }

        if !schedule
            .weekdays
            .contains(cursor.date.weekday().num_days_from_sunday())
        {
            cursor.start_of_day(cursor.date.succ_opt()?);
            continue;
        }

        match schedule.hours.next_from(cursor.hour) {
            Some(h) if h == cursor.hour => {}
            Some(h) => {
                cursor.hour = h;
                cursor.minute = 0;
            }
            None => {
                cursor.start_of_day(cursor.date.succ_opt()?);
                continue;
            }
        }

        match schedule.minutes.next_from(cursor.minute) {
            Some(m) => return cursor.date.and_hms_opt(cursor.hour, m, 0),
            None => {
                cursor.minute = 0;
                cursor.hour += 1;
                cursor.normalize()?;
            }
        }
    }
}

fn first_of_next_month(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

pub(super) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if is_leap_year(year) => 29,
        _ => 28,
    }
}

/// Longest a month can be in any year.
pub(super) fn max_days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        m => days_in_month(2001, m),
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2023, 2, 28)]
    #[case(2024, 2, 29)]
    #[case(1900, 2, 28)]
    #[case(2000, 2, 29)]
    #[case(2023, 4, 30)]
    #[case(2023, 12, 31)]
    fn month_lengths(#[case] year: i32, #[case] month: u32, #[case] days: u32) {
        assert_eq!(days_in_month(year, month), days);
    }

    #[test]
    fn february_is_29_days_at_most() {
        assert_eq!(max_days_in_month(2), 29);
        assert_eq!(max_days_in_month(1), 31);
        assert_eq!(max_days_in_month(11), 30);
    }
}
