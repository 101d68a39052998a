//! One crontab field: syntax and presence vector.

use std::fmt;

use super::ScheduleError;

/// The five fields of a schedule, in the order they appear in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Minute,
    Hour,
    Day,
    Month,
    Weekday,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::Day,
        Field::Month,
        Field::Weekday,
    ];

    /// Inclusive legal range of values.
    ///
    /// Months are 1-based, weekdays run from 0 (Sunday) to 6 (Saturday).
    pub fn range(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::Day => (1, 31),
            Field::Month => (1, 12),
            Field::Weekday => (0, 6),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::Day => "day-of-month",
            Field::Month => "month",
            Field::Weekday => "weekday",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Presence vector over a field's legal range: bit `n` set means value `n` is allowed.
///
/// Every range fits in 64 bits (the widest is minutes, 0..=59).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSet {
    bits: u64,
}

impl FieldSet {
    fn empty() -> Self {
        Self { bits: 0 }
    }

    fn insert(&mut self, value: u32) {
        self.bits |= 1 << value;
    }

    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    /// Smallest allowed value that is `>= from`.
    pub fn next_from(&self, from: u32) -> Option<u32> {
        if from >= 64 {
            return None;
        }
        let rest = self.bits >> from;
        if rest == 0 {
            None
        } else {
            Some(from + rest.trailing_zeros())
        }
    }

    pub fn first(&self) -> Option<u32> {
        self.next_from(0)
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(move |v| self.contains(*v))
    }
}

/// Parse one field token.
///
/// Accepted syntaxes:
/// - `*` (every value in range)
/// - an exact value, e.g. `5`
/// - an inclusive range `lo-hi` with `lo < hi`, e.g. `1-5`
/// - a comma list of at least two values, e.g. `0,15,30,45`
///
/// Anything else, or a value outside the field's range, is rejected as a whole;
/// a partially filled vector is never returned.
pub fn parse_field(token: &str, field: Field) -> Result<FieldSet, ScheduleError> {
    let (min, max) = field.range();
    let invalid = || ScheduleError::InvalidField {
        field,
        token: token.to_string(),
    };
    let value_in_range = |s: &str| -> Result<u32, ScheduleError> {
        let value = parse_number(s).ok_or_else(invalid)?;
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(invalid())
        }
    };

    let mut set = FieldSet::empty();

    if token == "*" {
        for value in min..=max {
            set.insert(value);
        }
        return Ok(set);
    }

    if let Some(value) = parse_number(token) {
        if !(min..=max).contains(&value) {
            return Err(invalid());
        }
        set.insert(value);
        return Ok(set);
    }

    if let Some((lo, hi)) = token.split_once('-') {
        let lo = value_in_range(lo)?;
        let hi = value_in_range(hi)?;
        if lo >= hi {
            return Err(invalid());
        }
        for value in lo..=hi {
            set.insert(value);
        }
        return Ok(set);
    }

    if token.contains(',') {
        for part in token.split(',') {
            set.insert(value_in_range(part)?);
        }
        return Ok(set);
    }

    Err(invalid())
}

/// Plain unsigned decimal, no sign or whitespace.
fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
