//! Six-field cron expressions with seconds resolution.
//!
//! Format: `SEC MIN HOUR DOM MON DOW`, evaluated in UTC.
//!
//! | Syntax    | Meaning                                  |
//! |-----------|------------------------------------------|
//! | `*`       | every value                              |
//! | `?`       | every value (day fields only)            |
//! | `N`       | exactly N                                |
//! | `A-B`     | A through B inclusive                    |
//! | `*/S`     | every S-th value from the field minimum  |
//! | `A/S`     | every S-th value from A to the maximum   |
//! | `A-B/S`   | every S-th value from A to B             |
//! | `X,Y,...` | union of any of the above                |
//!
//! Months accept `JAN`..`DEC`, days of week accept `SUN`..`SAT`; `0` and `7`
//! both mean Sunday. When day-of-month and day-of-week are both restricted a
//! day matches if either one matches (Vixie cron semantics).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::{Result, SchedulerError};

/// How far ahead `next_after` searches before giving up.
const SEARCH_HORIZON_YEARS: i32 = 8;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct FieldKind {
    name: &'static str,
    min: u32,
    max: u32,
    /// Symbolic names; index 0 maps to `min`.
    names: &'static [&'static str],
    day_field: bool,
}

const SECONDS: FieldKind = FieldKind {
    name: "seconds",
    min: 0,
    max: 59,
    names: &[],
    day_field: false,
};
const MINUTES: FieldKind = FieldKind {
    name: "minutes",
    min: 0,
    max: 59,
    names: &[],
    day_field: false,
};
const HOURS: FieldKind = FieldKind {
    name: "hours",
    min: 0,
    max: 23,
    names: &[],
    day_field: false,
};
const DAYS_OF_MONTH: FieldKind = FieldKind {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    day_field: true,
};
const MONTHS: FieldKind = FieldKind {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    day_field: false,
};
// 7 is accepted as an alias for Sunday and folded onto bit 0 after parsing.
const DAYS_OF_WEEK: FieldKind = FieldKind {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: DAY_NAMES,
    day_field: true,
};

/// A parsed cron expression. Each field is a bit set over its value range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a 6-field expression or one of the `@` macros.
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let expanded = match expand_macro(trimmed) {
            Some(expanded) => expanded,
            None if trimmed.starts_with('@') => {
                return Err(invalid(expression, format!("unknown macro '{trimmed}'")));
            }
            None => trimmed,
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(invalid(
                expression,
                format!(
                    "expected 6 fields (SEC MIN HOUR DOM MON DOW), found {}",
                    parts.len()
                ),
            ));
        }

        let field = |text: &str, kind: &FieldKind| {
            parse_field(text, kind).map_err(|reason| invalid(expression, reason))
        };

        let (seconds, _) = field(parts[0], &SECONDS)?;
        let (minutes, _) = field(parts[1], &MINUTES)?;
        let (hours, _) = field(parts[2], &HOURS)?;
        let (days_of_month, dom_restricted) = field(parts[3], &DAYS_OF_MONTH)?;
        let (months, _) = field(parts[4], &MONTHS)?;
        let (raw_dow, dow_restricted) = field(parts[5], &DAYS_OF_WEEK)?;

        // Sunday may be written as 7.
        let days_of_week = (raw_dow | (raw_dow >> 7)) & 0x7f;

        Ok(Self {
            source: trimmed.to_string(),
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted,
            dow_restricted,
        })
    }

    /// Earliest instant strictly after `after` that matches every field.
    ///
    /// The result always has a zero sub-second part. Returns `None` when no
    /// instant matches within the search horizon (e.g. `0 0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let horizon = t.year() + SEARCH_HORIZON_YEARS;

        while t.year() <= horizon {
            if !has(self.months, t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = (t.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            match next_set_bit(self.seconds, t.second(), SECONDS.max) {
                Some(second) => return Some(Utc.from_utc_datetime(&t.with_second(second)?)),
                None => {
                    t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                }
            }
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has(self.days_of_month, date.day());
        let dow = has(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn expand_macro(expression: &str) -> Option<&'static str> {
    let expanded = match expression.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        "@monthly" => "0 0 0 1 * *",
        "@weekly" => "0 0 0 * * 0",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@hourly" => "0 0 * * * *",
        _ => return None,
    };
    Some(expanded)
}

/// Parse one field into a bit set. The flag reports whether the field
/// restricts anything (used for the day-of-month / day-of-week rule).
fn parse_field(text: &str, kind: &FieldKind) -> std::result::Result<(u64, bool), String> {
    if text == "?" {
        if !kind.day_field {
            return Err(format!("'?' is only allowed in day fields, not {}", kind.name));
        }
        return Ok((range_bits(kind.min, kind.max, 1), false));
    }

    let mut bits = 0u64;
    for part in text.split(',') {
        bits |= parse_part(part, kind)?;
    }
    Ok((bits, !text.starts_with('*')))
}

fn parse_part(part: &str, kind: &FieldKind) -> std::result::Result<u64, String> {
    if part.is_empty() {
        return Err(format!("empty list element in {} field", kind.name));
    }

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step '{step}' in {} field", kind.name))?;
            if step == 0 {
                return Err(format!("step must be positive in {} field", kind.name));
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" {
        (kind.min, kind.max)
    } else if let Some((a, b)) = range.split_once('-') {
        let start = parse_value(a, kind)?;
        let end = match parse_value(b, kind)? {
            // `SUN` closes a day-of-week range as 7, e.g. `SAT-SUN`.
            0 if kind.max == 7 && start > 0 => 7,
            end => end,
        };
        if start > end {
            return Err(format!("reversed range '{range}' in {} field", kind.name));
        }
        (start, end)
    } else {
        let value = parse_value(range, kind)?;
        // `A/S` runs from A to the end of the field.
        match step {
            Some(_) => (value, kind.max),
            None => (value, value),
        }
    };

    Ok(range_bits(start, end, step.unwrap_or(1)))
}

fn parse_value(token: &str, kind: &FieldKind) -> std::result::Result<u32, String> {
    if let Ok(value) = token.parse::<u32>() {
        if value < kind.min || value > kind.max {
            return Err(format!(
                "value {value} out of range {}-{} in {} field",
                kind.min, kind.max, kind.name
            ));
        }
        return Ok(value);
    }

    let upper = token.to_ascii_uppercase();
    kind.names
        .iter()
        .position(|name| *name == upper)
        .map(|idx| kind.min + idx as u32)
        .ok_or_else(|| format!("unrecognised token '{token}' in {} field", kind.name))
}

fn range_bits(start: u32, end: u32, step: u32) -> u64 {
    (start..=end)
        .step_by(step as usize)
        .fold(0u64, |bits, v| bits | (1u64 << v))
}

fn has(bits: u64, value: u32) -> bool {
    bits & (1u64 << value) != 0
}

fn next_set_bit(bits: u64, from: u32, max: u32) -> Option<u32> {
    (from..=max).find(|v| has(bits, *v))
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn top_of_every_minute_from_half_second() {
        let cron = CronSchedule::parse("0 * * * * *").unwrap();
        let after = at(2026, 3, 14, 12, 0, 0) + Duration::milliseconds(500);
        let next = cron.next_after(after).unwrap();
        assert_eq!(next, at(2026, 3, 14, 12, 1, 0));
        assert_eq!(next.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn result_is_strictly_after_reference() {
        let cron = CronSchedule::parse("0 * * * * *").unwrap();
        let exact = at(2026, 3, 14, 12, 1, 0);
        assert_eq!(cron.next_after(exact).unwrap(), at(2026, 3, 14, 12, 2, 0));
    }

    #[test]
    fn every_fifteen_seconds() {
        let cron = CronSchedule::parse("*/15 * * * * *").unwrap();
        let next = cron.next_after(at(2026, 1, 1, 0, 0, 16)).unwrap();
        assert_eq!(next, at(2026, 1, 1, 0, 0, 30));
        let next = cron.next_after(at(2026, 1, 1, 0, 0, 45)).unwrap();
        assert_eq!(next, at(2026, 1, 1, 0, 1, 0));
    }

    #[test]
    fn daily_at_eight_rolls_to_next_day() {
        let cron = CronSchedule::parse("0 0 8 * * *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 2, 22, 7, 0, 0)).unwrap(),
            at(2026, 2, 22, 8, 0, 0)
        );
        assert_eq!(
            cron.next_after(at(2026, 2, 22, 8, 0, 0)).unwrap(),
            at(2026, 2, 23, 8, 0, 0)
        );
    }

    #[test]
    fn month_rollover_at_year_end() {
        let cron = CronSchedule::parse("0 30 9 1 JAN *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 6, 1, 0, 0, 0)).unwrap(),
            at(2027, 1, 1, 9, 30, 0)
        );
    }

    #[test]
    fn weekday_names_and_ranges() {
        let cron = CronSchedule::parse("0 0 9 ? * MON-FRI").unwrap();
        // 2026-02-21 is a Saturday.
        let next = cron.next_after(at(2026, 2, 21, 10, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next, at(2026, 2, 23, 9, 0, 0));
    }

    #[test]
    fn seven_means_sunday() {
        let a = CronSchedule::parse("0 0 0 * * 7").unwrap();
        let b = CronSchedule::parse("0 0 0 * * SUN").unwrap();
        let from = at(2026, 2, 18, 0, 0, 0);
        assert_eq!(a.next_after(from), b.next_after(from));
        assert_eq!(a.next_after(from).unwrap().weekday(), Weekday::Sun);
    }

    #[test]
    fn restricted_day_fields_are_ored() {
        // The 15th of the month OR any Friday.
        let cron = CronSchedule::parse("0 0 0 15 * FRI").unwrap();
        // 2026-02-10 is a Tuesday; the next Friday (13th) precedes the 15th.
        assert_eq!(
            cron.next_after(at(2026, 2, 10, 0, 0, 0)).unwrap(),
            at(2026, 2, 13, 0, 0, 0)
        );
        assert_eq!(
            cron.next_after(at(2026, 2, 13, 0, 0, 0)).unwrap(),
            at(2026, 2, 15, 0, 0, 0)
        );
    }

    #[test]
    fn stepped_day_of_week_is_not_treated_as_restriction() {
        // "*/2" starts with '*', so only day-of-month restricts.
        let cron = CronSchedule::parse("0 0 0 20 * */2").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 2, 1, 0, 0, 0)).unwrap().day(),
            20
        );
    }

    #[test]
    fn leap_day_is_found() {
        let cron = CronSchedule::parse("0 0 12 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(at(2026, 3, 1, 0, 0, 0)).unwrap(),
            at(2028, 2, 29, 12, 0, 0)
        );
    }

    #[test]
    fn impossible_date_has_no_next() {
        let cron = CronSchedule::parse("0 0 0 30 2 *").unwrap();
        assert!(cron.next_after(at(2026, 1, 1, 0, 0, 0)).is_none());
    }

    #[test]
    fn lists_ranges_and_steps_combine() {
        let cron = CronSchedule::parse("0 0,30 10-12/2 * * *").unwrap();
        let mut t = at(2026, 5, 5, 0, 0, 0);
        let mut hits = Vec::new();
        for _ in 0..4 {
            t = cron.next_after(t).unwrap();
            hits.push((t.hour(), t.minute()));
        }
        assert_eq!(hits, vec![(10, 0), (10, 30), (12, 0), (12, 30)]);
    }

    #[test]
    fn start_slash_step_runs_to_field_end() {
        let cron = CronSchedule::parse("50/5 * * * * *").unwrap();
        let next = cron.next_after(at(2026, 5, 5, 0, 0, 51)).unwrap();
        assert_eq!(next, at(2026, 5, 5, 0, 0, 55));
        let next = cron.next_after(next).unwrap();
        assert_eq!(next, at(2026, 5, 5, 0, 1, 50));
    }

    #[test]
    fn macros_expand() {
        let hourly = CronSchedule::parse("@hourly").unwrap();
        assert_eq!(hourly.to_string(), "@hourly");
        assert_eq!(
            hourly.next_after(at(2026, 5, 5, 10, 0, 0)).unwrap(),
            at(2026, 5, 5, 11, 0, 0)
        );
        let weekly = CronSchedule::parse("@weekly").unwrap();
        assert_eq!(
            weekly.next_after(at(2026, 5, 5, 10, 0, 0)).unwrap().weekday(),
            Weekday::Sun
        );
    }

    #[test]
    fn weekday_ranges_may_end_on_sunday() {
        let weekend = CronSchedule::parse("0 0 9 * * SAT-SUN").unwrap();
        let numeric = CronSchedule::parse("0 0 9 * * 6-7").unwrap();
        assert_eq!(weekend.days_of_week, numeric.days_of_week);
        // 2026-02-18 is a Wednesday.
        let sat = weekend.next_after(at(2026, 2, 18, 0, 0, 0)).unwrap();
        assert_eq!(sat, at(2026, 2, 21, 9, 0, 0));
        let sun = weekend.next_after(sat).unwrap();
        assert_eq!(sun, at(2026, 2, 22, 9, 0, 0));
        assert_eq!(weekend.next_after(sun).unwrap(), at(2026, 2, 28, 9, 0, 0));

        let every_day = CronSchedule::parse("0 0 9 * * MON-SUN").unwrap();
        let mut t = at(2026, 2, 18, 10, 0, 0);
        for day in 19..=25 {
            t = every_day.next_after(t).unwrap();
            assert_eq!(t, at(2026, 2, day, 9, 0, 0));
        }
        assert!(CronSchedule::parse("0 0 9 * * FRI-SUN").is_ok());
        assert!(CronSchedule::parse("0 0 9 * * SUN-SAT").is_ok());
        assert!(CronSchedule::parse("0 0 9 * * SAT-FRI").is_err());
    }

    #[test]
    fn rejects_malformed_expressions() {
        let cases = [
            "not a cron",
            "* * * * *",
            "* * * * * * *",
            "60 * * * * *",
            "* * 24 * * *",
            "* * * 0 * *",
            "* * * * 13 *",
            "* * * * * 8",
            "*/0 * * * * *",
            "5-1 * * * * *",
            "? * * * * *",
            "1,,2 * * * * *",
            "* * * * FOO *",
            "@fortnightly",
            "",
        ];
        for expr in cases {
            let err = CronSchedule::parse(expr).unwrap_err();
            assert_eq!(err.code(), "INVALID_EXPRESSION", "expected rejection of {expr:?}");
        }
    }

    #[test]
    fn parse_via_from_str() {
        let cron: CronSchedule = "0 0 * * * *".parse().unwrap();
        assert_eq!(cron.to_string(), "0 0 * * * *");
    }
}
