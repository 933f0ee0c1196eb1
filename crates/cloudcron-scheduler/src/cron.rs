//! Five-field cron expression evaluator.
//!
//! Fields are `minute hour day-of-month month day-of-week`, with day-of-week
//! numbered 1 (Monday) to 7 (Sunday). Each field is one of:
//!
//! | Token | Matches                      |
//! |-------|------------------------------|
//! | `*`   | any value                    |
//! | `a-b` | `a <= v <= b`                |
//! | `*/n` | `v % n == 0`                 |
//! | `n`   | `v == n`                     |
//!
//! Numbers are not range-checked: `99` in the minute field parses and simply
//! never matches. Tokens of any other shape are accepted by [`CronExpression::parse`]
//! and reported as [`CronError::InvalidField`] when they are evaluated.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::CronError;

/// Hard cap on search steps so impossible field combinations fail fast.
pub const MAX_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    pub const ALL: [CronField; 5] = [
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfMonth,
        CronField::Month,
        CronField::DayOfWeek,
    ];

    fn index(self) -> usize {
        match self {
            CronField::Minute => 0,
            CronField::Hour => 1,
            CronField::DayOfMonth => 2,
            CronField::Month => 3,
            CronField::DayOfWeek => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfMonth => "day_of_month",
            CronField::Month => "month",
            CronField::DayOfWeek => "day_of_week",
        }
    }
}

/// Starting point of a next-run search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Search from this instant; the first matching minute wins even if it is in the past.
    Fixed(NaiveDateTime),
    /// Search from this instant, but only accept a minute strictly after `now`.
    Relative(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Any,
    Range(i64, i64),
    Step(i64),
    Value(i64),
    Invalid,
}

impl Token {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            return Token::Any;
        }
        // a leading '-' is a negative literal, not a range
        if let Some(pos) = raw.find('-').filter(|&p| p > 0) {
            return match (raw[..pos].parse(), raw[pos + 1..].parse()) {
                (Ok(first), Ok(last)) => Token::Range(first, last),
                _ => Token::Invalid,
            };
        }
        if let Some(interval) = raw.strip_prefix("*/") {
            return match interval.parse() {
                Ok(0) | Err(_) => Token::Invalid,
                Ok(n) => Token::Step(n),
            };
        }
        raw.parse().map(Token::Value).unwrap_or(Token::Invalid)
    }

    fn matches(&self, value: i64) -> Option<bool> {
        match *self {
            Token::Any => Some(true),
            Token::Range(first, last) => Some(first <= value && value <= last),
            Token::Step(n) => Some(value % n == 0),
            Token::Value(v) => Some(v == value),
            Token::Invalid => None,
        }
    }
}

/// Whether `value` satisfies a single cron field token.
pub fn field_matches(token: &str, value: u32) -> Result<bool, CronError> {
    Token::parse(token)
        .matches(i64::from(value))
        .ok_or_else(|| CronError::Parse {
            expr: token.to_string(),
            reason: "expected '*', 'a-b', '*/n' or an integer".to_string(),
        })
}

/// A parsed, immutable cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    /// The schedule exactly as given, kept for display and storage.
    source: String,
    raw: [String; 5],
    tokens: [Token; 5],
}

impl CronExpression {
    /// Parse a schedule such as `"*/5 2-4 * * 1"`.
    ///
    /// Fails unless the string holds exactly five whitespace-separated fields.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let raw: [String; 5] = match parts.as_slice() {
            [m, h, dom, mon, dow] => [m, h, dom, mon, dow].map(|s| s.to_string()),
            _ => {
                return Err(CronError::Parse {
                    expr: expr.to_string(),
                    reason: format!("expected 5 fields, found {}", parts.len()),
                })
            }
        };
        let tokens = [0, 1, 2, 3, 4].map(|i| Token::parse(&raw[i]));
        Ok(Self {
            source: expr.to_string(),
            raw,
            tokens,
        })
    }

    /// Raw token of one field.
    pub fn field(&self, field: CronField) -> &str {
        &self.raw[field.index()]
    }

    fn satisfied(&self, field: CronField, value: u32) -> Result<bool, CronError> {
        self.tokens[field.index()]
            .matches(i64::from(value))
            .ok_or_else(|| CronError::InvalidField {
                expr: self.to_string(),
                field: field.name(),
                token: self.field(field).to_string(),
            })
    }

    fn no_match(&self, iterations: u32) -> CronError {
        CronError::NoMatch {
            expr: self.to_string(),
            iterations,
        }
    }

    /// First minute at or after the anchor that satisfies every field.
    ///
    /// Fields are checked coarse to fine (month, day of month, day of week,
    /// hour, minute). A miss advances that unit, resets the finer ones, and
    /// restarts the check at month.
    pub fn next_run_date(&self, anchor: Anchor, now: NaiveDateTime) -> Result<NaiveDateTime, CronError> {
        let (start, relative) = match anchor {
            Anchor::Fixed(t) => (t, false),
            Anchor::Relative(t) => (t, true),
        };
        let mut next = truncate_to_minute(start);

        for i in 0..MAX_ITERATIONS {
            let advanced = if !self.satisfied(CronField::Month, next.month())? {
                first_of_next_month(next)
            } else if !self.satisfied(CronField::DayOfMonth, next.day())? {
                start_of_next_day(next)
            } else if !self.satisfied(CronField::DayOfWeek, next.weekday().number_from_monday())? {
                start_of_next_day(next)
            } else if !self.satisfied(CronField::Hour, next.hour())? {
                start_of_next_hour(next)
            } else if !self.satisfied(CronField::Minute, next.minute())? {
                next.checked_add_signed(Duration::minutes(1))
            } else if relative && now >= next {
                next.checked_add_signed(Duration::minutes(1))
            } else {
                return Ok(next);
            };
            next = advanced.ok_or_else(|| self.no_match(i))?;
        }

        Err(self.no_match(MAX_ITERATIONS))
    }

    /// Whether at least one scheduled minute was missed since `last_run`.
    ///
    /// True when the next run computed from `last_run` differs from the next
    /// run computed from `now`.
    pub fn is_due(&self, last_run: NaiveDateTime, now: NaiveDateTime) -> Result<bool, CronError> {
        Ok(self.next_run_date(Anchor::Fixed(last_run), now)?
            != self.next_run_date(Anchor::Fixed(now), now)?)
    }

    /// The next `count` run times strictly after `from`.
    pub fn upcoming(&self, from: NaiveDateTime, count: usize) -> Result<Vec<NaiveDateTime>, CronError> {
        let mut runs = Vec::with_capacity(count);
        let mut cursor = from;
        for _ in 0..count {
            let next = self.next_run_date(Anchor::Relative(cursor), cursor)?;
            runs.push(next);
            cursor = next;
        }
        Ok(runs)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.source)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpression::parse(s)
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn start_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

fn start_of_next_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let n = t.checked_add_signed(Duration::hours(1))?;
    n.date().and_hms_opt(n.hour(), 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn parse_exposes_each_field() {
        let cron = CronExpression::parse("1 2-4 * 4 */3").unwrap();
        assert_eq!(cron.field(CronField::Minute), "1");
        assert_eq!(cron.field(CronField::Hour), "2-4");
        assert_eq!(cron.field(CronField::DayOfMonth), "*");
        assert_eq!(cron.field(CronField::Month), "4");
        assert_eq!(cron.field(CronField::DayOfWeek), "*/3");
        assert_eq!(cron.to_string(), "1 2-4 * 4 */3");
    }

    #[test]
    fn display_keeps_the_schedule_as_written() {
        let cron = CronExpression::parse("*/5  * * *\t*").unwrap();
        assert_eq!(cron.to_string(), "*/5  * * *\t*");
        assert_eq!(cron.field(CronField::Minute), "*/5");
        assert_eq!(cron.field(CronField::DayOfWeek), "*");
    }

    #[test]
    fn parse_requires_exactly_five_fields() {
        assert!(CronExpression::parse("* * * 1").is_err());
        assert!(CronExpression::parse("* * * * * *").is_err());
        assert!(CronExpression::parse("").is_err());
        assert!("* * * * *".parse::<CronExpression>().is_ok());
    }

    #[test]
    fn parse_is_lenient_about_field_values() {
        // out of range and malformed tokens only fail on evaluation
        assert!(CronExpression::parse("99 * * * *").is_ok());
        let odd = CronExpression::parse("1,2 * * * *").unwrap();
        let err = odd
            .next_run_date(Anchor::Fixed(dt("2010-08-10 21:47:27")), dt("2010-08-10 21:47:27"))
            .unwrap_err();
        assert!(matches!(err, CronError::InvalidField { field: "minute", .. }));
    }

    #[test]
    fn step_token_matches_multiples() {
        for v in [0, 3, 6, 9] {
            assert!(field_matches("*/3", v).unwrap(), "value {v}");
        }
        for v in [1, 2, 4, 5] {
            assert!(!field_matches("*/3", v).unwrap(), "value {v}");
        }
    }

    #[test]
    fn range_token_is_inclusive() {
        for v in [2, 3, 4] {
            assert!(field_matches("2-4", v).unwrap());
        }
        for v in [1, 5] {
            assert!(!field_matches("2-4", v).unwrap());
        }
    }

    #[test]
    fn literal_and_wildcard_tokens() {
        assert!(field_matches("*", 59).unwrap());
        assert!(field_matches("7", 7).unwrap());
        assert!(!field_matches("7", 8).unwrap());
        assert!(!field_matches("-7", 7).unwrap());
        assert!(field_matches("*/0", 0).is_err());
        assert!(field_matches("mon", 1).is_err());
    }

    // schedule, current time, last run, next run from last run, is due
    const CASES: &[(&str, &str, &str, &str, bool)] = &[
        ("*/2 */2 * * *", "2010-08-10 21:47:27", "2010-08-10 15:30:00", "2010-08-10 22:00:00", true),
        ("* * * * *", "2010-08-10 21:50:37", "2010-08-10 21:00:00", "2010-08-10 21:51:00", true),
        ("7-9 * */9 * *", "2010-08-10 22:02:33", "2010-08-10 22:01:33", "2010-08-18 00:07:00", false),
        ("12-19 */3 */5 6 7", "2010-08-10 22:05:51", "2010-08-10 22:04:51", "2011-06-05 00:12:00", false),
        ("15 2 */15 1 */5", "2010-08-10 22:10:19", "2010-08-10 22:09:19", "2015-01-30 02:15:00", false),
        ("15 2 */15 1 2-5", "2010-08-10 22:10:19", "2010-08-10 22:09:19", "2013-01-15 02:15:00", false),
    ];

    #[test]
    fn due_and_next_run_match_reference_schedules() {
        for &(schedule, now, last, next, due) in CASES {
            let cron = CronExpression::parse(schedule).unwrap();
            assert_eq!(cron.is_due(dt(last), dt(now)).unwrap(), due, "{schedule}");
            assert_eq!(
                cron.next_run_date(Anchor::Relative(dt(last)), dt(now)).unwrap(),
                dt(next),
                "{schedule}"
            );
        }
    }

    #[test]
    fn fixed_anchor_accepts_past_minutes() {
        let cron = CronExpression::parse("*/2 */2 * * *").unwrap();
        let next = cron
            .next_run_date(Anchor::Fixed(dt("2010-08-10 15:30:00")), dt("2010-08-10 21:47:27"))
            .unwrap();
        assert_eq!(next, dt("2010-08-10 16:00:00"));
    }

    #[test]
    fn ran_this_minute_is_not_due() {
        let cron = CronExpression::parse("* * * * *").unwrap();
        let now = dt("2011-03-01 12:00:40");
        assert!(!cron.is_due(dt("2011-03-01 12:00:05"), now).unwrap());
        assert!(cron.is_due(dt("2011-03-01 11:50:00"), now).unwrap());
    }

    #[test]
    fn month_rollover_does_not_skip_short_months() {
        let cron = CronExpression::parse("0 0 1 * *").unwrap();
        let next = cron
            .next_run_date(Anchor::Relative(dt("2011-01-31 10:00:00")), dt("2011-01-31 10:00:00"))
            .unwrap();
        assert_eq!(next, dt("2011-02-01 00:00:00"));
    }

    #[test]
    fn impossible_schedule_fails_fast() {
        let cron = CronExpression::parse("0 0 31 2 *").unwrap();
        let err = cron
            .next_run_date(Anchor::Fixed(dt("2010-01-01 00:00:00")), dt("2010-01-01 00:00:00"))
            .unwrap_err();
        assert!(matches!(err, CronError::NoMatch { iterations: MAX_ITERATIONS, .. }));
    }

    #[test]
    fn upcoming_lists_strictly_increasing_runs() {
        let cron = CronExpression::parse("*/15 * * * *").unwrap();
        let runs = cron.upcoming(dt("2011-05-05 10:15:00"), 3).unwrap();
        assert_eq!(
            runs,
            vec![
                dt("2011-05-05 10:30:00"),
                dt("2011-05-05 10:45:00"),
                dt("2011-05-05 11:00:00"),
            ]
        );
    }
}
