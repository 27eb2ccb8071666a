// Cron expression parsing and evaluation
//
// Five-field expressions (minute hour day-of-month month day-of-week) are
// evaluated here with standard cron day semantics. Six and seven field
// Quartz expressions carry seconds and are delegated to the `cron` crate.

use crate::errors::ScheduleError;
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use cron::Schedule as QuartzSchedule;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How far ahead to search before declaring that an expression never fires.
/// Eight years covers the gap between two leap days across a skipped century.
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    name_base: u32,
    allows_question: bool,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
    allows_question: false,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
    allows_question: false,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
    allows_question: true,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    name_base: 1,
    allows_question: false,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &DAY_NAMES,
    name_base: 0,
    allows_question: true,
};

/// Set of accepted values for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// False when the field was written as `*` or `?` (with or without a step)
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(text: &str, spec: &FieldSpec) -> Result<Self, String> {
        if text.is_empty() {
            return Err(format!("empty {} field", spec.name));
        }
        if text.contains('?') && !spec.allows_question {
            return Err(format!("'?' is not allowed in the {} field", spec.name));
        }

        let restricted = !(text.starts_with('*') || text.starts_with('?'));
        let mut bits = 0u64;

        for part in text.split(',') {
            if part.is_empty() {
                return Err(format!("empty list item in {} field", spec.name));
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                    if step == 0 || step > spec.max {
                        return Err(format!(
                            "step must be between 1 and {} in {} field",
                            spec.max, spec.name
                        ));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (lo, hi) = if range == "*" || range == "?" {
                (spec.min, spec.max)
            } else if let Some((a, b)) = range.split_once('-') {
                (Self::value(a, spec)?, Self::value(b, spec)?)
            } else {
                let v = Self::value(range, spec)?;
                // `a/b` means every b starting at a
                if step.is_some() {
                    (v, spec.max)
                } else {
                    (v, v)
                }
            };

            if lo > hi {
                return Err(format!("range {}-{} is reversed in {} field", lo, hi, spec.name));
            }

            let step = step.unwrap_or(1);
            let mut next = Some(lo);
            while let Some(v) = next.filter(|v| *v <= hi) {
                bits |= 1u64 << v;
                next = v.checked_add(step);
            }
        }

        // 7 is an alias for Sunday
        if spec.max == 7 && bits & (1 << 7) != 0 {
            bits = (bits | 1) & !(1 << 7);
        }

        Ok(Field { bits, restricted })
    }

    fn value(text: &str, spec: &FieldSpec) -> Result<u32, String> {
        if let Ok(v) = text.parse::<u32>() {
            if v < spec.min || v > spec.max {
                return Err(format!(
                    "{} out of range {}-{} in {} field",
                    v, spec.min, spec.max, spec.name
                ));
            }
            return Ok(v);
        }

        let lower = text.to_ascii_lowercase();
        spec.names
            .iter()
            .position(|name| *name == lower)
            .map(|idx| idx as u32 + spec.name_base)
            .ok_or_else(|| format!("invalid value '{}' in {} field", text, spec.name))
    }
}

/// A parsed five-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl FromStr for CronExpression {
    type Err = ScheduleError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        Ok(Self {
            source: expression.trim().to_string(),
            minutes: Field::parse(fields[0], &MINUTE).map_err(invalid)?,
            hours: Field::parse(fields[1], &HOUR).map_err(invalid)?,
            days_of_month: Field::parse(fields[2], &DAY_OF_MONTH).map_err(invalid)?,
            months: Field::parse(fields[3], &MONTH).map_err(invalid)?,
            days_of_week: Field::parse(fields[4], &DAY_OF_WEEK).map_err(invalid)?,
        })
    }
}

impl CronExpression {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Day condition. When both day fields are restricted either may match,
    /// otherwise the unrestricted one accepts every day anyway.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn first_time_from(&self, hour: u32, minute: u32) -> Option<(u32, u32)> {
        for h in hour..24 {
            if !self.hours.contains(h) {
                continue;
            }
            let start = if h == hour { minute } else { 0 };
            if let Some(m) = (start..60).find(|m| self.minutes.contains(*m)) {
                return Some((h, m));
            }
        }
        None
    }

    /// First matching wall-clock minute at or after `start`
    fn next_local_match(&self, start: NaiveDateTime, horizon: NaiveDate) -> Option<NaiveDateTime> {
        let mut date = start.date();
        let (mut hour, mut minute) = (start.hour(), start.minute());

        while date <= horizon {
            if !self.months.contains(date.month()) {
                date = first_of_next_month(date)?;
                (hour, minute) = (0, 0);
                continue;
            }
            if self.day_matches(date) {
                if let Some((h, m)) = self.first_time_from(hour, minute) {
                    return date.and_hms_opt(h, m, 0);
                }
            }
            date = date.succ_opt()?;
            (hour, minute) = (0, 0);
        }
        None
    }

    /// Minimum minute-aligned instant strictly after `after`, evaluated in `tz`.
    /// Local times inside a DST gap are skipped; ambiguous ones resolve to the
    /// earliest instant still after `after`.
    pub fn next_after<Z: TimeZone>(&self, after: DateTime<Utc>, tz: &Z) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(tz).naive_local();
        let mut candidate = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = candidate.date() + Duration::days(SEARCH_HORIZON_DAYS);

        loop {
            let naive = self.next_local_match(candidate, horizon)?;
            match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => {
                    let utc = dt.with_timezone(&Utc);
                    if utc > after {
                        return Some(utc);
                    }
                }
                LocalResult::Ambiguous(earliest, latest) => {
                    for dt in [earliest, latest] {
                        let utc = dt.with_timezone(&Utc);
                        if utc > after {
                            return Some(utc);
                        }
                    }
                }
                LocalResult::None => {}
            }
            candidate = naive + Duration::minutes(1);
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

/// Any cron expression the engine accepts
#[derive(Debug, Clone)]
pub enum CronSpec {
    Standard(CronExpression),
    Quartz(QuartzSchedule),
}

impl CronSpec {
    /// Parse and validate a cron expression
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        match expression.split_whitespace().count() {
            5 => expression.parse().map(CronSpec::Standard),
            6 | 7 => QuartzSchedule::from_str(expression)
                .map(CronSpec::Quartz)
                .map_err(|e| ScheduleError::InvalidCronExpression {
                    expression: expression.to_string(),
                    reason: e.to_string(),
                }),
            n => Err(ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields (or 6-7 with seconds), found {}", n),
            }),
        }
    }

    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            CronSpec::Standard(expr) => expr.next_after(after, &tz),
            CronSpec::Quartz(schedule) => schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}
