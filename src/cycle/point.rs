//! Cycle points: ISO-8601 date-times or plain integer counters.

use super::interval::{Interval, IsoIntervalParts};
use super::memo::Memo;
use crate::error::{Result, SchedulerError};
use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

static POINT_ADD_MEMO: Lazy<Memo<Point>> = Lazy::new(Memo::new);
static POINT_PARSE_MEMO: Lazy<Memo<Point>> = Lazy::new(Memo::new);

/// A cycle point: a coordinate at which task instances live. Integer and ISO
/// points never compare or combine with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Point {
    Iso(NaiveDateTime),
    Integer(i64),
}

impl Point {
    /// Parse `YYYYMMDDThhmm[ss]` (ISO family) or a bare integer (integer
    /// family). Successful parses are memoized by input string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(cached) = POINT_PARSE_MEMO.get(raw) {
            return Ok(cached);
        }
        let point = Self::parse_uncached(raw)?;
        POINT_PARSE_MEMO.put(raw, point);
        Ok(point)
    }

    fn parse_uncached(raw: &str) -> Result<Self> {
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(Point::Integer(n));
        }
        static RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^(\d{4})(\d{2})(\d{2})T(\d{2})(\d{2})(?:(\d{2}))?Z?$")
                .expect("static regex is valid")
        });
        let caps = RE
            .captures(raw)
            .ok_or_else(|| SchedulerError::CycleError(format!("malformed cycle point: {raw}")))?;
        let field = |i: usize| -> u32 { caps.get(i).unwrap().as_str().parse().unwrap_or(0) };
        let year: i32 = caps.get(1).unwrap().as_str().parse().unwrap_or(0);
        let (month, day, hour, minute) = (field(2), field(3), field(4), field(5));
        let second = caps.get(6).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
        let date = chrono::NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| SchedulerError::CycleError(format!("malformed cycle point: {raw}")))?;
        let time = chrono::NaiveTime::from_hms_opt(hour, minute, second)
            .ok_or_else(|| SchedulerError::CycleError(format!("malformed cycle point: {raw}")))?;
        Ok(Point::Iso(NaiveDateTime::new(date, time)))
    }

    /// Canonical string form, used as the cache key and for equality across
    /// representations.
    pub fn canonical(&self) -> String {
        match self {
            Point::Integer(n) => n.to_string(),
            Point::Iso(dt) => format!(
                "{:04}{:02}{:02}T{:02}{:02}{:02}",
                dt.year(),
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            ),
        }
    }

    pub fn add(&self, interval: &Interval) -> Result<Point> {
        let key = format!("{}+{interval}", self.canonical());
        if let Some(cached) = POINT_ADD_MEMO.get(&key) {
            return Ok(cached);
        }
        let result = self.add_uncached(interval)?;
        POINT_ADD_MEMO.put(&key, result);
        Ok(result)
    }

    fn add_uncached(&self, interval: &Interval) -> Result<Point> {
        match (self, interval) {
            (Point::Integer(p), Interval::Integer(i)) => Ok(Point::Integer(p + i)),
            (Point::Iso(dt), Interval::Iso(parts)) => Ok(Point::Iso(apply_iso_parts(*dt, parts))),
            _ => Err(SchedulerError::CycleKindMismatch(
                "cannot add interval to point of a different family".into(),
            )),
        }
    }

    pub fn sub_interval(&self, interval: &Interval) -> Result<Point> {
        self.add(&interval.neg())
    }

    pub fn sub_point(&self, other: &Point) -> Result<Interval> {
        match (self, other) {
            (Point::Integer(a), Point::Integer(b)) => Ok(Interval::Integer(a - b)),
            (Point::Iso(a), Point::Iso(b)) => {
                let d: Duration = *a - *b;
                Ok(Interval::Iso(IsoIntervalParts {
                    years: 0,
                    months: 0,
                    weeks: 0,
                    days: d.num_days(),
                    hours: 0,
                    minutes: 0,
                    seconds: d.num_seconds() - d.num_days() * 86_400,
                }))
            }
            _ => Err(SchedulerError::CycleKindMismatch(
                "cannot subtract points of different families".into(),
            )),
        }
    }

    pub fn cmp(&self, other: &Point) -> Result<Ordering> {
        match (self, other) {
            (Point::Integer(a), Point::Integer(b)) => Ok(a.cmp(b)),
            (Point::Iso(a), Point::Iso(b)) => Ok(a.cmp(b)),
            _ => Err(SchedulerError::CycleKindMismatch(
                "cannot compare points of different families".into(),
            )),
        }
    }
}

fn apply_iso_parts(dt: NaiveDateTime, parts: &IsoIntervalParts) -> NaiveDateTime {
    let mut date = dt.date();
    if parts.years != 0 {
        date = shift_months(date, parts.years * 12);
    }
    if parts.months != 0 {
        date = shift_months(date, parts.months);
    }
    let mut result = NaiveDateTime::new(date, dt.time());
    let delta = Duration::weeks(parts.weeks)
        + Duration::days(parts.days)
        + Duration::hours(parts.hours)
        + Duration::minutes(parts.minutes)
        + Duration::seconds(parts.seconds);
    result += delta;
    result
}

fn shift_months(date: chrono::NaiveDate, months: i64) -> chrono::NaiveDate {
    let total = date.year() as i64 * 12 + (date.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    let day = date.day();
    // Clamp to the last valid day of the target month (e.g. Jan 31 + 1M -> Feb 28/29).
    (1..=31)
        .rev()
        .find_map(|d| chrono::NaiveDate::from_ymd_opt(year, month, d.min(day)))
        .unwrap_or_else(|| chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap())
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_add_then_subtract() {
        let p = Point::parse("20000101T0000").unwrap();
        let i = Interval::parse("PT12H").unwrap();
        let added = p.add(&i).unwrap();
        let back = added.sub_interval(&i).unwrap();
        assert_eq!(back.canonical(), p.canonical());
    }

    #[test]
    fn integer_family_arithmetic() {
        let p = Point::parse("10").unwrap();
        let i = Interval::parse("PiC5").unwrap();
        assert_eq!(p.add(&i).unwrap(), Point::Integer(15));
    }

    #[test]
    fn month_shift_clamps_to_valid_day() {
        let p = Point::parse("20000131T0000").unwrap();
        let i = Interval::parse("P1M").unwrap();
        let added = p.add(&i).unwrap();
        assert_eq!(added.canonical(), "20000229T000000");
    }
}
