//! Signed durations in either the ISO-8601 calendar family or the plain
//! integer-count family.

use crate::error::{Result, SchedulerError};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

/// The null interval string for the ISO family, per the original's
/// `NULL_INTERVAL_STRING`.
pub const ISO_NULL_INTERVAL: &str = "P0Y";

/// A signed ISO-8601 duration, stored component-wise because calendar units
/// (years, months) are not fixed-length and must be applied via calendar
/// arithmetic rather than folded into a single `chrono::Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoIntervalParts {
    pub years: i64,
    pub months: i64,
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl IsoIntervalParts {
    fn is_zero(&self) -> bool {
        self.years == 0
            && self.months == 0
            && self.weeks == 0
            && self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
    }

    /// Total calendar-independent seconds, approximating months as 30 days
    /// and years as 365 days for the purpose of ordering/comparison only.
    fn approx_seconds(&self) -> i64 {
        self.seconds
            + self.minutes * 60
            + self.hours * 3600
            + self.days * 86_400
            + self.weeks * 7 * 86_400
            + self.months * 30 * 86_400
            + self.years * 365 * 86_400
    }
}

/// A cycle interval: either an ISO-8601 duration or a plain integer delta.
/// The two families never interoperate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interval {
    Iso(IsoIntervalParts),
    Integer(i64),
}

impl Interval {
    /// The null (zero-length) interval in the given family.
    pub fn null_iso() -> Self {
        Interval::Iso(IsoIntervalParts::default())
    }

    pub fn null_integer() -> Self {
        Interval::Integer(0)
    }

    pub fn is_null(&self) -> bool {
        match self {
            Interval::Iso(p) => p.is_zero(),
            Interval::Integer(n) => *n == 0,
        }
    }

    /// Parse an ISO-8601 interval (`P1Y2M3DT4H5M6S`) or a plain-count
    /// interval (`P4` in the integer family, mirroring the ISO `P` prefix).
    /// Back-compat sugar (`Daily(anchor,step)` etc.) is rewritten before
    /// reaching this function; see [`super::rewrite_back_compat`].
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SchedulerError::CycleError("empty interval".into()));
        }
        if let Some(count) = raw.strip_prefix("PiC") {
            // `PiC<n>` denotes an integer-family interval of n cycles; kept
            // distinct from `P<n>` (ambiguous with ISO years) in our grammar.
            let n: i64 = count
                .parse()
                .map_err(|_| SchedulerError::CycleError(format!("malformed integer interval: {raw}")))?;
            return Ok(Interval::Integer(n));
        }
        let (sign, body) = if let Some(rest) = raw.strip_prefix('-') {
            (-1i64, rest)
        } else {
            (1i64, raw)
        };
        let re = Regex::new(
            r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$"
        ).expect("static regex is valid");
        let caps = re
            .captures(body)
            .ok_or_else(|| SchedulerError::CycleError(format!("malformed ISO interval: {raw}")))?;
        let field = |i: usize| -> i64 {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .unwrap_or(0)
        };
        let parts = IsoIntervalParts {
            years: sign * field(1),
            months: sign * field(2),
            weeks: sign * field(3),
            days: sign * field(4),
            hours: sign * field(5),
            minutes: sign * field(6),
            seconds: sign * field(7),
        };
        Ok(Interval::Iso(parts))
    }

    /// Absolute value. Unlike the reference implementation's `iso_interval_abs`,
    /// which only returns a value on its `<` branch (leaving the `>=` branch an
    /// implicit `None`), this always returns the positive-magnitude interval.
    pub fn abs(&self) -> Interval {
        match self {
            Interval::Iso(p) => {
                if self.approx_cmp_zero() == Ordering::Less {
                    Interval::Iso(IsoIntervalParts {
                        years: -p.years,
                        months: -p.months,
                        weeks: -p.weeks,
                        days: -p.days,
                        hours: -p.hours,
                        minutes: -p.minutes,
                        seconds: -p.seconds,
                    })
                } else {
                    *self
                }
            }
            Interval::Integer(n) => Interval::Integer(n.abs()),
        }
    }

    fn approx_cmp_zero(&self) -> Ordering {
        match self {
            Interval::Iso(p) => p.approx_seconds().cmp(&0),
            Interval::Integer(n) => n.cmp(&0),
        }
    }

    pub fn add(&self, other: &Interval) -> Result<Interval> {
        match (self, other) {
            (Interval::Iso(a), Interval::Iso(b)) => Ok(Interval::Iso(IsoIntervalParts {
                years: a.years + b.years,
                months: a.months + b.months,
                weeks: a.weeks + b.weeks,
                days: a.days + b.days,
                hours: a.hours + b.hours,
                minutes: a.minutes + b.minutes,
                seconds: a.seconds + b.seconds,
            })),
            (Interval::Integer(a), Interval::Integer(b)) => Ok(Interval::Integer(a + b)),
            _ => Err(SchedulerError::CycleKindMismatch(
                "cannot add intervals of different families".into(),
            )),
        }
    }

    pub fn sub(&self, other: &Interval) -> Result<Interval> {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> Interval {
        match self {
            Interval::Iso(p) => Interval::Iso(IsoIntervalParts {
                years: -p.years,
                months: -p.months,
                weeks: -p.weeks,
                days: -p.days,
                hours: -p.hours,
                minutes: -p.minutes,
                seconds: -p.seconds,
            }),
            Interval::Integer(n) => Interval::Integer(-n),
        }
    }

    pub fn mul(&self, factor: i64) -> Interval {
        match self {
            Interval::Iso(p) => Interval::Iso(IsoIntervalParts {
                years: p.years * factor,
                months: p.months * factor,
                weeks: p.weeks * factor,
                days: p.days * factor,
                hours: p.hours * factor,
                minutes: p.minutes * factor,
                seconds: p.seconds * factor,
            }),
            Interval::Integer(n) => Interval::Integer(n * factor),
        }
    }

    pub fn cmp(&self, other: &Interval) -> Result<Ordering> {
        match (self, other) {
            (Interval::Iso(a), Interval::Iso(b)) => {
                Ok(a.approx_seconds().cmp(&b.approx_seconds()))
            }
            (Interval::Integer(a), Interval::Integer(b)) => Ok(a.cmp(b)),
            _ => Err(SchedulerError::CycleKindMismatch(
                "cannot compare intervals of different families".into(),
            )),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Integer(n) => write!(f, "PiC{n}"),
            Interval::Iso(p) => {
                if p.is_zero() {
                    return write!(f, "{ISO_NULL_INTERVAL}");
                }
                let neg = p.approx_seconds() < 0;
                let abs = if neg {
                    IsoIntervalParts {
                        years: -p.years,
                        months: -p.months,
                        weeks: -p.weeks,
                        days: -p.days,
                        hours: -p.hours,
                        minutes: -p.minutes,
                        seconds: -p.seconds,
                    }
                } else {
                    *p
                };
                if neg {
                    write!(f, "-")?;
                }
                write!(f, "P")?;
                if abs.years != 0 {
                    write!(f, "{}Y", abs.years)?;
                }
                if abs.months != 0 {
                    write!(f, "{}M", abs.months)?;
                }
                if abs.weeks != 0 {
                    write!(f, "{}W", abs.weeks)?;
                }
                if abs.days != 0 {
                    write!(f, "{}D", abs.days)?;
                }
                if abs.hours != 0 || abs.minutes != 0 || abs.seconds != 0 {
                    write!(f, "T")?;
                    if abs.hours != 0 {
                        write!(f, "{}H", abs.hours)?;
                    }
                    if abs.minutes != 0 {
                        write!(f, "{}M", abs.minutes)?;
                    }
                    if abs.seconds != 0 {
                        write!(f, "{}S", abs.seconds)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_interval() {
        let i = Interval::parse("P1DT2H").unwrap();
        match i {
            Interval::Iso(p) => {
                assert_eq!(p.days, 1);
                assert_eq!(p.hours, 2);
            }
            _ => panic!("expected iso interval"),
        }
    }

    #[test]
    fn abs_is_unconditional() {
        let negative = Interval::parse("-P1D").unwrap();
        let positive = negative.abs();
        assert_eq!(positive.cmp(&Interval::parse("P1D").unwrap()).unwrap(), Ordering::Equal);
        // abs() of an already-positive interval must also return a value.
        let already_positive = Interval::parse("P1D").unwrap();
        assert_eq!(already_positive.abs().cmp(&already_positive).unwrap(), Ordering::Equal);
    }

    #[test]
    fn mismatched_family_errors() {
        let iso = Interval::parse("P1D").unwrap();
        let int = Interval::Integer(1);
        assert!(iso.add(&int).is_err());
    }
}
