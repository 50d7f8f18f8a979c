//! Recurrence sequences: an infinite (or context-bounded) stream of points
//! generated by an anchor point plus a step interval.

use super::interval::Interval;
use super::point::Point;
use crate::error::{Result, SchedulerError};
use regex::Regex;
use std::cmp::Ordering;

/// A recurrence rule: points at `anchor + n*step` for integer `n`, optionally
/// bounded by a context window.
#[derive(Debug, Clone)]
pub struct Sequence {
    anchor: Point,
    step: Interval,
    context_start: Point,
    context_end: Option<Point>,
}

impl Sequence {
    /// Build a sequence from a recurrence specifier and the surrounding
    /// context window. Accepts the back-compat `Daily(anchor,step)` /
    /// `Monthly(anchor,step)` / `Yearly(anchor,step)` forms by rewriting them
    /// to the equivalent `PnD` / `PnM` / `PnY` step before parsing.
    pub fn new(spec: &str, context_start: Point, context_end: Option<Point>) -> Result<Self> {
        let (anchor_str, step_str) = split_recurrence(spec)?;
        let step = Interval::parse(&step_str)?;
        let anchor = match anchor_str {
            Some(s) => Point::parse(&s)?,
            None => context_start,
        };
        Ok(Self {
            anchor,
            step,
            context_start,
            context_end,
        })
    }

    /// Rebuild the recurrence anchored at `context_start + offset`, keeping
    /// the step unchanged. Mirrors the original's `set_offset`.
    pub fn set_offset(&mut self, offset: &Interval) -> Result<()> {
        self.anchor = self.context_start.add(offset)?;
        Ok(())
    }

    pub fn step(&self) -> &Interval {
        &self.step
    }

    /// Whether `point` lies exactly on this recurrence.
    pub fn is_on_sequence(&self, point: &Point) -> Result<bool> {
        if !self.step.is_null() {
            let delta = point.sub_point(&self.anchor)?;
            let n = match (&delta, &self.step) {
                (Interval::Integer(d), Interval::Integer(s)) if *s != 0 => {
                    if d % s != 0 {
                        return Ok(false);
                    }
                    d / s
                }
                _ => {
                    // ISO family: walk forward from the anchor until we reach
                    // or pass `point`. Bounded by a generous iteration cap so
                    // a malformed step cannot spin forever.
                    let mut cursor = self.anchor;
                    for _ in 0..100_000 {
                        match cursor.cmp(point)? {
                            Ordering::Equal => return Ok(true),
                            Ordering::Greater => return Ok(false),
                            Ordering::Less => cursor = cursor.add(&self.step)?,
                        }
                    }
                    return Ok(false);
                }
            };
            return Ok(self.anchor.add(&self.step.mul(n))?.cmp(point)? == Ordering::Equal);
        }
        Ok(self.anchor.cmp(point)? == Ordering::Equal)
    }

    /// The next point on the sequence strictly after `point`, if any within
    /// the context window.
    pub fn get_next_point(&self, point: &Point) -> Result<Option<Point>> {
        self.walk(point, false)
    }

    /// The next point on the sequence at-or-after `point`.
    pub fn get_nexteq_point(&self, point: &Point) -> Result<Option<Point>> {
        self.walk(point, true)
    }

    /// The previous point on the sequence strictly before `point`, if any.
    pub fn get_prev_point(&self, point: &Point) -> Result<Option<Point>> {
        let mut cursor = self.anchor;
        let mut prev = None;
        for _ in 0..100_000 {
            if cursor.cmp(point)? != Ordering::Less {
                break;
            }
            prev = Some(cursor);
            cursor = cursor.add(&self.step)?;
        }
        if let Some(end) = self.context_end {
            if let Some(p) = prev {
                if p.cmp(&end)? == Ordering::Greater {
                    return Ok(None);
                }
            }
        }
        Ok(prev)
    }

    fn walk(&self, point: &Point, inclusive: bool) -> Result<Option<Point>> {
        let mut cursor = self.anchor;
        for _ in 0..100_000 {
            let ord = cursor.cmp(point)?;
            let hit = if inclusive {
                ord != Ordering::Less
            } else {
                ord == Ordering::Greater
            };
            if hit {
                if let Some(end) = self.context_end {
                    if cursor.cmp(&end)? == Ordering::Greater {
                        return Ok(None);
                    }
                }
                return Ok(Some(cursor));
            }
            cursor = cursor.add(&self.step)?;
        }
        Ok(None)
    }
}

/// Rewrites the legacy `Daily(anchor,step)` / `Monthly(anchor,step)` /
/// `Yearly(anchor,step)` forms to `(Some(anchor), "PnD"/"PnM"/"PnY")`, and
/// otherwise splits a plain `anchor/step` or bare `step` specifier.
fn split_recurrence(spec: &str) -> Result<(Option<String>, String)> {
    let spec = spec.trim();
    static BACK_COMPAT: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r"^(Daily|Monthly|Yearly)\(([^,]*),\s*(\d+)\)$").expect("static regex is valid")
    });
    if let Some(caps) = BACK_COMPAT.captures(spec) {
        let unit = match &caps[1] {
            "Daily" => "D",
            "Monthly" => "M",
            "Yearly" => "Y",
            _ => unreachable!(),
        };
        let anchor = caps[2].trim();
        let step = &caps[3];
        let anchor = if anchor.is_empty() {
            None
        } else {
            Some(anchor.to_string())
        };
        return Ok((anchor, format!("P{step}{unit}")));
    }
    if let Some((anchor, step)) = spec.split_once('/') {
        if anchor.is_empty() {
            return Ok((None, step.to_string()));
        }
        return Ok((Some(anchor.to_string()), step.to_string()));
    }
    if spec.is_empty() {
        return Err(SchedulerError::CycleError("empty recurrence".into()));
    }
    Ok((None, spec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_back_compat_daily() {
        let (anchor, step) = split_recurrence("Daily(20000101T0000,2)").unwrap();
        assert_eq!(anchor.as_deref(), Some("20000101T0000"));
        assert_eq!(step, "P2D");
    }

    #[test]
    fn is_on_sequence_for_integer_family() {
        let seq = Sequence::new("0/PiC3", Point::Integer(0), None).unwrap();
        assert!(seq.is_on_sequence(&Point::Integer(9)).unwrap());
        assert!(!seq.is_on_sequence(&Point::Integer(10)).unwrap());
    }

    #[test]
    fn next_and_prev_points() {
        let anchor = Point::parse("20000101T0000").unwrap();
        let seq = Sequence::new("PT12H", anchor, None).unwrap();
        let next = seq.get_next_point(&anchor).unwrap().unwrap();
        assert_eq!(next.canonical(), "20000101T120000");
        let prev = seq.get_prev_point(&next).unwrap().unwrap();
        assert_eq!(prev.canonical(), anchor.canonical());
    }
}
