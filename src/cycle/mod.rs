//! Cycle algebra: points, intervals, and recurrence sequences over the ISO-8601
//! and plain-integer cycle families.
//!
//! Grounded on `cylc/flow/cycling/iso8601.py`'s `ISO8601Point` /
//! `ISO8601Interval` / `ISO8601Sequence` and their `@memoize`d arithmetic.

mod interval;
mod memo;
mod point;
mod sequence;

pub use interval::{Interval, IsoIntervalParts, ISO_NULL_INTERVAL};
pub use point::Point;
pub use sequence::Sequence;
