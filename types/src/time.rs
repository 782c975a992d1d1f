//! Chain time: millisecond time points and slot-based block timestamps.
//!
//! Block production advances in fixed slots of
//! [`params::BLOCK_INTERVAL_MS`](crate::params::BLOCK_INTERVAL_MS)
//! milliseconds. A [`BlockTimestamp`] is a slot count since the Unix epoch,
//! so slot arithmetic is integer arithmetic and replicas can never disagree
//! on rounding.

use crate::params::BLOCK_INTERVAL_MS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in time, in milliseconds since the Unix epoch (UTC).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimePoint(u64);

impl TimePoint {
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs.saturating_mul(1000)))
    }

    pub fn saturating_add_millis(&self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A block timestamp: the number of whole block intervals since the Unix
/// epoch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockTimestamp(u32);

impl BlockTimestamp {
    pub const EPOCH: Self = Self(0);

    pub fn from_slot(slot: u32) -> Self {
        Self(slot)
    }

    /// Truncate a time point down to its slot.
    pub fn from_time_point(t: TimePoint) -> Self {
        Self((t.as_millis() / BLOCK_INTERVAL_MS) as u32)
    }

    pub fn slot(&self) -> u32 {
        self.0
    }

    pub fn to_time_point(&self) -> TimePoint {
        TimePoint::from_millis(self.0 as u64 * BLOCK_INTERVAL_MS)
    }

    /// Whether a time point falls exactly on a slot boundary.
    pub fn is_exact(t: TimePoint) -> bool {
        t.as_millis() % BLOCK_INTERVAL_MS == 0
    }

    pub fn saturating_add_slots(&self, slots: u32) -> Self {
        Self(self.0.saturating_add(slots))
    }

    /// Slots elapsed from `earlier` to `self` (zero if `earlier` is later).
    pub fn slots_since(&self, earlier: BlockTimestamp) -> u32 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_point_truncates_to_slot() {
        let t = TimePoint::from_millis(BLOCK_INTERVAL_MS * 7 + BLOCK_INTERVAL_MS / 2);
        assert_eq!(BlockTimestamp::from_time_point(t).slot(), 7);
    }

    #[test]
    fn slot_round_trips_on_boundary() {
        let ts = BlockTimestamp::from_slot(42);
        assert_eq!(BlockTimestamp::from_time_point(ts.to_time_point()), ts);
        assert!(BlockTimestamp::is_exact(ts.to_time_point()));
    }

    #[test]
    fn off_boundary_is_not_exact() {
        let t = TimePoint::from_millis(BLOCK_INTERVAL_MS + 1);
        assert!(!BlockTimestamp::is_exact(t));
    }

    #[test]
    fn slots_since_saturates() {
        let a = BlockTimestamp::from_slot(5);
        let b = BlockTimestamp::from_slot(9);
        assert_eq!(b.slots_since(a), 4);
        assert_eq!(a.slots_since(b), 0);
    }
}
