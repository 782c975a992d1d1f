//! Validation skip flags.
//!
//! A bitmask of checks the controller may bypass: replay trusts the log it
//! wrote, tests fabricate unsigned blocks, and locally submitted
//! transactions skip the pending-block size limit. The active mask is
//! scoped state on the controller — `with_skip_flags` *assigns* the new
//! mask (it does not OR it into the old one) and restores the previous
//! mask on every exit path.

use std::fmt;
use std::ops::BitOr;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SkipFlags(u32);

impl SkipFlags {
    pub const NONE: Self = Self(0);
    pub const PRODUCER_SIGNATURE: Self = Self(1 << 0);
    pub const TRANSACTION_SIGNATURES: Self = Self(1 << 1);
    pub const TRANSACTION_DUPE_CHECK: Self = Self(1 << 2);
    pub const TAPOS_CHECK: Self = Self(1 << 3);
    pub const MERKLE_CHECK: Self = Self(1 << 4);
    pub const FORK_DB: Self = Self(1 << 5);
    pub const AUTHORITY_CHECK: Self = Self(1 << 6);
    pub const PRODUCER_SCHEDULE_CHECK: Self = Self(1 << 7);
    pub const SCOPE_CHECK: Self = Self(1 << 8);
    pub const BLOCK_SIZE_CHECK: Self = Self(1 << 9);
    /// Marks work done on behalf of a received block rather than a local
    /// submission (genesis and replay set it too).
    pub const RECEIVED_BLOCK: Self = Self(1 << 10);

    /// Everything skippable; used below the last checkpoint.
    pub const ALL: Self = Self(u32::MAX);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for SkipFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SkipFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SkipFlags({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_composes_bits() {
        let flags = SkipFlags::PRODUCER_SIGNATURE | SkipFlags::TAPOS_CHECK;
        assert!(flags.contains(SkipFlags::PRODUCER_SIGNATURE));
        assert!(flags.contains(SkipFlags::TAPOS_CHECK));
        assert!(!flags.contains(SkipFlags::MERKLE_CHECK));
    }

    #[test]
    fn all_contains_everything() {
        assert!(SkipFlags::ALL.contains(SkipFlags::FORK_DB));
        assert!(SkipFlags::ALL.contains(SkipFlags::RECEIVED_BLOCK));
    }

    #[test]
    fn none_contains_only_none() {
        assert!(SkipFlags::NONE.contains(SkipFlags::NONE));
        assert!(!SkipFlags::NONE.contains(SkipFlags::SCOPE_CHECK));
    }
}
