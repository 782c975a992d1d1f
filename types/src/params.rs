//! Protocol constants.
//!
//! These values are fixed for the lifetime of a chain. Tunable limits
//! (maximum transaction lifetime, block size, authority depth) live in the
//! chain configuration stored on global properties instead, where a future
//! governance path can adjust them per round.

use crate::name::{AccountName, PermissionName};

/// Milliseconds between consecutive production slots.
pub const BLOCK_INTERVAL_MS: u64 = 500;

/// Number of producers in an active schedule.
pub const ACTIVE_PRODUCER_COUNT: usize = 21;

/// Consecutive blocks each producer signs before the schedule moves to the
/// next producer.
pub const PRODUCER_REPETITIONS: u32 = 1;

/// Slots in one round. The producer schedule may change only at multiples
/// of this.
pub const BLOCKS_PER_ROUND: u32 = ACTIVE_PRODUCER_COUNT as u32 * PRODUCER_REPETITIONS;

/// One hundred percent, in hundredths of a percent.
pub const PERCENT_100: u32 = 10_000;

/// Fraction of active producers (in hundredths of a percent) that must have
/// confirmed past a block before it is irreversible.
pub const IRREVERSIBLE_THRESHOLD_PERCENT: u32 = 7_000;

/// Entries in the block summary ring used by TaPoS (`block_num mod 2^16`).
pub const BLOCK_SUMMARY_CAPACITY: usize = 0x1_0000;

/// Fixed bandwidth charge added to every transaction's serialized size.
pub const FIXED_BANDWIDTH_OVERHEAD_PER_TRANSACTION: u64 = 100;

/// Window over which decaying usage averages (bandwidth, block size) decay
/// to zero.
pub const USAGE_AVERAGE_WINDOW_MS: u64 = 60_000;

/// Bytes of bandwidth one staked token entitles an account to within the
/// usage window, when stake-proportional enforcement is switched on.
pub const BANDWIDTH_BYTES_PER_STAKED_TOKEN: u64 = 1_024;

/// Producer-multisig threshold on the producers account's active authority.
pub const PRODUCERS_AUTHORITY_THRESHOLD: u32 = 14;

/// The privileged system account installed at genesis.
pub fn system_account() -> AccountName {
    AccountName::new("cascade")
}

/// The account whose active authority is rewritten each round to the
/// threshold-of-producers multisig.
pub fn producers_account() -> AccountName {
    AccountName::new("cascade.prods")
}

/// Built-in scope granting access to all state. Only the genesis
/// transaction declares it.
pub fn all_scope() -> AccountName {
    AccountName::new("cascade.all")
}

/// Built-in scope for authorization-only access.
pub fn auth_scope() -> AccountName {
    AccountName::new("cascade.auth")
}

pub fn owner_permission() -> PermissionName {
    PermissionName::new("owner")
}

pub fn active_permission() -> PermissionName {
    PermissionName::new("active")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_is_a_multiple_of_repetitions() {
        assert_eq!(BLOCKS_PER_ROUND % PRODUCER_REPETITIONS, 0);
        assert_eq!(
            (BLOCKS_PER_ROUND / PRODUCER_REPETITIONS) as usize,
            ACTIVE_PRODUCER_COUNT
        );
    }

    #[test]
    fn builtin_scopes_are_distinct() {
        assert_ne!(all_scope(), auth_scope());
        assert_ne!(system_account(), producers_account());
    }
}
