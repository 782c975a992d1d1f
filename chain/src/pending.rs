//! Pending-block assembly: the in-progress block, its trace, its undo
//! session, and the shard scheduler for the currently open cycle.
//!
//! The scheduler enforces the cross-shard disjointness rule: a transaction
//! may join the open cycle only if its read/write scopes are disjoint from
//! every write scope already placed, and its write scopes are disjoint
//! from every read and write scope already placed. A conflicting
//! transaction closes the cycle and opens the next one, so transactions
//! touching the same state always land in consecutive cycles, never in
//! sibling shards.

use crate::block::SignedBlock;
use crate::trace::{BlockTrace, CycleTrace};
use crate::transaction::Transaction;
use cascade_store::Session;
use cascade_types::AccountName;
use std::collections::BTreeSet;

/// Scopes already placed in one shard of the open cycle.
#[derive(Default, Debug)]
struct ShardScopes {
    read: BTreeSet<AccountName>,
    write: BTreeSet<AccountName>,
}

impl ShardScopes {
    fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    fn conflicts_with(&self, trx: &Transaction) -> bool {
        trx.write_scope
            .iter()
            .any(|s| self.read.contains(s) || self.write.contains(s))
            || trx.read_scope.iter().any(|s| self.write.contains(s))
    }
}

/// Shard scheduler for the open cycle.
#[derive(Default, Debug)]
pub struct CycleScheduler {
    shards: Vec<ShardScopes>,
}

impl CycleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Open an empty shard (mirrors the block's summary structure).
    pub fn start_shard(&mut self) {
        self.shards.push(ShardScopes::default());
    }

    /// Find a shard for `trx` in the open cycle.
    ///
    /// Returns the index of the first empty shard, or `shards.len()` when a
    /// fresh shard is needed (the caller opens it), or `None` when the
    /// transaction conflicts with scopes already placed — close the cycle
    /// and schedule into the next one.
    pub fn schedule(&self, trx: &Transaction) -> Option<usize> {
        if self.shards.iter().any(|shard| shard.conflicts_with(trx)) {
            return None;
        }
        match self.shards.iter().position(|shard| shard.is_empty()) {
            Some(empty) => Some(empty),
            None => Some(self.shards.len()),
        }
    }

    /// Record the scopes of a transaction placed into `shard`.
    pub fn occupy(&mut self, shard: usize, trx: &Transaction) {
        while self.shards.len() <= shard {
            self.start_shard();
        }
        let scopes = &mut self.shards[shard];
        scopes.read.extend(trx.read_scope.iter().cloned());
        scopes.write.extend(trx.write_scope.iter().cloned());
    }
}

/// Everything the controller tracks between starting a pending block and
/// moving it out (or clearing it).
pub struct PendingState {
    pub block: SignedBlock,
    pub block_trace: BlockTrace,
    pub session: Session,
    pub cycle: CycleScheduler,
    pub cycle_trace: CycleTrace,
    /// Accumulated serialized size of the scheduled input transactions.
    pub block_size: u64,
}
