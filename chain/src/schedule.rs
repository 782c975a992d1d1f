//! Producer schedules and slot arithmetic.
//!
//! A schedule is a fixed-length, versioned list of producers. Slots map to
//! producers round-robin in bursts of `PRODUCER_REPETITIONS`; the schedule
//! itself may only change at round boundaries, and a changed schedule only
//! becomes active once irreversibility passes the block that announced it.

use cascade_types::params::{
    ACTIVE_PRODUCER_COUNT, BLOCKS_PER_ROUND, PRODUCER_REPETITIONS,
};
use cascade_types::{AccountName, PublicKey};
use serde::{Deserialize, Serialize};

/// Round boundaries are where `new_producers` may appear and where the
/// pending schedule bookkeeping runs.
pub fn is_start_of_round(block_num: u32) -> bool {
    block_num % BLOCKS_PER_ROUND == 0
}

/// One slot of a producer schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerKey {
    pub producer_name: AccountName,
    pub block_signing_key: PublicKey,
}

/// A versioned producer schedule. `producers` always has exactly
/// [`ACTIVE_PRODUCER_COUNT`] entries; a chain with fewer distinct
/// producers fills the remaining slots by cycling.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProducerSchedule {
    pub version: u32,
    pub producers: Vec<ProducerKey>,
}

impl ProducerSchedule {
    /// Build the version-0 schedule from the genesis producer list,
    /// cycling to fill all slots.
    pub fn from_genesis(initial: &[(AccountName, PublicKey)]) -> Self {
        let producers = fill_schedule(
            initial
                .iter()
                .map(|(name, key)| ProducerKey {
                    producer_name: name.clone(),
                    block_signing_key: *key,
                })
                .collect(),
        );
        Self { version: 0, producers }
    }

    /// The producer for a given absolute slot, if the schedule is
    /// non-empty.
    pub fn producer_for_slot(&self, absolute_slot: u64) -> Option<&ProducerKey> {
        let index = scheduled_index(absolute_slot);
        self.producers.get(index % self.producers.len().max(1))
    }
}

/// Index into the schedule for an absolute slot: consecutive bursts of
/// `PRODUCER_REPETITIONS` slots per producer, wrapping every round.
pub fn scheduled_index(absolute_slot: u64) -> usize {
    ((absolute_slot % BLOCKS_PER_ROUND as u64) / PRODUCER_REPETITIONS as u64) as usize
}

/// Cycle a non-empty producer list to exactly `ACTIVE_PRODUCER_COUNT`
/// entries (truncating an over-long one).
pub fn fill_schedule(mut producers: Vec<ProducerKey>) -> Vec<ProducerKey> {
    if producers.is_empty() {
        return producers;
    }
    let mut i = 0;
    while producers.len() < ACTIVE_PRODUCER_COUNT {
        let next = producers[i % producers.len()].clone();
        producers.push(next);
        i += 1;
    }
    producers.truncate(ACTIVE_PRODUCER_COUNT);
    producers
}

/// Pick the top producers by vote for the next schedule: candidates sorted
/// by descending vote (name ascending as the tiebreak), producers with a
/// null signing key excluded, the result cycled to full length.
pub fn top_producers_by_vote(
    mut candidates: Vec<(AccountName, PublicKey, u128)>,
) -> Vec<ProducerKey> {
    candidates.retain(|(_, key, _)| !key.is_null());
    candidates.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    candidates.truncate(ACTIVE_PRODUCER_COUNT);
    fill_schedule(
        candidates
            .into_iter()
            .map(|(name, key, _)| ProducerKey {
                producer_name: name,
                block_signing_key: key,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> AccountName {
        AccountName::new(s)
    }

    fn key(n: u8) -> PublicKey {
        PublicKey([n; 32])
    }

    #[test]
    fn round_boundaries() {
        assert!(is_start_of_round(0));
        assert!(is_start_of_round(BLOCKS_PER_ROUND));
        assert!(!is_start_of_round(1));
        assert!(!is_start_of_round(BLOCKS_PER_ROUND + 1));
    }

    #[test]
    fn genesis_schedule_cycles_to_full_length() {
        let schedule =
            ProducerSchedule::from_genesis(&[(name("alpha"), key(1)), (name("bravo"), key(2))]);
        assert_eq!(schedule.producers.len(), ACTIVE_PRODUCER_COUNT);
        assert_eq!(schedule.producers[0].producer_name, name("alpha"));
        assert_eq!(schedule.producers[1].producer_name, name("bravo"));
        assert_eq!(schedule.producers[2].producer_name, name("alpha"));
        assert_eq!(schedule.version, 0);
    }

    #[test]
    fn scheduled_index_bursts_and_wraps() {
        assert_eq!(scheduled_index(0), 0);
        assert_eq!(
            scheduled_index(PRODUCER_REPETITIONS as u64),
            1,
            "next producer after one burst"
        );
        assert_eq!(scheduled_index(BLOCKS_PER_ROUND as u64), 0, "wraps each round");
    }

    #[test]
    fn top_producers_sorted_by_vote_then_name() {
        let producers = top_producers_by_vote(vec![
            (name("charlie"), key(3), 10),
            (name("alpha"), key(1), 50),
            (name("bravo"), key(2), 50),
        ]);
        assert_eq!(producers[0].producer_name, name("alpha"));
        assert_eq!(producers[1].producer_name, name("bravo"));
        assert_eq!(producers[2].producer_name, name("charlie"));
        assert_eq!(producers.len(), ACTIVE_PRODUCER_COUNT);
    }

    #[test]
    fn null_keys_are_excluded() {
        let producers = top_producers_by_vote(vec![
            (name("alpha"), PublicKey::NULL, 100),
            (name("bravo"), key(2), 1),
        ]);
        assert!(producers.iter().all(|p| p.producer_name == name("bravo")));
    }

    #[test]
    fn empty_candidates_give_empty_schedule() {
        assert!(top_producers_by_vote(Vec::new()).is_empty());
    }
}
