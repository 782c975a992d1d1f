//! Signed blocks and their region / cycle / shard summary structure.
//!
//! A block's body is a list of regions; each region holds an ordered list
//! of cycles; each cycle an ordered list of shards; each shard an ordered
//! list of transaction receipts. Receipts with status `Executed` point at
//! entries of `input_transactions`; the other statuses reserve slots for
//! deferred and failed transactions.

use crate::schedule::ProducerSchedule;
use cascade_crypto::{digest, merkle_root, sign_digest, verify_digest};
use cascade_types::{
    AccountName, BlockId, BlockTimestamp, Digest, PrivateKey, PublicKey, Signature, TransactionId,
};
use crate::transaction::SignedTransaction;
use serde::{Deserialize, Serialize};

/// Outcome class recorded for a transaction slot in a shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Succeeded; the transaction is present in `input_transactions`.
    Executed,
    /// Failed but charged; the slot is a placeholder.
    SoftFail,
    /// Failed without effect.
    HardFail,
    /// A scheduled deferred transaction (not yet supported by the applier).
    Delayed,
}

/// One slot of a shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub id: TransactionId,
    pub status: TransactionStatus,
}

impl TransactionReceipt {
    pub fn executed(id: TransactionId) -> Self {
        Self { id, status: TransactionStatus::Executed }
    }
}

/// A shard: receipts whose transactions conflict with no other shard of
/// the same cycle.
pub type Shard = Vec<TransactionReceipt>;

/// A cycle: shards that execute as if in parallel.
pub type Cycle = Vec<Shard>;

/// The top-level partition of a block. Region ids are strictly increasing
/// within one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub region: u16,
    pub cycles_summary: Vec<Cycle>,
}

impl Region {
    pub fn new(region: u16) -> Self {
        Self { region, cycles_summary: Vec::new() }
    }
}

/// The signed block header. The block id is the digest of these fields
/// with the block number spliced in; the producer signature is over the
/// same digest.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous: BlockId,
    pub timestamp: BlockTimestamp,
    pub producer: AccountName,
    /// Root of the incremental merkle over all prior block ids.
    pub block_mroot: Digest,
    /// Root over the input transaction ids.
    pub transaction_mroot: Digest,
    /// Root over the executed shard roots.
    pub action_mroot: Digest,
    /// Only present at round boundaries, when the schedule changes.
    pub new_producers: Option<ProducerSchedule>,
}

fn put_str(buffer: &mut Vec<u8>, s: &str) {
    buffer.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buffer.extend_from_slice(s.as_bytes());
}

impl BlockHeader {
    pub fn block_num(&self) -> u32 {
        self.previous.block_num() + 1
    }

    /// Canonical digest of the header (signature excluded).
    pub fn digest(&self) -> Digest {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(self.previous.as_bytes());
        buffer.extend_from_slice(&self.timestamp.slot().to_be_bytes());
        put_str(&mut buffer, self.producer.as_str());
        buffer.extend_from_slice(self.block_mroot.as_bytes());
        buffer.extend_from_slice(self.transaction_mroot.as_bytes());
        buffer.extend_from_slice(self.action_mroot.as_bytes());
        match &self.new_producers {
            None => buffer.push(0),
            Some(schedule) => {
                buffer.push(1);
                buffer.extend_from_slice(&schedule.version.to_be_bytes());
                buffer.extend_from_slice(&(schedule.producers.len() as u32).to_be_bytes());
                for producer in &schedule.producers {
                    put_str(&mut buffer, producer.producer_name.as_str());
                    buffer.extend_from_slice(producer.block_signing_key.as_bytes());
                }
            }
        }
        digest(&buffer)
    }

    pub fn id(&self) -> BlockId {
        BlockId::new(self.digest(), self.block_num())
    }
}

/// A full signed block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub regions: Vec<Region>,
    pub input_transactions: Vec<SignedTransaction>,
    pub producer_signature: Signature,
}

impl Default for SignedBlock {
    fn default() -> Self {
        Self {
            header: BlockHeader::default(),
            regions: Vec::new(),
            input_transactions: Vec::new(),
            producer_signature: Signature::NULL,
        }
    }
}

impl SignedBlock {
    pub fn block_num(&self) -> u32 {
        self.header.block_num()
    }

    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    pub fn sign(&mut self, key: &PrivateKey) {
        self.producer_signature = sign_digest(&self.header.digest(), key);
    }

    /// Whether the producer signature was made by `key`.
    pub fn validate_signee(&self, key: &PublicKey) -> bool {
        verify_digest(&self.header.digest(), &self.producer_signature, key)
    }

    /// Root over the ids of `input_transactions`, in order.
    pub fn calculate_transaction_merkle_root(&self) -> Digest {
        let leaves: Vec<Digest> = self
            .input_transactions
            .iter()
            .map(|trx| trx.id().0)
            .collect();
        merkle_root(&leaves)
    }

    /// Serialized size in bytes, fed to the average-block-size accumulator
    /// and the pending-block size limit.
    pub fn serialized_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_crypto::keypair_from_seed;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            previous: BlockId::new(Digest::new([1u8; 32]), 41),
            timestamp: BlockTimestamp::from_slot(1234),
            producer: AccountName::new("alpha"),
            block_mroot: Digest::new([2u8; 32]),
            transaction_mroot: Digest::new([3u8; 32]),
            action_mroot: Digest::new([4u8; 32]),
            new_producers: None,
        }
    }

    #[test]
    fn id_embeds_successor_number() {
        let header = sample_header();
        assert_eq!(header.block_num(), 42);
        assert_eq!(header.id().block_num(), 42);
    }

    #[test]
    fn digest_covers_every_field() {
        let base = sample_header();
        let mut changed = base.clone();
        changed.timestamp = BlockTimestamp::from_slot(1235);
        assert_ne!(base.digest(), changed.digest());

        let mut changed = base.clone();
        changed.producer = AccountName::new("bravo");
        assert_ne!(base.digest(), changed.digest());

        let mut changed = base.clone();
        changed.new_producers = Some(ProducerSchedule::default());
        assert_ne!(base.digest(), changed.digest());
    }

    #[test]
    fn sign_and_validate() {
        let kp = keypair_from_seed(&[5u8; 32]);
        let mut block = SignedBlock { header: sample_header(), ..Default::default() };
        block.sign(&kp.private);
        assert!(block.validate_signee(&kp.public));

        let other = keypair_from_seed(&[6u8; 32]);
        assert!(!block.validate_signee(&other.public));
    }

    #[test]
    fn transaction_merkle_root_of_empty_block_is_zero() {
        let block = SignedBlock::default();
        assert_eq!(block.calculate_transaction_merkle_root(), Digest::ZERO);
    }
}
