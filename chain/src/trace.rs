//! Execution traces.
//!
//! Applying a block (or building a pending one) produces a trace tree that
//! mirrors the block's structure: block → region → cycle → shard →
//! transaction → action. Shard roots are merkle roots over their
//! transaction trace digests; the block's action merkle root folds every
//! shard root in order.

use crate::block::TransactionStatus;
use crate::transaction::{Action, Transaction};
use cascade_crypto::{digest, merkle_root};
use cascade_types::{AccountName, Digest, TimePoint, TransactionId};
use serde::{Deserialize, Serialize};

/// The result of delivering one action to its handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTrace {
    pub receiver: AccountName,
    pub act: Action,
    /// Console output captured from the handler (diagnostics only; not part
    /// of consensus digests).
    pub console: String,
    pub region_id: u16,
    pub cycle_index: u32,
}

impl ActionTrace {
    /// Digest over the consensus-relevant fields.
    pub fn digest(&self) -> Digest {
        let mut buffer = Vec::with_capacity(128);
        buffer.extend_from_slice(&(self.receiver.as_str().len() as u32).to_be_bytes());
        buffer.extend_from_slice(self.receiver.as_str().as_bytes());
        buffer.extend_from_slice(self.act.scope.as_str().as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(self.act.name.as_str().as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(&(self.act.payload.len() as u32).to_be_bytes());
        buffer.extend_from_slice(&self.act.payload);
        buffer.extend_from_slice(&self.region_id.to_be_bytes());
        buffer.extend_from_slice(&self.cycle_index.to_be_bytes());
        digest(&buffer)
    }
}

/// A transaction generated during execution for later dispatch. Recorded
/// into the store but never executed by this revision of the controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTransaction {
    pub sender: AccountName,
    pub sender_id: u64,
    pub execute_after: TimePoint,
    pub expiration: TimePoint,
    pub transaction: Transaction,
}

impl DeferredTransaction {
    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }
}

/// The result of applying one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTrace {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub action_traces: Vec<ActionTrace>,
    pub deferred_transactions: Vec<DeferredTransaction>,
}

impl TransactionTrace {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            status: TransactionStatus::Executed,
            action_traces: Vec::new(),
            deferred_transactions: Vec::new(),
        }
    }

    pub fn digest(&self) -> Digest {
        let mut buffer = Vec::with_capacity(64 + 32 * self.action_traces.len());
        buffer.extend_from_slice(self.id.as_bytes());
        buffer.push(match self.status {
            TransactionStatus::Executed => 0,
            TransactionStatus::SoftFail => 1,
            TransactionStatus::HardFail => 2,
            TransactionStatus::Delayed => 3,
        });
        for at in &self.action_traces {
            buffer.extend_from_slice(at.digest().as_bytes());
        }
        digest(&buffer)
    }
}

/// Traces of one shard, plus the shard's merkle root once finalized.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardTrace {
    pub transaction_traces: Vec<TransactionTrace>,
    pub shard_root: Digest,
}

impl ShardTrace {
    pub fn append(&mut self, trace: TransactionTrace) {
        self.transaction_traces.push(trace);
    }

    /// Merkle root over the transaction trace digests, in order.
    pub fn calculate_root(&mut self) {
        let leaves: Vec<Digest> = self
            .transaction_traces
            .iter()
            .map(|t| t.digest())
            .collect();
        self.shard_root = merkle_root(&leaves);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleTrace {
    pub shard_traces: Vec<ShardTrace>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionTrace {
    pub cycle_traces: Vec<CycleTrace>,
}

/// The full trace of one applied (or generated) block.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockTrace {
    pub region_traces: Vec<RegionTrace>,
}

impl BlockTrace {
    /// Fold every shard root, in region → cycle → shard order.
    pub fn calculate_action_merkle_root(&self) -> Digest {
        let mut roots = Vec::new();
        for region in &self.region_traces {
            for cycle in &region.cycle_traces {
                for shard in &cycle.shard_traces {
                    roots.push(shard.shard_root);
                }
            }
        }
        merkle_root(&roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_with(id_byte: u8) -> TransactionTrace {
        TransactionTrace::new(TransactionId::new(Digest::new([id_byte; 32])))
    }

    #[test]
    fn shard_root_depends_on_order() {
        let mut a = ShardTrace::default();
        a.append(trace_with(1));
        a.append(trace_with(2));
        a.calculate_root();

        let mut b = ShardTrace::default();
        b.append(trace_with(2));
        b.append(trace_with(1));
        b.calculate_root();

        assert_ne!(a.shard_root, b.shard_root);
    }

    #[test]
    fn empty_trace_has_zero_action_root() {
        assert_eq!(BlockTrace::default().calculate_action_merkle_root(), Digest::ZERO);
    }

    #[test]
    fn action_root_covers_all_shards() {
        let mut shard_a = ShardTrace::default();
        shard_a.append(trace_with(1));
        shard_a.calculate_root();
        let mut shard_b = ShardTrace::default();
        shard_b.append(trace_with(2));
        shard_b.calculate_root();

        let one = BlockTrace {
            region_traces: vec![RegionTrace {
                cycle_traces: vec![CycleTrace { shard_traces: vec![shard_a.clone()] }],
            }],
        };
        let two = BlockTrace {
            region_traces: vec![RegionTrace {
                cycle_traces: vec![CycleTrace {
                    shard_traces: vec![shard_a, shard_b],
                }],
            }],
        };
        assert_ne!(
            one.calculate_action_merkle_root(),
            two.calculate_action_merkle_root()
        );
    }

    #[test]
    fn console_output_is_not_consensus() {
        let mut a = ActionTrace {
            receiver: AccountName::new("alice"),
            act: Action {
                scope: AccountName::new("alice"),
                name: cascade_types::ActionName::new("noop"),
                authorization: Vec::new(),
                payload: Vec::new(),
            },
            console: String::new(),
            region_id: 0,
            cycle_index: 0,
        };
        let d1 = a.digest();
        a.console = "debug output".into();
        assert_eq!(a.digest(), d1);
    }
}
