//! State objects held in the object database.
//!
//! Every type here implements [`StateObject`] with its unique secondary
//! key; [`register_indexes`] installs the full set at controller
//! construction, fixing the deterministic table order for sessions.

use crate::authority::Authority;
use crate::schedule::ProducerSchedule;
use cascade_crypto::IncrementalMerkle;
use cascade_store::{StateObject, Store, StoreError};
use cascade_types::params::USAGE_AVERAGE_WINDOW_MS;
use cascade_types::{
    AccountName, ActionName, BlockId, BlockTimestamp, PermissionName, PublicKey, TableName,
    TimePoint, TransactionId,
};
use serde::{Deserialize, Serialize};

/// A linearly decaying usage average (bandwidth bytes, block sizes).
/// Usage decays to zero over [`USAGE_AVERAGE_WINDOW_MS`].
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AverageAccumulator {
    pub last_update: BlockTimestamp,
    pub value: u64,
}

impl AverageAccumulator {
    pub fn add_usage(&mut self, units: u64, now: BlockTimestamp) {
        let elapsed_ms = now.slots_since(self.last_update) as u64
            * cascade_types::params::BLOCK_INTERVAL_MS;
        if elapsed_ms >= USAGE_AVERAGE_WINDOW_MS {
            self.value = 0;
        } else {
            let retained = USAGE_AVERAGE_WINDOW_MS - elapsed_ms;
            self.value =
                ((self.value as u128 * retained as u128) / USAGE_AVERAGE_WINDOW_MS as u128) as u64;
        }
        self.value = self.value.saturating_add(units);
        self.last_update = now;
    }
}

/// An account known to the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountObject {
    pub id: u64,
    pub name: AccountName,
    pub creation_date: BlockTimestamp,
}

impl StateObject for AccountObject {
    type Key = AccountName;
    const TABLE: &'static str = "accounts";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> AccountName {
        self.name.clone()
    }
}

/// A node of an account's permission tree. `parent` is the primary id of
/// the parent permission (`None` for the root, i.e. `owner`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionObject {
    pub id: u64,
    pub parent: Option<u64>,
    pub owner: AccountName,
    pub name: PermissionName,
    pub auth: Authority,
}

impl PermissionObject {
    /// Whether this permission is at least as strong as `other`: the same
    /// permission, or an ancestor of it in the owner's tree.
    pub fn satisfies(&self, other: &PermissionObject, store: &Store) -> bool {
        if self.owner != other.owner {
            return false;
        }
        let mut current = Some(other.id);
        while let Some(id) = current {
            if id == self.id {
                return true;
            }
            current = store
                .find_by_id::<PermissionObject>(id)
                .and_then(|p| p.parent);
        }
        false
    }
}

impl StateObject for PermissionObject {
    type Key = (AccountName, PermissionName);
    const TABLE: &'static str = "permissions";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (AccountName, PermissionName) {
        (self.owner.clone(), self.name.clone())
    }
}

/// Maps (account, contract, action) to the permission required to
/// authorize that action. The empty action name is the contract-wide
/// default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLinkObject {
    pub id: u64,
    pub account: AccountName,
    pub code: AccountName,
    pub message_type: ActionName,
    pub required_permission: PermissionName,
}

impl StateObject for PermissionLinkObject {
    type Key = (AccountName, AccountName, ActionName);
    const TABLE: &'static str = "permission_links";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (AccountName, AccountName, ActionName) {
        (self.account.clone(), self.code.clone(), self.message_type.clone())
    }
}

/// A block producer and its signing statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerObject {
    pub id: u64,
    pub owner: AccountName,
    pub signing_key: PublicKey,
    pub total_missed: u32,
    /// Absolute slot of the last block this producer signed.
    pub last_aslot: u64,
    /// Number of the last block this producer signed; irreversibility is
    /// derived from the distribution of these.
    pub last_confirmed_block_num: u32,
    pub total_votes: u128,
}

impl StateObject for ProducerObject {
    type Key = AccountName;
    const TABLE: &'static str = "producers";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> AccountName {
        self.owner.clone()
    }
}

/// Per-round chain state: configuration, the active schedule, and the
/// pending schedules awaiting irreversibility.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalPropertyObject {
    pub id: u64,
    pub configuration: crate::config::ChainConfiguration,
    pub active_producers: ProducerSchedule,
    /// `(announcing block number, schedule)`, in announcement order.
    pub pending_active_producers: Vec<(u32, ProducerSchedule)>,
}

impl StateObject for GlobalPropertyObject {
    type Key = ();
    const TABLE: &'static str = "global_properties";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) {}
}

/// Per-block chain state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicGlobalPropertyObject {
    pub id: u64,
    pub head_block_number: u32,
    pub head_block_id: BlockId,
    pub time: BlockTimestamp,
    pub current_producer: AccountName,
    pub current_absolute_slot: u64,
    /// Participation bitmap; bit 0 is the most recent slot, set iff filled.
    pub recent_slots_filled: u64,
    pub last_irreversible_block_num: u32,
    pub block_merkle_root: IncrementalMerkle,
    pub average_block_size: AverageAccumulator,
}

impl StateObject for DynamicGlobalPropertyObject {
    type Key = ();
    const TABLE: &'static str = "dynamic_global_properties";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) {}
}

/// One slot of the 65,536-entry TaPoS ring: the most recent block id at
/// `block_num mod 2^16`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummaryObject {
    pub id: u64,
    pub block_id: BlockId,
}

impl StateObject for BlockSummaryObject {
    type Key = u64;
    const TABLE: &'static str = "block_summaries";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> u64 {
        self.id
    }
}

/// Dedup record for an accepted transaction, kept until expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionObject {
    pub id: u64,
    pub trx_id: TransactionId,
    pub expiration: TimePoint,
}

impl StateObject for TransactionObject {
    type Key = TransactionId;
    const TABLE: &'static str = "transactions";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> TransactionId {
        self.trx_id
    }
}

/// A deferred transaction generated during execution; recorded, never yet
/// dispatched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTransactionObject {
    pub id: u64,
    pub trx_id: TransactionId,
    pub sender: AccountName,
    pub sender_id: u64,
    pub expiration: TimePoint,
    pub delay_until: TimePoint,
    pub packed_trx: Vec<u8>,
}

impl StateObject for GeneratedTransactionObject {
    type Key = TransactionId;
    const TABLE: &'static str = "generated_transactions";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> TransactionId {
        self.trx_id
    }
}

/// Decaying bandwidth usage per account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthUsageObject {
    pub id: u64,
    pub owner: AccountName,
    pub bytes: AverageAccumulator,
}

impl StateObject for BandwidthUsageObject {
    type Key = AccountName;
    const TABLE: &'static str = "bandwidth_usage";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> AccountName {
        self.owner.clone()
    }
}

/// Decaying compute usage per account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUsageObject {
    pub id: u64,
    pub owner: AccountName,
    pub units: AverageAccumulator,
}

impl StateObject for ComputeUsageObject {
    type Key = AccountName;
    const TABLE: &'static str = "compute_usage";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> AccountName {
        self.owner.clone()
    }
}

/// Tokens staked by an account, the basis of its bandwidth allowance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedBalanceObject {
    pub id: u64,
    pub owner: AccountName,
    pub staked_balance: u64,
}

impl StateObject for StakedBalanceObject {
    type Key = AccountName;
    const TABLE: &'static str = "staked_balances";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> AccountName {
        self.owner.clone()
    }
}

/// Per-scope action sequence counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSequenceObject {
    pub id: u64,
    pub scope: AccountName,
    pub sequence: u64,
}

impl StateObject for ScopeSequenceObject {
    type Key = AccountName;
    const TABLE: &'static str = "scope_sequences";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> AccountName {
        self.scope.clone()
    }
}

// ── Contract tables ─────────────────────────────────────────────────────
//
// Four key layouts, written by apply handlers through the context. The
// controller itself only registers them.

/// u64-keyed contract rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueObject {
    pub id: u64,
    pub scope: AccountName,
    pub code: AccountName,
    pub table: TableName,
    pub primary_key: u64,
    pub value: Vec<u8>,
}

impl StateObject for KeyValueObject {
    type Key = (AccountName, AccountName, TableName, u64);
    const TABLE: &'static str = "key_value";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (AccountName, AccountName, TableName, u64) {
        (self.scope.clone(), self.code.clone(), self.table.clone(), self.primary_key)
    }
}

/// String-keyed contract rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStrValueObject {
    pub id: u64,
    pub scope: AccountName,
    pub code: AccountName,
    pub table: TableName,
    pub primary_key: String,
    pub value: Vec<u8>,
}

impl StateObject for KeyStrValueObject {
    type Key = (AccountName, AccountName, TableName, String);
    const TABLE: &'static str = "keystr_value";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (AccountName, AccountName, TableName, String) {
        (
            self.scope.clone(),
            self.code.clone(),
            self.table.clone(),
            self.primary_key.clone(),
        )
    }
}

/// 128×128-keyed contract rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key128x128ValueObject {
    pub id: u64,
    pub scope: AccountName,
    pub code: AccountName,
    pub table: TableName,
    pub primary_key: u128,
    pub secondary_key: u128,
    pub value: Vec<u8>,
}

impl StateObject for Key128x128ValueObject {
    type Key = (AccountName, AccountName, TableName, u128, u128);
    const TABLE: &'static str = "key128x128_value";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (AccountName, AccountName, TableName, u128, u128) {
        (
            self.scope.clone(),
            self.code.clone(),
            self.table.clone(),
            self.primary_key,
            self.secondary_key,
        )
    }
}

/// 64×64×64-keyed contract rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key64x64x64ValueObject {
    pub id: u64,
    pub scope: AccountName,
    pub code: AccountName,
    pub table: TableName,
    pub primary_key: u64,
    pub secondary_key: u64,
    pub tertiary_key: u64,
    pub value: Vec<u8>,
}

impl StateObject for Key64x64x64ValueObject {
    type Key = (AccountName, AccountName, TableName, u64, u64, u64);
    const TABLE: &'static str = "key64x64x64_value";

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> (AccountName, AccountName, TableName, u64, u64, u64) {
        (
            self.scope.clone(),
            self.code.clone(),
            self.table.clone(),
            self.primary_key,
            self.secondary_key,
            self.tertiary_key,
        )
    }
}

/// Register every table the controller uses, in deterministic order.
pub fn register_indexes(store: &mut Store) -> Result<(), StoreError> {
    store.register_table::<AccountObject>()?;
    store.register_table::<PermissionObject>()?;
    store.register_table::<PermissionLinkObject>()?;
    store.register_table::<KeyValueObject>()?;
    store.register_table::<KeyStrValueObject>()?;
    store.register_table::<Key128x128ValueObject>()?;
    store.register_table::<Key64x64x64ValueObject>()?;
    store.register_table::<GlobalPropertyObject>()?;
    store.register_table::<DynamicGlobalPropertyObject>()?;
    store.register_table::<BlockSummaryObject>()?;
    store.register_table::<TransactionObject>()?;
    store.register_table::<GeneratedTransactionObject>()?;
    store.register_table::<ProducerObject>()?;
    store.register_table::<ScopeSequenceObject>()?;
    store.register_table::<BandwidthUsageObject>()?;
    store.register_table::<ComputeUsageObject>()?;
    store.register_table::<StakedBalanceObject>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_decays_over_window() {
        let mut acc = AverageAccumulator::default();
        acc.add_usage(1000, BlockTimestamp::from_slot(0));
        assert_eq!(acc.value, 1000);

        // half the window later, half the value remains (plus new usage)
        let half_window_slots =
            (USAGE_AVERAGE_WINDOW_MS / cascade_types::params::BLOCK_INTERVAL_MS / 2) as u32;
        acc.add_usage(0, BlockTimestamp::from_slot(half_window_slots));
        assert_eq!(acc.value, 500);

        // a full window later everything has decayed
        acc.add_usage(0, BlockTimestamp::from_slot(half_window_slots * 3));
        assert_eq!(acc.value, 0);
    }

    #[test]
    fn accumulator_accumulates_within_slot() {
        let now = BlockTimestamp::from_slot(10);
        let mut acc = AverageAccumulator::default();
        acc.add_usage(100, now);
        acc.add_usage(50, now);
        assert_eq!(acc.value, 150);
    }

    #[test]
    fn re_registration_fails() {
        let mut store = Store::new();
        register_indexes(&mut store).unwrap();
        assert!(register_indexes(&mut store).is_err());
    }

    #[test]
    fn permission_satisfies_walks_ancestors() {
        let mut store = Store::new();
        register_indexes(&mut store).unwrap();

        let owner = store
            .create(|id| PermissionObject {
                id,
                parent: None,
                owner: AccountName::new("alice"),
                name: PermissionName::new("owner"),
                auth: Authority::default(),
            })
            .unwrap();
        let owner_id = owner.id;
        let active = store
            .create(|id| PermissionObject {
                id,
                parent: Some(owner_id),
                owner: AccountName::new("alice"),
                name: PermissionName::new("active"),
                auth: Authority::default(),
            })
            .unwrap();

        assert!(owner.satisfies(&active, &store));
        assert!(active.satisfies(&active, &store));
        assert!(!active.satisfies(&owner, &store));
    }

    #[test]
    fn permission_of_other_account_never_satisfies() {
        let mut store = Store::new();
        register_indexes(&mut store).unwrap();

        let alice = store
            .create(|id| PermissionObject {
                id,
                parent: None,
                owner: AccountName::new("alice"),
                name: PermissionName::new("owner"),
                auth: Authority::default(),
            })
            .unwrap();
        let bob = store
            .create(|id| PermissionObject {
                id,
                parent: None,
                owner: AccountName::new("bob"),
                name: PermissionName::new("owner"),
                auth: Authority::default(),
            })
            .unwrap();
        assert!(!alice.satisfies(&bob, &store));
    }
}
