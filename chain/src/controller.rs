//! The chain controller: a deterministic state machine that ingests signed
//! blocks and transactions, applies them against the versioned object
//! store, maintains the fork database, resolves the canonical chain, and
//! flushes irreversible blocks to the block log.
//!
//! All mutating entry points run under the object database's write lock
//! for their full duration; rollback is done exclusively through nested
//! undo sessions. The controller holds at most three levels of session:
//! the per-block session opened by `push_block`, the pending-block session,
//! and the per-transaction session inside `push_transaction`.

use crate::apply_context::{ApplyContext, ApplyHandler, ApplyHandlerRegistry};
use crate::authority::{AccountWeight, Authority, AuthorityChecker};
use crate::block::{Region, SignedBlock, TransactionReceipt, TransactionStatus};
use crate::block_log::BlockLog;
use crate::config::{ControllerConfig, GenesisConfig};
use crate::error::ChainError;
use crate::fork_database::ForkDatabase;
use crate::objects::{
    register_indexes, AccountObject, BandwidthUsageObject, BlockSummaryObject,
    DynamicGlobalPropertyObject, GeneratedTransactionObject, GlobalPropertyObject,
    PermissionLinkObject, PermissionObject, ProducerObject, ScopeSequenceObject,
    StakedBalanceObject, TransactionObject,
};
use crate::pending::{CycleScheduler, PendingState};
use crate::schedule::{
    is_start_of_round, scheduled_index, top_producers_by_vote, ProducerSchedule,
};
use crate::signal::Signal;
use crate::skip::SkipFlags;
use crate::trace::{ActionTrace, BlockTrace, CycleTrace, RegionTrace, ShardTrace, TransactionTrace};
use crate::transaction::{Action, PermissionLevel, SignedTransaction, Transaction};
use cascade_crypto::public_from_private;
use cascade_store::{ObjectDb, Store};
use cascade_types::params::{
    active_permission, all_scope, auth_scope, owner_permission, producers_account,
    system_account, BANDWIDTH_BYTES_PER_STAKED_TOKEN, BLOCK_SUMMARY_CAPACITY,
    FIXED_BANDWIDTH_OVERHEAD_PER_TRANSACTION, IRREVERSIBLE_THRESHOLD_PERCENT, PERCENT_100,
    PRODUCERS_AUTHORITY_THRESHOLD,
};
use cascade_types::{
    AccountName, ActionName, BlockId, BlockTimestamp, Digest, PrivateKey, PublicKey,
    TransactionId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

/// Skip mask used while replaying the block log: the log is the
/// controller's own prior output, so only structural checks remain.
fn replay_skip() -> SkipFlags {
    SkipFlags::PRODUCER_SIGNATURE
        | SkipFlags::TRANSACTION_SIGNATURES
        | SkipFlags::TRANSACTION_DUPE_CHECK
        | SkipFlags::TAPOS_CHECK
        | SkipFlags::PRODUCER_SCHEDULE_CHECK
        | SkipFlags::AUTHORITY_CHECK
        | SkipFlags::RECEIVED_BLOCK
}

/// Placement of a transaction inside a block being applied or built.
struct TransactionMetadata<'a> {
    trx: &'a SignedTransaction,
    id: TransactionId,
    region: u16,
    cycle_index: u32,
}

/// Synchronous event hooks. Subscribers run on the writer thread and must
/// not reenter the controller.
#[derive(Default)]
pub struct ControllerSignals {
    pub applied_block: Signal<BlockTrace>,
    pub applied_irreversible_block: Signal<SignedBlock>,
    pub on_pending_transaction: Signal<SignedTransaction>,
}

pub struct Controller {
    db: ObjectDb,
    fork_db: ForkDatabase,
    block_log: BlockLog,
    pending: Option<PendingState>,
    skip_flags: SkipFlags,
    replaying: bool,
    read_only: bool,
    enforce_bandwidth_limits: bool,
    prune_expired_transactions: bool,
    chain_id: Digest,
    checkpoints: BTreeMap<u32, BlockId>,
    apply_handlers: ApplyHandlerRegistry,
    signals: ControllerSignals,
}

impl Controller {
    /// Open the block log, initialize (or re-initialize) chain state, and
    /// replay any blocks the log holds beyond current state.
    pub fn new(config: ControllerConfig) -> Result<Self, ChainError> {
        let block_log = BlockLog::open(&config.block_log_dir)?;
        let chain_id = config.genesis.chain_id();

        let mut controller = Self {
            db: ObjectDb::new(),
            fork_db: ForkDatabase::new(),
            block_log,
            pending: None,
            skip_flags: SkipFlags::NONE,
            replaying: false,
            read_only: false,
            enforce_bandwidth_limits: config.enforce_bandwidth_limits,
            prune_expired_transactions: config.prune_expired_transactions,
            chain_id,
            checkpoints: BTreeMap::new(),
            apply_handlers: ApplyHandlerRegistry::new(),
            signals: ControllerSignals::default(),
        };

        let db = controller.db.clone();
        db.with_write_lock(|store| -> Result<(), ChainError> {
            register_indexes(store)?;
            controller.initialize_chain(store, &config.genesis)
        })?;

        // rewind to the last committed revision and check it lines up
        db.with_write_lock(|store| -> Result<(), ChainError> {
            store.undo_all();
            let head = Self::dynamic_properties(store)?.head_block_number;
            if store.revision() != head as i64 {
                return Err(ChainError::StateCorruption(format!(
                    "store revision {} does not match head block {}",
                    store.revision(),
                    head
                )));
            }
            Ok(())
        })?;

        controller.spinup_fork_db()?;

        let log_head = controller.block_log.read_head().map(|b| b.block_num());
        if let Some(log_head) = log_head {
            if controller.head_block_num() < log_head {
                controller.replay()?;
            }
        }

        controller.read_only = config.read_only;
        Ok(controller)
    }

    // ── Event and handler registration ──────────────────────────────────

    pub fn on_applied_block(&mut self, f: impl Fn(&BlockTrace) + Send + Sync + 'static) {
        self.signals.applied_block.connect(f);
    }

    pub fn on_applied_irreversible_block(
        &mut self,
        f: impl Fn(&SignedBlock) + Send + Sync + 'static,
    ) {
        self.signals.applied_irreversible_block.connect(f);
    }

    pub fn on_pending_transaction(
        &mut self,
        f: impl Fn(&SignedTransaction) + Send + Sync + 'static,
    ) {
        self.signals.on_pending_transaction.connect(f);
    }

    pub fn set_apply_handler(
        &mut self,
        receiver: AccountName,
        scope: AccountName,
        action: ActionName,
        handler: ApplyHandler,
    ) {
        self.apply_handlers.set_apply_handler(receiver, scope, action, handler);
    }

    // ── Public mutating operations ──────────────────────────────────────

    /// Push a received block. Returns `true` if a fork switch happened.
    pub fn push_block(&mut self, block: &SignedBlock, skip: SkipFlags) -> Result<bool, ChainError> {
        self.assert_writable()?;
        let db = self.db.clone();
        db.with_write_lock(|store| {
            self.clear_pending_locked(store);
            self.with_skip_flags(skip, |ctl| ctl.push_block_locked(store, block))
        })
    }

    /// Push a transaction into the pending block.
    pub fn push_transaction(
        &mut self,
        trx: &SignedTransaction,
        skip: SkipFlags,
    ) -> Result<TransactionTrace, ChainError> {
        self.assert_writable()?;
        let db = self.db.clone();
        db.with_write_lock(|store| {
            self.with_skip_flags(skip, |ctl| ctl.push_transaction_locked(store, trx))
        })
    }

    /// Produce a block at `when`, signed by `producer`.
    pub fn generate_block(
        &mut self,
        when: BlockTimestamp,
        producer: &AccountName,
        signing_key: &PrivateKey,
        skip: SkipFlags,
    ) -> Result<SignedBlock, ChainError> {
        self.assert_writable()?;
        let db = self.db.clone();
        db.with_write_lock(|store| {
            self.with_skip_flags(skip, |ctl| {
                ctl.generate_block_locked(store, when, producer, signing_key)
            })
        })
    }

    /// Remove the head block, reverting its changes.
    pub fn pop_block(&mut self) -> Result<(), ChainError> {
        self.assert_writable()?;
        let db = self.db.clone();
        db.with_write_lock(|store| self.pop_block_locked(store))
    }

    /// Discard any pending block and its session.
    pub fn clear_pending(&mut self) {
        let db = self.db.clone();
        db.with_write_lock(|store| self.clear_pending_locked(store));
    }

    /// Pin `(number, id)` checkpoints; verification below the last
    /// checkpoint is skipped entirely.
    pub fn add_checkpoints(&mut self, checkpoints: &BTreeMap<u32, BlockId>) {
        for (num, id) in checkpoints {
            self.checkpoints.insert(*num, *id);
        }
    }

    pub fn before_last_checkpoint(&self) -> bool {
        match self.checkpoints.iter().next_back() {
            Some((num, _)) => *num >= self.head_block_num(),
            None => false,
        }
    }

    // ── Public queries ──────────────────────────────────────────────────

    pub fn chain_id(&self) -> Digest {
        self.chain_id
    }

    pub fn head_block_num(&self) -> u32 {
        self.db.with_read_lock(|store| {
            Self::dynamic_properties(store)
                .map(|d| d.head_block_number)
                .unwrap_or(0)
        })
    }

    pub fn head_block_id(&self) -> BlockId {
        self.db.with_read_lock(|store| {
            Self::dynamic_properties(store)
                .map(|d| d.head_block_id)
                .unwrap_or(BlockId::ZERO)
        })
    }

    pub fn head_block_time(&self) -> BlockTimestamp {
        self.db.with_read_lock(|store| {
            Self::dynamic_properties(store)
                .map(|d| d.time)
                .unwrap_or(BlockTimestamp::EPOCH)
        })
    }

    pub fn head_block_producer(&self) -> Option<AccountName> {
        let head_id = self.head_block_id();
        self.fetch_block_by_id(&head_id)
            .ok()
            .flatten()
            .map(|b| b.header.producer)
    }

    pub fn last_irreversible_block_num(&self) -> u32 {
        self.db.with_read_lock(|store| {
            Self::dynamic_properties(store)
                .map(|d| d.last_irreversible_block_num)
                .unwrap_or(0)
        })
    }

    /// Filled fraction of the last 64 slots, in hundredths of a percent.
    pub fn producer_participation_rate(&self) -> u32 {
        self.db.with_read_lock(|store| {
            Self::dynamic_properties(store)
                .map(|d| {
                    (PERCENT_100 as u64 * d.recent_slots_filled.count_ones() as u64 / 64) as u32
                })
                .unwrap_or(0)
        })
    }

    pub fn get_global_properties(&self) -> Result<GlobalPropertyObject, ChainError> {
        self.db
            .with_read_lock(|store| Self::global_properties(store).cloned())
    }

    pub fn get_dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalPropertyObject, ChainError> {
        self.db
            .with_read_lock(|store| Self::dynamic_properties(store).cloned())
    }

    pub fn is_known_block(&self, id: &BlockId) -> bool {
        if self.fork_db.is_known_block(id) {
            return true;
        }
        matches!(self.block_log.read_block_by_id(id), Ok(Some(_)))
    }

    /// True only while the transaction's dedup record has not expired;
    /// query by block for anything older.
    pub fn is_known_transaction(&self, id: &TransactionId) -> bool {
        self.db
            .with_read_lock(|store| store.find::<TransactionObject>(id).is_some())
    }

    pub fn fetch_block_by_id(&self, id: &BlockId) -> Result<Option<SignedBlock>, ChainError> {
        if let Some(item) = self.fork_db.fetch_block(id) {
            return Ok(Some(item.data.clone()));
        }
        self.block_log.read_block_by_id(id)
    }

    pub fn fetch_block_by_number(&self, num: u32) -> Result<Option<SignedBlock>, ChainError> {
        self.db
            .with_read_lock(|store| self.fetch_block_by_number_locked(store, num))
    }

    pub fn get_block_id_for_num(&self, num: u32) -> Result<BlockId, ChainError> {
        self.fetch_block_by_number(num)?
            .map(|b| b.id())
            .ok_or_else(|| ChainError::UnknownBlock(format!("block number {num}")))
    }

    /// Ids from a fork head back to (and including) the common ancestor
    /// with the canonical chain.
    pub fn get_block_ids_on_fork(&self, head_of_fork: &BlockId) -> Result<Vec<BlockId>, ChainError> {
        let head_id = self.head_block_id();
        let (from_head, from_fork) = self.fork_db.fetch_branch_from(&head_id, head_of_fork)?;
        let mut result: Vec<BlockId> = from_fork.iter().map(|i| i.id).collect();
        let ancestor = from_head
            .last()
            .map(|i| i.previous_id())
            .or_else(|| from_fork.last().map(|i| i.previous_id()))
            .unwrap_or(head_id);
        result.push(ancestor);
        Ok(result)
    }

    pub fn get_slot_time(&self, slot_num: u32) -> BlockTimestamp {
        self.db
            .with_read_lock(|store| self.get_slot_time_locked(store, slot_num))
    }

    pub fn get_slot_at_time(&self, when: BlockTimestamp) -> u32 {
        self.db
            .with_read_lock(|store| self.get_slot_at_time_locked(store, when))
    }

    pub fn get_scheduled_producer(&self, slot_num: u32) -> Result<AccountName, ChainError> {
        self.db
            .with_read_lock(|store| self.get_scheduled_producer_locked(store, slot_num))
    }

    /// The subset of `candidate_keys` needed to satisfy every declared
    /// authority of `trx`.
    pub fn get_required_keys(
        &self,
        trx: &SignedTransaction,
        candidate_keys: &BTreeSet<PublicKey>,
    ) -> Result<BTreeSet<PublicKey>, ChainError> {
        self.db.with_read_lock(|store| {
            let max_depth = Self::global_properties(store)?
                .configuration
                .max_authority_depth;
            let lookup = |level: &PermissionLevel| {
                store
                    .find::<PermissionObject>(&(level.actor.clone(), level.permission.clone()))
                    .map(|p| p.auth.clone())
            };
            let mut checker = AuthorityChecker::new(
                lookup,
                max_depth,
                candidate_keys.clone(),
                BTreeSet::new(),
            );
            for act in &trx.transaction.actions {
                for declared in &act.authorization {
                    if !checker.satisfied(declared) {
                        return Err(ChainError::TxMissingSigs { auth: declared.to_string() });
                    }
                }
            }
            Ok(checker.used_keys().clone())
        })
    }

    /// Read-only access to the underlying state, for embedders and tests.
    pub fn read_state<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        self.db.with_read_lock(f)
    }

    // ── Scoped state helpers ────────────────────────────────────────────

    fn assert_writable(&self) -> Result<(), ChainError> {
        if self.read_only {
            return Err(ChainError::ReadOnly);
        }
        Ok(())
    }

    /// Assign `skip` for the duration of `f`, restoring the previous mask
    /// on every exit path. Assignment, not OR: nested overrides see only
    /// their own mask.
    fn with_skip_flags<R>(&mut self, skip: SkipFlags, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.skip_flags;
        self.skip_flags = skip;
        let result = f(self);
        self.skip_flags = previous;
        result
    }

    // ── Startup ─────────────────────────────────────────────────────────

    fn initialize_chain(
        &mut self,
        store: &mut Store,
        genesis: &GenesisConfig,
    ) -> Result<(), ChainError> {
        if store.find::<GlobalPropertyObject>(&()).is_some() {
            return Ok(());
        }
        if genesis.initial_producers.is_empty() {
            return Err(ChainError::Genesis("at least one initial producer required".into()));
        }
        if genesis.initial_timestamp == BlockTimestamp::EPOCH {
            return Err(ChainError::Genesis("genesis timestamp must be set".into()));
        }

        let producer_keys: Vec<(AccountName, PublicKey)> = genesis
            .initial_producers
            .iter()
            .map(|p| (p.name.clone(), p.signing_key))
            .collect();

        store.create(|id| GlobalPropertyObject {
            id,
            configuration: genesis.initial_configuration.clone(),
            active_producers: ProducerSchedule::from_genesis(&producer_keys),
            pending_active_producers: Vec::new(),
        })?;

        store.create(|id| DynamicGlobalPropertyObject {
            id,
            head_block_number: 0,
            head_block_id: BlockId::ZERO,
            time: genesis.initial_timestamp,
            current_producer: AccountName::default(),
            current_absolute_slot: 0,
            recent_slots_filled: u64::MAX,
            last_irreversible_block_num: 0,
            block_merkle_root: Default::default(),
            average_block_size: Default::default(),
        })?;

        for _ in 0..BLOCK_SUMMARY_CAPACITY {
            store.create(|id| BlockSummaryObject { id, block_id: BlockId::ZERO })?;
        }

        let when = genesis.initial_timestamp;
        Self::create_native_account(store, &system_account(), Authority::default(), when)?;
        Self::create_native_account(
            store,
            &producers_account(),
            Self::producers_authority(&ProducerSchedule::from_genesis(&producer_keys)),
            when,
        )?;

        for account in &genesis.initial_accounts {
            Self::create_account(
                store,
                &account.name,
                Authority::single_key(account.owner_key),
                Authority::single_key(account.active_key),
                account.staked_balance,
                when,
            )?;
        }

        for producer in &genesis.initial_producers {
            if store.find::<AccountObject>(&producer.name).is_none() {
                Self::create_account(
                    store,
                    &producer.name,
                    Authority::single_key(producer.signing_key),
                    Authority::single_key(producer.signing_key),
                    0,
                    when,
                )?;
            }
            store.create(|id| ProducerObject {
                id,
                owner: producer.name.clone(),
                signing_key: producer.signing_key,
                total_missed: 0,
                last_aslot: 0,
                last_confirmed_block_num: 0,
                total_votes: 0,
            })?;
        }

        let genesis_trx = SignedTransaction::new(Transaction {
            ref_block_num: 0,
            ref_block_prefix: 0,
            expiration: genesis.initial_timestamp.to_time_point(),
            read_scope: Vec::new(),
            write_scope: vec![all_scope()],
            actions: vec![Action {
                scope: system_account(),
                name: ActionName::new("init"),
                authorization: Vec::new(),
                payload: self.chain_id.as_bytes().to_vec(),
            }],
        });
        let meta = TransactionMetadata {
            trx: &genesis_trx,
            id: genesis_trx.id(),
            region: 0,
            cycle_index: 0,
        };
        info!("applying genesis transaction");
        let genesis_skip = SkipFlags::SCOPE_CHECK
            | SkipFlags::TRANSACTION_SIGNATURES
            | SkipFlags::AUTHORITY_CHECK
            | SkipFlags::RECEIVED_BLOCK;
        self.with_skip_flags(genesis_skip, |ctl| {
            ctl.apply_transaction_locked(store, &meta).map(|_| ())
        })
    }

    fn producers_authority(schedule: &ProducerSchedule) -> Authority {
        let mut seen = BTreeSet::new();
        let mut authority = Authority {
            threshold: PRODUCERS_AUTHORITY_THRESHOLD,
            keys: Vec::new(),
            accounts: Vec::new(),
        };
        for producer in &schedule.producers {
            // cycled schedules repeat names; count each producer once
            if seen.insert(producer.producer_name.clone()) {
                authority.accounts.push(AccountWeight {
                    permission: PermissionLevel {
                        actor: producer.producer_name.clone(),
                        permission: active_permission(),
                    },
                    weight: 1,
                });
            }
        }
        authority
    }

    fn create_native_account(
        store: &mut Store,
        name: &AccountName,
        active_auth: Authority,
        when: BlockTimestamp,
    ) -> Result<(), ChainError> {
        Self::create_account(store, name, Authority::default(), active_auth, 0, when)
    }

    fn create_account(
        store: &mut Store,
        name: &AccountName,
        owner_auth: Authority,
        active_auth: Authority,
        staked_balance: u64,
        when: BlockTimestamp,
    ) -> Result<(), ChainError> {
        store.create(|id| AccountObject { id, name: name.clone(), creation_date: when })?;
        let owner = store.create(|id| PermissionObject {
            id,
            parent: None,
            owner: name.clone(),
            name: owner_permission(),
            auth: owner_auth,
        })?;
        store.create(|id| PermissionObject {
            id,
            parent: Some(owner.id),
            owner: name.clone(),
            name: active_permission(),
            auth: active_auth,
        })?;
        store.create(|id| BandwidthUsageObject {
            id,
            owner: name.clone(),
            bytes: Default::default(),
        })?;
        store.create(|id| StakedBalanceObject { id, owner: name.clone(), staked_balance })?;
        Ok(())
    }

    fn spinup_fork_db(&mut self) -> Result<(), ChainError> {
        let Some(head) = self.block_log.read_head().cloned() else {
            return Ok(());
        };
        let head_id = head.id();
        self.fork_db.start_block(head);
        let state_head = self.head_block_id();
        if head_id != state_head && self.head_block_num() != 0 {
            return Err(ChainError::StateCorruption(
                "block log head does not match chain state".into(),
            ));
        }
        Ok(())
    }

    /// Re-apply the whole block log against fresh state. Fail-fast: a
    /// missing or inapplicable block aborts startup.
    fn replay(&mut self) -> Result<(), ChainError> {
        let db = self.db.clone();
        db.with_write_lock(|store| {
            let Some(last) = self.block_log.read_head().cloned() else {
                return Ok(());
            };
            let last_num = last.block_num();
            info!(blocks = last_num, "replaying blockchain");

            self.replaying = true;
            let result = (|| -> Result<(), ChainError> {
                for num in 1..=last_num {
                    if num % 1000 == 0 {
                        info!(num, total = last_num, "replay progress");
                    }
                    let block = self.block_log.read_block_by_num(num)?.ok_or_else(|| {
                        ChainError::UnknownBlock(format!("block {num} missing from the block log"))
                    })?;
                    self.apply_block_locked(store, &block, replay_skip())?;
                }
                Ok(())
            })();
            self.replaying = false;
            result?;

            let head = Self::dynamic_properties(store)?.head_block_number;
            store.set_revision(head as i64)?;
            info!(head, "replay complete");
            Ok(())
        })
    }

    // ── Block push and fork resolution ──────────────────────────────────

    fn push_block_locked(
        &mut self,
        store: &mut Store,
        block: &SignedBlock,
    ) -> Result<bool, ChainError> {
        let skip = self.skip_flags;
        if !skip.contains(SkipFlags::FORK_DB) {
            let new_head = self.fork_db.push_block(block.clone())?;
            if new_head.data.header.previous != Self::head_id(store)? {
                // a sibling branch became longest: switch, or ignore if not
                // actually longer
                if new_head.num > Self::head_num(store)? {
                    return self.switch_forks(store, &new_head.id);
                }
                return Ok(false);
            }
        }

        let session = store.start_undo_session(true);
        match self.apply_block_locked(store, block, skip) {
            Ok(()) => {
                session.push(store);
                Ok(false)
            }
            Err(err) => {
                error!(error = %err, num = block.block_num(), "failed to push new block");
                session.undo(store);
                self.fork_db.remove(&block.id());
                Err(err)
            }
        }
    }

    fn switch_forks(&mut self, store: &mut Store, new_head: &BlockId) -> Result<bool, ChainError> {
        let skip = self.skip_flags;
        warn!(id = %new_head, "switching to fork");
        let (new_branch, old_branch) =
            self.fork_db.fetch_branch_from(new_head, &Self::head_id(store)?)?;
        let fork_point = new_branch
            .last()
            .map(|i| i.previous_id())
            .ok_or_else(|| ChainError::UnknownBlock("empty fork branch".into()))?;

        while Self::head_id(store)? != fork_point {
            self.pop_block_locked(store)?;
        }

        for item in new_branch.iter().rev() {
            info!(num = item.num, id = %item.id, "pushing block from fork");
            let session = store.start_undo_session(true);
            match self.apply_block_locked(store, &item.data, skip) {
                Ok(()) => {
                    session.push(store);
                    // keep the fork head on the applied tip so the
                    // irreversibility walker sees the branch being built
                    self.fork_db.set_head(&item.id)?;
                }
                Err(err) => {
                    warn!(error = %err, num = item.num, "exception while switching forks");
                    session.undo(store);

                    // revert the branch blocks applied so far, then
                    // rebuild the previously canonical branch
                    while Self::head_id(store)? != fork_point {
                        self.pop_block_locked(store)?;
                    }
                    for old_item in old_branch.iter().rev() {
                        let session = store.start_undo_session(true);
                        match self.apply_block_locked(store, &old_item.data, skip) {
                            Ok(()) => {
                                session.push(store);
                                self.fork_db.set_head(&old_item.id)?;
                            }
                            Err(restore_err) => {
                                session.undo(store);
                                error!(
                                    error = %restore_err,
                                    num = old_item.num,
                                    "failed to restore canonical branch"
                                );
                                return Err(restore_err);
                            }
                        }
                    }

                    // the whole invalid branch leaves the fork database,
                    // from its root down through every descendant
                    if let Some(branch_root) = new_branch.last() {
                        self.fork_db.remove(&branch_root.id);
                    }
                    match old_branch.first() {
                        Some(old_tip) => self.fork_db.set_head(&old_tip.id)?,
                        None => self.fork_db.set_head(&fork_point)?,
                    }
                    return Err(err);
                }
            }
        }
        Ok(true)
    }

    fn pop_block_locked(&mut self, store: &mut Store) -> Result<(), ChainError> {
        self.clear_pending_locked(store);
        let head_id = Self::head_id(store)?;
        let head_block = self.fetch_block_by_id_locked(store, &head_id)?;
        if head_block.is_none() {
            return Err(ChainError::PopEmptyChain);
        }
        self.fork_db.pop_block()?;
        store.undo();
        Ok(())
    }

    fn clear_pending_locked(&mut self, store: &mut Store) {
        if let Some(pending) = self.pending.take() {
            pending.session.undo(store);
        }
    }

    // ── Pending block assembly ──────────────────────────────────────────

    fn start_pending_block(&mut self, store: &mut Store) -> Result<(), ChainError> {
        let session = store.start_undo_session(true);
        let mut block = SignedBlock::default();
        block.regions.push(Region::new(0));
        let mut block_trace = BlockTrace::default();
        block_trace.region_traces.push(RegionTrace::default());

        self.pending = Some(PendingState {
            block,
            block_trace,
            session,
            cycle: CycleScheduler::new(),
            cycle_trace: CycleTrace::default(),
            block_size: 0,
        });
        self.start_pending_cycle();
        Ok(())
    }

    fn start_pending_cycle(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if let Some(region) = pending.block.regions.last_mut() {
            region.cycles_summary.push(Vec::new());
        }
        pending.cycle = CycleScheduler::new();
        pending.cycle_trace = CycleTrace::default();
        self.start_pending_shard();
    }

    fn start_pending_shard(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if let Some(cycle) = pending
            .block
            .regions
            .last_mut()
            .and_then(|r| r.cycles_summary.last_mut())
        {
            cycle.push(Vec::new());
        }
        pending.cycle_trace.shard_traces.push(ShardTrace::default());
        pending.cycle.start_shard();
    }

    /// Roll the open cycle's shard roots, persist its deferred
    /// transactions, and fold the trace into the pending region trace.
    fn finalize_pending_cycle(&mut self, store: &mut Store) -> Result<(), ChainError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        for shard in &mut pending.cycle_trace.shard_traces {
            shard.calculate_root();
        }
        let cycle_trace = std::mem::take(&mut pending.cycle_trace);
        Self::record_cycle_trace(store, &cycle_trace)?;
        if let Some(pending) = self.pending.as_mut() {
            if let Some(region_trace) = pending.block_trace.region_traces.last_mut() {
                region_trace.cycle_traces.push(cycle_trace);
            }
        }
        Ok(())
    }

    /// Persist generated transactions and surface handler console output.
    fn record_cycle_trace(store: &mut Store, cycle_trace: &CycleTrace) -> Result<(), ChainError> {
        for shard in &cycle_trace.shard_traces {
            for trx_trace in &shard.transaction_traces {
                for deferred in &trx_trace.deferred_transactions {
                    let packed = bincode::serialize(deferred)
                        .map_err(|e| ChainError::BlockLogCodec(e.to_string()))?;
                    store.create(|id| GeneratedTransactionObject {
                        id,
                        trx_id: deferred.id(),
                        sender: deferred.sender.clone(),
                        sender_id: deferred.sender_id,
                        expiration: deferred.expiration,
                        delay_until: deferred.execute_after,
                        packed_trx: packed.clone(),
                    })?;
                }
                for action_trace in &trx_trace.action_traces {
                    if !action_trace.console.is_empty() {
                        debug!(
                            scope = %action_trace.act.scope,
                            action = %action_trace.act.name,
                            receiver = %action_trace.receiver,
                            console = %action_trace.console,
                            "action console output"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    // ── Transaction application ─────────────────────────────────────────

    fn push_transaction_locked(
        &mut self,
        store: &mut Store,
        trx: &SignedTransaction,
    ) -> Result<TransactionTrace, ChainError> {
        if self.pending.is_none() {
            self.start_pending_block(store)?;
        }

        if !self.skip_flags.contains(SkipFlags::BLOCK_SIZE_CHECK) {
            let max = Self::global_properties(store)?.configuration.max_block_size as u64;
            let pending_size = self.pending.as_ref().map(|p| p.block_size).unwrap_or(0);
            if pending_size + trx.billable_size() > max {
                return Err(ChainError::transaction("pending block is full"));
            }
        }

        let session = store.start_undo_session(true);
        match self.apply_pending_transaction(store, trx) {
            Ok(trace) => {
                session.squash(store);
                self.signals.on_pending_transaction.emit(trx);
                Ok(trace)
            }
            Err(err) => {
                session.undo(store);
                Err(err)
            }
        }
    }

    fn apply_pending_transaction(
        &mut self,
        store: &mut Store,
        trx: &SignedTransaction,
    ) -> Result<TransactionTrace, ChainError> {
        self.validate_referenced_accounts(store, trx)?;
        self.check_transaction_authorization(store, trx, false)?;

        // decide placement before touching state so a failed apply leaves
        // the pending block untouched
        let (scheduled, cycle_index) = {
            let pending = self
                .pending
                .as_ref()
                .ok_or_else(|| ChainError::transaction("no pending block"))?;
            let current_cycle = pending
                .block
                .regions
                .last()
                .map(|r| r.cycles_summary.len().saturating_sub(1))
                .unwrap_or(0);
            let scheduled = pending.cycle.schedule(&trx.transaction);
            let cycle_index = match scheduled {
                Some(_) => current_cycle,
                None => current_cycle + 1,
            };
            (scheduled, cycle_index)
        };

        let meta = TransactionMetadata {
            trx,
            id: trx.id(),
            region: 0,
            cycle_index: cycle_index as u32,
        };
        let trace = self.apply_transaction_locked(store, &meta)?;

        if scheduled.is_none() {
            // schedule conflict: close this cycle and open the next one
            self.finalize_pending_cycle(store)?;
            self.start_pending_cycle();
        }

        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| ChainError::transaction("no pending block"))?;
        // a fresh cycle can never conflict
        let shard = pending.cycle.schedule(&trx.transaction).unwrap_or(0);
        while pending
            .block
            .regions
            .last()
            .and_then(|r| r.cycles_summary.last())
            .map(|c| c.len())
            .unwrap_or(0)
            <= shard
        {
            if let Some(cycle) = pending
                .block
                .regions
                .last_mut()
                .and_then(|r| r.cycles_summary.last_mut())
            {
                cycle.push(Vec::new());
            }
            pending.cycle_trace.shard_traces.push(ShardTrace::default());
            pending.cycle.start_shard();
        }
        pending.cycle.occupy(shard, &trx.transaction);
        if let Some(shard_receipts) = pending
            .block
            .regions
            .last_mut()
            .and_then(|r| r.cycles_summary.last_mut())
            .and_then(|c| c.get_mut(shard))
        {
            shard_receipts.push(TransactionReceipt::executed(meta.id));
        }
        if let Some(shard_trace) = pending.cycle_trace.shard_traces.get_mut(shard) {
            shard_trace.append(trace.clone());
        }
        pending.block.input_transactions.push(trx.clone());
        pending.block_size += trx.billable_size();
        Ok(trace)
    }

    fn apply_transaction_locked(
        &mut self,
        store: &mut Store,
        meta: &TransactionMetadata<'_>,
    ) -> Result<TransactionTrace, ChainError> {
        self.validate_transaction(store, meta.trx)?;
        Self::record_transaction(store, meta)?;

        let mut result = TransactionTrace::new(meta.id);
        for act in &meta.trx.transaction.actions {
            let receiver = act.scope.clone();
            let handler = self
                .apply_handlers
                .find(&receiver, &act.scope, &act.name)
                .cloned();
            let mut context = ApplyContext::new(
                store,
                &meta.trx.transaction,
                act,
                receiver.clone(),
                self.skip_flags,
            );
            if let Some(handler) = handler {
                handler(&mut context)?;
            }
            let (console, deferred) = context.finish();
            Self::increment_scope_sequence(store, &act.scope)?;
            result.action_traces.push(ActionTrace {
                receiver,
                act: act.clone(),
                console,
                region_id: meta.region,
                cycle_index: meta.cycle_index,
            });
            result.deferred_transactions.extend(deferred);
        }

        self.charge_bandwidth(store, meta)?;
        Ok(result)
    }

    fn charge_bandwidth(
        &self,
        store: &mut Store,
        meta: &TransactionMetadata<'_>,
    ) -> Result<(), ChainError> {
        let mut authorizers: BTreeSet<AccountName> = BTreeSet::new();
        for act in &meta.trx.transaction.actions {
            for auth in &act.authorization {
                authorizers.insert(auth.actor.clone());
            }
        }
        if authorizers.is_empty() {
            return Ok(());
        }

        let trx_size = meta.trx.billable_size() + FIXED_BANDWIDTH_OVERHEAD_PER_TRANSACTION;
        let now = Self::dynamic_properties(store)?.time;
        for account in &authorizers {
            let usage_id = store.get::<BandwidthUsageObject>(account)?.id;
            store.modify::<BandwidthUsageObject>(usage_id, |usage| {
                usage.bytes.add_usage(trx_size, now);
            })?;

            if self.enforce_bandwidth_limits {
                let used = store.get::<BandwidthUsageObject>(account)?.bytes.value;
                let staked = store.get::<StakedBalanceObject>(account)?.staked_balance;
                let allowance = staked.saturating_mul(BANDWIDTH_BYTES_PER_STAKED_TOKEN);
                if used > allowance {
                    return Err(ChainError::transaction(format!(
                        "account {account} has insufficient stake for this transaction"
                    )));
                }
            }
        }
        Ok(())
    }

    fn increment_scope_sequence(
        store: &mut Store,
        scope: &AccountName,
    ) -> Result<(), ChainError> {
        match store.find::<ScopeSequenceObject>(scope).map(|s| s.id) {
            Some(id) => store.modify::<ScopeSequenceObject>(id, |s| s.sequence += 1)?,
            None => {
                store.create(|id| ScopeSequenceObject {
                    id,
                    scope: scope.clone(),
                    sequence: 1,
                })?;
            }
        }
        Ok(())
    }

    fn record_transaction(
        store: &mut Store,
        meta: &TransactionMetadata<'_>,
    ) -> Result<(), ChainError> {
        store.create(|id| TransactionObject {
            id,
            trx_id: meta.id,
            expiration: meta.trx.transaction.expiration,
        })?;
        Ok(())
    }

    // ── Transaction validation ──────────────────────────────────────────

    fn validate_transaction(
        &self,
        store: &Store,
        trx: &SignedTransaction,
    ) -> Result<(), ChainError> {
        let skip = self.skip_flags;
        if !skip.contains(SkipFlags::SCOPE_CHECK) {
            Self::validate_scope(&trx.transaction)?;
        }
        self.validate_expiration(store, &trx.transaction)?;
        if !skip.contains(SkipFlags::TAPOS_CHECK) {
            Self::validate_tapos(store, &trx.transaction)?;
        }
        if !skip.contains(SkipFlags::TRANSACTION_DUPE_CHECK) {
            Self::validate_uniqueness(store, trx)?;
        }
        Ok(())
    }

    fn validate_scope(trx: &Transaction) -> Result<(), ChainError> {
        for scopes in [&trx.read_scope, &trx.write_scope] {
            for pair in scopes.windows(2) {
                if pair[0] >= pair[1] {
                    return Err(ChainError::transaction("scopes must be sorted and unique"));
                }
            }
        }
        // authorizing accounts need write access to record bandwidth usage
        for act in &trx.actions {
            for auth in &act.authorization {
                if trx.write_scope.binary_search(&auth.actor).is_err() {
                    return Err(ChainError::transaction(
                        "write scope of the authorizing account is required",
                    ));
                }
            }
        }
        for scope in &trx.read_scope {
            if trx.write_scope.binary_search(scope).is_ok() {
                return Err(ChainError::transaction(
                    "a transaction may not redeclare scope in read scope",
                ));
            }
        }
        Ok(())
    }

    fn validate_expiration(&self, store: &Store, trx: &Transaction) -> Result<(), ChainError> {
        let now = Self::dynamic_properties(store)?.time.to_time_point();
        let lifetime = Self::global_properties(store)?
            .configuration
            .max_transaction_lifetime_secs as u64;
        if trx.expiration > now.saturating_add_secs(lifetime) {
            return Err(ChainError::transaction(
                "transaction expiration is too far in the future",
            ));
        }
        if now > trx.expiration {
            return Err(ChainError::transaction("transaction is expired"));
        }
        Ok(())
    }

    fn validate_tapos(store: &Store, trx: &Transaction) -> Result<(), ChainError> {
        let summary = store.get::<BlockSummaryObject>(&(trx.ref_block_num as u64))?;
        if !trx.verify_reference_block(&summary.block_id) {
            return Err(ChainError::transaction(
                "transaction's reference block did not match; is this transaction from a different fork?",
            ));
        }
        Ok(())
    }

    fn validate_uniqueness(store: &Store, trx: &SignedTransaction) -> Result<(), ChainError> {
        let id = trx.id();
        if store.find::<TransactionObject>(&id).is_some() {
            return Err(ChainError::TxDuplicate { id });
        }
        Ok(())
    }

    fn validate_referenced_accounts(
        &self,
        store: &Store,
        trx: &SignedTransaction,
    ) -> Result<(), ChainError> {
        for scope in trx
            .transaction
            .read_scope
            .iter()
            .chain(trx.transaction.write_scope.iter())
        {
            Self::require_scope(store, scope)?;
        }
        for act in &trx.transaction.actions {
            Self::require_account(store, &act.scope)?;
            for auth in &act.authorization {
                Self::require_account(store, &auth.actor)?;
            }
        }
        Ok(())
    }

    fn require_scope(store: &Store, scope: &AccountName) -> Result<(), ChainError> {
        if *scope == all_scope() || *scope == auth_scope() {
            return Ok(());
        }
        Self::require_account(store, scope)
    }

    fn require_account(store: &Store, name: &AccountName) -> Result<(), ChainError> {
        if store.find::<AccountObject>(name).is_none() {
            return Err(ChainError::AccountNotFound(name.clone()));
        }
        Ok(())
    }

    fn check_transaction_authorization(
        &self,
        store: &Store,
        trx: &SignedTransaction,
        allow_unused_signatures: bool,
    ) -> Result<(), ChainError> {
        let skip = self.skip_flags;
        let provided_keys = if skip.contains(SkipFlags::TRANSACTION_SIGNATURES) {
            BTreeSet::new()
        } else {
            trx.signature_keys(&self.chain_id)?
        };

        let max_depth = Self::global_properties(store)?
            .configuration
            .max_authority_depth;
        let lookup = |level: &PermissionLevel| {
            store
                .find::<PermissionObject>(&(level.actor.clone(), level.permission.clone()))
                .map(|p| p.auth.clone())
        };
        let mut checker =
            AuthorityChecker::new(lookup, max_depth, provided_keys, BTreeSet::new());

        for act in &trx.transaction.actions {
            for declared in &act.authorization {
                if !skip.contains(SkipFlags::AUTHORITY_CHECK) {
                    let min_permission =
                        self.lookup_minimum_permission(store, &declared.actor, &act.scope, &act.name)?;
                    let declared_permission = store.get::<PermissionObject>(&(
                        declared.actor.clone(),
                        declared.permission.clone(),
                    ))?;
                    if !declared_permission.satisfies(&min_permission, store) {
                        return Err(ChainError::TxIrrelevantAuth {
                            auth: declared.to_string(),
                            min: min_permission.name.to_string(),
                        });
                    }
                }
                if !skip.contains(SkipFlags::TRANSACTION_SIGNATURES)
                    && !checker.satisfied(declared)
                {
                    return Err(ChainError::TxMissingSigs { auth: declared.to_string() });
                }
            }
        }

        if !allow_unused_signatures
            && !skip.contains(SkipFlags::TRANSACTION_SIGNATURES)
            && !checker.all_keys_used()
        {
            let keys = checker
                .unused_keys()
                .iter()
                .map(|k| format!("{:?}", k))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ChainError::TxIrrelevantSig { keys });
        }
        Ok(())
    }

    /// The weakest permission that may authorize `(authorizer, scope,
    /// action)`: a specific link, else the contract-wide default link,
    /// else the account's active permission.
    fn lookup_minimum_permission(
        &self,
        store: &Store,
        authorizer: &AccountName,
        scope: &AccountName,
        action: &ActionName,
    ) -> Result<PermissionObject, ChainError> {
        let link = store
            .find::<PermissionLinkObject>(&(authorizer.clone(), scope.clone(), action.clone()))
            .or_else(|| {
                store.find::<PermissionLinkObject>(&(
                    authorizer.clone(),
                    scope.clone(),
                    ActionName::any(),
                ))
            });
        let permission_name = match link {
            Some(link) => link.required_permission.clone(),
            None => active_permission(),
        };
        Ok(store
            .get::<PermissionObject>(&(authorizer.clone(), permission_name))?
            .clone())
    }

    // ── Block generation ────────────────────────────────────────────────

    fn generate_block_locked(
        &mut self,
        store: &mut Store,
        when: BlockTimestamp,
        producer: &AccountName,
        signing_key: &PrivateKey,
    ) -> Result<SignedBlock, ChainError> {
        let skip = self.skip_flags;
        let slot_num = self.get_slot_at_time_locked(store, when);
        if slot_num == 0 {
            return Err(ChainError::block_validate(
                "block timestamp is not after the current head",
            ));
        }
        let scheduled = self.get_scheduled_producer_locked(store, slot_num)?;
        if scheduled != *producer {
            return Err(ChainError::block_validate(format!(
                "{producer} is not the scheduled producer for slot {slot_num} ({scheduled} is)"
            )));
        }
        let producer_obj = store.get::<ProducerObject>(&scheduled)?.clone();

        if self.pending.is_none() {
            self.start_pending_block(store)?;
        }
        self.finalize_pending_cycle(store)?;

        if !skip.contains(SkipFlags::PRODUCER_SIGNATURE)
            && producer_obj.signing_key != public_from_private(signing_key)
        {
            return Err(ChainError::block_validate(
                "producer signing key does not match the producer object",
            ));
        }

        let head_id = Self::head_id(store)?;
        let block_mroot = Self::dynamic_properties(store)?.block_merkle_root.root();
        {
            let pending = self
                .pending
                .as_mut()
                .ok_or_else(|| ChainError::block_validate("no pending block"))?;
            pending.block.header.timestamp = when;
            pending.block.header.producer = producer_obj.owner.clone();
            pending.block.header.previous = head_id;
            pending.block.header.block_mroot = block_mroot;
            pending.block.header.transaction_mroot =
                pending.block.calculate_transaction_merkle_root();
            pending.block.header.action_mroot =
                pending.block_trace.calculate_action_merkle_root();
        }

        let block_num = self
            .pending
            .as_ref()
            .map(|p| p.block.block_num())
            .unwrap_or(0);
        if is_start_of_round(block_num) {
            let schedule = self.calculate_producer_schedule(store)?;
            if schedule != Self::head_producer_schedule(store)?.clone() {
                if let Some(pending) = self.pending.as_mut() {
                    pending.block.header.new_producers = Some(schedule);
                }
            }
        }

        if !skip.contains(SkipFlags::PRODUCER_SIGNATURE) {
            if let Some(pending) = self.pending.as_mut() {
                pending.block.sign(signing_key);
            }
        }

        let (block, trace) = match self.pending.as_ref() {
            Some(pending) => (pending.block.clone(), pending.block_trace.clone()),
            None => return Err(ChainError::block_validate("no pending block")),
        };

        // make the block visible to the fork walker before finalization so
        // advancing irreversibility can flush it to the log
        if !skip.contains(SkipFlags::FORK_DB) {
            self.fork_db.push_block(block.clone())?;
        }

        let finalized = self
            .validate_block_header(store, skip, &block)
            .and_then(|signer| self.finalize_block(store, &block, &trace, &signer));
        if let Err(err) = finalized {
            if !skip.contains(SkipFlags::FORK_DB) {
                self.fork_db.remove(&block.id());
            }
            return Err(err);
        }

        if let Some(pending) = self.pending.take() {
            pending.session.push(store);
        }
        Ok(block)
    }

    // ── Block application ───────────────────────────────────────────────

    fn apply_block_locked(
        &mut self,
        store: &mut Store,
        block: &SignedBlock,
        skip: SkipFlags,
    ) -> Result<(), ChainError> {
        let mut skip = skip;
        if let Some((&last_checkpoint, _)) = self.checkpoints.iter().next_back() {
            if let Some(expected) = self.checkpoints.get(&block.block_num()) {
                if *expected != block.id() {
                    return Err(ChainError::block_validate(format!(
                        "block {} did not match checkpoint",
                        block.block_num()
                    )));
                }
            }
            if last_checkpoint >= block.block_num() {
                // everything below the last checkpoint is trusted
                skip = SkipFlags::ALL;
            }
        }
        self.with_skip_flags(skip, |ctl| ctl.apply_block_impl(store, block))
    }

    fn apply_block_impl(&mut self, store: &mut Store, block: &SignedBlock) -> Result<(), ChainError> {
        let skip = self.skip_flags;
        let signer = self.validate_block_header(store, skip, block)?;

        for pair in block.regions.windows(2) {
            if pair[0].region >= pair[1].region {
                return Err(ChainError::block_validate(
                    "regions must be listed in strictly increasing order",
                ));
            }
        }

        let mut trx_index: HashMap<TransactionId, &SignedTransaction> = HashMap::new();
        for trx in &block.input_transactions {
            trx_index.insert(trx.id(), trx);
        }

        let mut block_trace = BlockTrace::default();
        for region in &block.regions {
            let mut region_trace = RegionTrace::default();
            for (cycle_index, cycle) in region.cycles_summary.iter().enumerate() {
                let mut cycle_trace = CycleTrace::default();
                for shard in cycle {
                    let mut shard_trace = ShardTrace::default();
                    for receipt in shard {
                        if receipt.status == TransactionStatus::Executed {
                            let trx = trx_index
                                .get(&receipt.id)
                                .copied()
                                .ok_or(ChainError::DeferredUnsupported { id: receipt.id })?;
                            let meta = TransactionMetadata {
                                trx,
                                id: receipt.id,
                                region: region.region,
                                cycle_index: cycle_index as u32,
                            };
                            shard_trace.append(self.apply_transaction_locked(store, &meta)?);
                        }
                    }
                    shard_trace.calculate_root();
                    cycle_trace.shard_traces.push(shard_trace);
                }
                Self::record_cycle_trace(store, &cycle_trace)?;
                region_trace.cycle_traces.push(cycle_trace);
            }
            block_trace.region_traces.push(region_trace);
        }

        if !skip.contains(SkipFlags::MERKLE_CHECK)
            && block.header.action_mroot != block_trace.calculate_action_merkle_root()
        {
            return Err(ChainError::block_validate("action merkle root does not match"));
        }

        self.finalize_block(store, block, &block_trace, &signer)
    }

    fn validate_block_header(
        &self,
        store: &Store,
        skip: SkipFlags,
        block: &SignedBlock,
    ) -> Result<AccountName, ChainError> {
        let head_id = Self::head_id(store)?;
        if head_id != block.header.previous {
            return Err(ChainError::block_validate(format!(
                "block {} does not extend the head ({} expected, {} declared)",
                block.block_num(),
                head_id,
                block.header.previous
            )));
        }
        let head_time = Self::dynamic_properties(store)?.time;
        if head_time >= block.header.timestamp {
            return Err(ChainError::block_validate(format!(
                "block {} timestamp {} is not after the head's {}",
                block.block_num(),
                block.header.timestamp,
                head_time
            )));
        }
        if !is_start_of_round(block.block_num()) && block.header.new_producers.is_some() {
            return Err(ChainError::block_validate(
                "producer changes may only occur at the start of a round",
            ));
        }

        let slot = self.get_slot_at_time_locked(store, block.header.timestamp);
        let scheduled = self.get_scheduled_producer_locked(store, slot)?;
        let producer = store.get::<ProducerObject>(&scheduled)?;

        if !skip.contains(SkipFlags::PRODUCER_SIGNATURE)
            && !block.validate_signee(&producer.signing_key)
        {
            return Err(ChainError::block_validate(format!(
                "incorrect block producer key for block {}",
                block.block_num()
            )));
        }
        if !skip.contains(SkipFlags::PRODUCER_SCHEDULE_CHECK)
            && block.header.producer != producer.owner
        {
            return Err(ChainError::block_validate(format!(
                "producer {} produced at {}'s slot",
                block.header.producer, producer.owner
            )));
        }
        if !skip.contains(SkipFlags::MERKLE_CHECK)
            && block.calculate_transaction_merkle_root() != block.header.transaction_mroot
        {
            return Err(ChainError::block_validate(
                "transaction merkle root does not match",
            ));
        }
        Ok(producer.owner.clone())
    }

    // ── Post-apply state updates ────────────────────────────────────────

    fn finalize_block(
        &mut self,
        store: &mut Store,
        block: &SignedBlock,
        trace: &BlockTrace,
        signer: &AccountName,
    ) -> Result<(), ChainError> {
        self.update_global_properties(store, block)?;
        self.update_global_dynamic_data(store, block)?;
        Self::update_signing_producer(store, block, signer)?;
        self.update_last_irreversible_block(store)?;
        Self::create_block_summary(store, block)?;
        self.clear_expired_transactions(store)?;

        self.signals.applied_block.emit(trace);
        if self.replaying {
            self.signals.applied_irreversible_block.emit(block);
        }
        Ok(())
    }

    /// Round-boundary bookkeeping: record the computed schedule as pending
    /// and refresh the producers account's multisig authority.
    fn update_global_properties(
        &mut self,
        store: &mut Store,
        block: &SignedBlock,
    ) -> Result<(), ChainError> {
        if !is_start_of_round(block.block_num()) {
            return Ok(());
        }
        let schedule = self.calculate_producer_schedule(store)?;
        if let Some(announced) = &block.header.new_producers {
            if *announced != schedule {
                return Err(ChainError::block_validate(
                    "pending producer set different than expected",
                ));
            }
        }
        if *Self::head_producer_schedule(store)? != schedule
            && block.header.new_producers.is_none()
        {
            return Err(ChainError::block_validate(
                "pending producer set changed but block did not indicate it",
            ));
        }

        let gpo = Self::global_properties(store)?;
        let gpo_id = gpo.id;
        let active = gpo.active_producers.clone();
        let block_num = block.block_num();
        store.modify::<GlobalPropertyObject>(gpo_id, |props| {
            match props.pending_active_producers.last_mut() {
                Some((num, pending)) if *num == block_num => *pending = schedule.clone(),
                _ => props.pending_active_producers.push((block_num, schedule.clone())),
            }
        })?;

        let authority = Self::producers_authority(&active);
        let permission_id = store
            .get::<PermissionObject>(&(producers_account(), active_permission()))?
            .id;
        store.modify::<PermissionObject>(permission_id, |po| po.auth = authority)?;
        Ok(())
    }

    fn update_global_dynamic_data(
        &mut self,
        store: &mut Store,
        block: &SignedBlock,
    ) -> Result<(), ChainError> {
        let dgp = Self::dynamic_properties(store)?.clone();
        if dgp.block_merkle_root.root() != block.header.block_mroot {
            return Err(ChainError::block_validate(
                "block merkle root does not match expected value",
            ));
        }

        let missed_blocks = if dgp.head_block_number == 0 {
            0
        } else {
            self.get_slot_at_time_locked(store, block.header.timestamp)
                .saturating_sub(1)
        };

        for i in 0..missed_blocks {
            let missed_producer = self.get_scheduled_producer_locked(store, i + 1)?;
            if missed_producer != block.header.producer {
                let producer_id = store.get::<ProducerObject>(&missed_producer)?.id;
                store.modify::<ProducerObject>(producer_id, |p| p.total_missed += 1)?;
            }
        }

        let new_id = block.id();
        let block_size = block.serialized_size();
        let producer = block.header.producer.clone();
        let timestamp = block.header.timestamp;
        let block_num = block.block_num();
        store.modify::<DynamicGlobalPropertyObject>(dgp.id, |d| {
            d.head_block_number = block_num;
            d.head_block_id = new_id;
            d.time = timestamp;
            d.current_producer = producer.clone();
            d.current_absolute_slot += missed_blocks as u64 + 1;
            d.average_block_size.add_usage(block_size, timestamp);
            if (missed_blocks as usize) < 64 {
                d.recent_slots_filled = ((d.recent_slots_filled << 1) | 1) << missed_blocks;
            } else {
                d.recent_slots_filled = 0;
            }
            d.block_merkle_root.append(Digest::new(*new_id.as_bytes()));
        })?;

        let updated = Self::dynamic_properties(store)?;
        self.fork_db.set_max_size(
            updated.head_block_number - updated.last_irreversible_block_num + 1,
        );
        Ok(())
    }

    fn update_signing_producer(
        store: &mut Store,
        block: &SignedBlock,
        signer: &AccountName,
    ) -> Result<(), ChainError> {
        let aslot = Self::dynamic_properties(store)?.current_absolute_slot;
        let block_num = block.block_num();
        let producer_id = store.get::<ProducerObject>(signer)?.id;
        store.modify::<ProducerObject>(producer_id, |p| {
            p.last_aslot = aslot;
            p.last_confirmed_block_num = block_num;
        })?;
        Ok(())
    }

    fn update_last_irreversible_block(&mut self, store: &mut Store) -> Result<(), ChainError> {
        let gpo = Self::global_properties(store)?.clone();
        let dgp = Self::dynamic_properties(store)?.clone();

        let mut confirmed: Vec<u32> = Vec::with_capacity(gpo.active_producers.producers.len());
        for producer_key in &gpo.active_producers.producers {
            confirmed.push(
                store
                    .get::<ProducerObject>(&producer_key.producer_name)?
                    .last_confirmed_block_num,
            );
        }
        confirmed.sort_unstable();
        let offset = confirmed.len() * (PERCENT_100 - IRREVERSIBLE_THRESHOLD_PERCENT) as usize
            / PERCENT_100 as usize;
        let candidate = confirmed.get(offset).copied().unwrap_or(0);

        let last_irreversible = if candidate > dgp.last_irreversible_block_num {
            store.modify::<DynamicGlobalPropertyObject>(dgp.id, |d| {
                d.last_irreversible_block_num = candidate;
            })?;
            candidate
        } else {
            dgp.last_irreversible_block_num
        };

        // flush newly irreversible blocks to the log
        let last_on_disk = self
            .block_log
            .read_head()
            .map(|b| b.block_num())
            .unwrap_or(0);
        for num in (last_on_disk + 1)..=last_irreversible {
            let block = self
                .fetch_block_by_number_locked(store, num)?
                .ok_or_else(|| ChainError::UnknownBlock(format!("irreversible block {num}")))?;
            self.block_log.append(&block)?;
            self.signals.applied_irreversible_block.emit(&block);
        }

        // promote a pending producer schedule once irreversibility crosses
        // the block that announced it
        let mut newly_active: Option<ProducerSchedule> = None;
        for (num, schedule) in &gpo.pending_active_producers {
            if *num < last_irreversible {
                newly_active = Some(schedule.clone());
            }
        }
        if let Some(schedule) = newly_active {
            store.modify::<GlobalPropertyObject>(gpo.id, |props| {
                props
                    .pending_active_producers
                    .retain(|(num, _)| *num >= last_irreversible);
                props.active_producers = schedule;
            })?;
        }

        // trim the fork database and the undo history
        self.fork_db
            .set_max_size(dgp.head_block_number.saturating_sub(last_irreversible) + 1);
        store.commit(last_irreversible as i64);
        Ok(())
    }

    fn create_block_summary(store: &mut Store, block: &SignedBlock) -> Result<(), ChainError> {
        let ring_slot = (block.block_num() & 0xffff) as u64;
        let summary_id = store.get::<BlockSummaryObject>(&ring_slot)?.id;
        let block_id = block.id();
        store.modify::<BlockSummaryObject>(summary_id, |s| s.block_id = block_id)?;
        Ok(())
    }

    /// Prune expired dedup and generated-transaction records. Inert unless
    /// the pruning policy flag was enabled at construction.
    fn clear_expired_transactions(&self, store: &mut Store) -> Result<(), ChainError> {
        if !self.prune_expired_transactions {
            return Ok(());
        }
        let now = Self::dynamic_properties(store)?.time.to_time_point();
        let expired: Vec<u64> = store
            .iter::<TransactionObject>()
            .filter(|t| t.expiration < now)
            .map(|t| t.id)
            .collect();
        for id in expired {
            store.erase::<TransactionObject>(id)?;
        }
        let expired: Vec<u64> = store
            .iter::<GeneratedTransactionObject>()
            .filter(|t| t.expiration < now)
            .map(|t| t.id)
            .collect();
        for id in expired {
            store.erase::<GeneratedTransactionObject>(id)?;
        }
        Ok(())
    }

    // ── Schedule queries ────────────────────────────────────────────────

    fn get_slot_time_locked(&self, store: &Store, slot_num: u32) -> BlockTimestamp {
        if slot_num == 0 {
            return BlockTimestamp::EPOCH;
        }
        // the first slot after genesis is genesis_time + one interval
        match Self::dynamic_properties(store) {
            Ok(dgp) => dgp.time.saturating_add_slots(slot_num),
            Err(_) => BlockTimestamp::EPOCH,
        }
    }

    fn get_slot_at_time_locked(&self, store: &Store, when: BlockTimestamp) -> u32 {
        let first_slot = self.get_slot_time_locked(store, 1);
        if when < first_slot {
            return 0;
        }
        when.slots_since(first_slot) + 1
    }

    fn get_scheduled_producer_locked(
        &self,
        store: &Store,
        slot_num: u32,
    ) -> Result<AccountName, ChainError> {
        let dgp = Self::dynamic_properties(store)?;
        let gpo = Self::global_properties(store)?;
        let index = scheduled_index(dgp.current_absolute_slot + slot_num as u64);
        gpo.active_producers
            .producers
            .get(index)
            .map(|p| p.producer_name.clone())
            .ok_or_else(|| ChainError::block_validate("producer schedule is empty"))
    }

    /// Top producers by vote, preserving the version when nothing changed.
    fn calculate_producer_schedule(&self, store: &Store) -> Result<ProducerSchedule, ChainError> {
        let candidates: Vec<(AccountName, PublicKey, u128)> = store
            .iter::<ProducerObject>()
            .map(|p| (p.owner.clone(), p.signing_key, p.total_votes))
            .collect();
        let producers = top_producers_by_vote(candidates);
        let head = Self::head_producer_schedule(store)?.clone();
        if producers.is_empty() {
            return Ok(head);
        }
        let mut schedule = ProducerSchedule { version: head.version, producers };
        if schedule != head {
            schedule.version += 1;
        }
        Ok(schedule)
    }

    /// The most recent schedule: the newest pending one, else the active.
    fn head_producer_schedule(store: &Store) -> Result<&ProducerSchedule, ChainError> {
        let gpo = Self::global_properties(store)?;
        Ok(gpo
            .pending_active_producers
            .last()
            .map(|(_, schedule)| schedule)
            .unwrap_or(&gpo.active_producers))
    }

    // ── State accessors ─────────────────────────────────────────────────

    fn global_properties(store: &Store) -> Result<&GlobalPropertyObject, ChainError> {
        Ok(store.get::<GlobalPropertyObject>(&())?)
    }

    fn dynamic_properties(store: &Store) -> Result<&DynamicGlobalPropertyObject, ChainError> {
        Ok(store.get::<DynamicGlobalPropertyObject>(&())?)
    }

    fn head_num(store: &Store) -> Result<u32, ChainError> {
        Ok(Self::dynamic_properties(store)?.head_block_number)
    }

    fn head_id(store: &Store) -> Result<BlockId, ChainError> {
        Ok(Self::dynamic_properties(store)?.head_block_id)
    }

    fn fetch_block_by_id_locked(
        &self,
        _store: &Store,
        id: &BlockId,
    ) -> Result<Option<SignedBlock>, ChainError> {
        if let Some(item) = self.fork_db.fetch_block(id) {
            return Ok(Some(item.data.clone()));
        }
        self.block_log.read_block_by_id(id)
    }

    fn fetch_block_by_number_locked(
        &self,
        store: &Store,
        num: u32,
    ) -> Result<Option<SignedBlock>, ChainError> {
        if let Some(block) = self.block_log.read_block_by_num(num)? {
            return Ok(Some(block));
        }
        // above the log tail: walk the canonical branch of the fork db
        if num <= Self::head_num(store)? {
            let mut item = self.fork_db.head().cloned();
            while let Some(current) = item {
                if current.num == num {
                    return Ok(Some(current.data));
                }
                if current.num < num {
                    break;
                }
                item = self.fork_db.fetch_block(&current.previous_id()).cloned();
            }
        }
        Ok(None)
    }
}
