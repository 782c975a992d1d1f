//! The Cascade chain controller.
//!
//! A deterministic state machine over the versioned object store: signed
//! transactions accumulate into a pending block partitioned into regions,
//! cycles, and shards; signed blocks extend the fork database; the longest
//! fork (delegated-proof-of-stake rule) is canonical, with full state
//! restoration when a switch fails partway; blocks confirmed past the
//! irreversibility threshold are flushed to the append-only block log.
//!
//! The action-execution sandbox, the network layer, and the RPC surface
//! are external; they plug in through [`apply_context::ApplyHandler`]
//! registrations and the controller's signals.

pub mod apply_context;
pub mod authority;
pub mod block;
pub mod block_log;
pub mod config;
pub mod controller;
pub mod error;
pub mod fork_database;
pub mod objects;
pub mod pending;
pub mod schedule;
pub mod signal;
pub mod skip;
pub mod trace;
pub mod transaction;

pub use apply_context::{ApplyContext, ApplyHandler, ApplyHandlerRegistry};
pub use authority::{AccountWeight, Authority, AuthorityChecker, KeyWeight};
pub use block::{
    BlockHeader, Region, SignedBlock, TransactionReceipt, TransactionStatus,
};
pub use block_log::BlockLog;
pub use config::{
    ChainConfiguration, ControllerConfig, GenesisAccount, GenesisConfig, GenesisProducer,
};
pub use controller::Controller;
pub use error::ChainError;
pub use fork_database::{ForkDatabase, ForkItem};
pub use schedule::{ProducerKey, ProducerSchedule};
pub use skip::SkipFlags;
pub use trace::{
    ActionTrace, BlockTrace, CycleTrace, DeferredTransaction, RegionTrace, ShardTrace,
    TransactionTrace,
};
pub use transaction::{
    AccountSignature, Action, PermissionLevel, SignedTransaction, Transaction,
};
