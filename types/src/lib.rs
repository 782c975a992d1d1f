//! Fundamental types for the Cascade chain.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: names, digests, block and transaction ids, slot-based
//! timestamps, key material, and the protocol constants.

pub mod id;
pub mod keys;
pub mod name;
pub mod params;
pub mod time;

pub use id::{BlockId, Digest, TransactionId};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use name::{AccountName, ActionName, PermissionName, TableName};
pub use time::{BlockTimestamp, TimePoint};
