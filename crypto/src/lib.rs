//! Cryptographic primitives for the Cascade chain.
//!
//! - **Blake2b-256** for every digest (block ids, transaction ids, merkle
//!   nodes)
//! - **Ed25519** for block and transaction signatures
//! - Plain and incremental merkle root computation

pub mod hash;
pub mod keys;
pub mod merkle;
pub mod sign;

pub use hash::{blake2b_256, digest, digest_parts};
pub use keys::{generate_keypair, keypair_from_seed, public_from_private};
pub use merkle::{merkle_root, IncrementalMerkle};
pub use sign::{sign_digest, verify_digest};
