//! Signed transactions: actions, scopes, TaPoS pinning, and signatures.
//!
//! Signatures carry their public key. Ed25519 has no key recovery, so each
//! signature is a `(key, signature)` pair over the transaction's signing
//! digest, and [`SignedTransaction::signature_keys`] verifies every pair
//! before handing the key set to the authority checker.

use crate::error::ChainError;
use cascade_crypto::{digest, digest_parts, sign_digest, verify_digest};
use cascade_types::{
    AccountName, ActionName, BlockId, Digest, KeyPair, PermissionName, PublicKey, Signature,
    TimePoint, TransactionId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An (actor, permission) pair an action claims to act under.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: AccountName,
    pub permission: PermissionName,
}

impl fmt::Debug for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.permission)
    }
}

/// One action of a transaction: a payload delivered to a contract scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// The contract account the action is addressed to.
    pub scope: AccountName,
    pub name: ActionName,
    pub authorization: Vec<PermissionLevel>,
    pub payload: Vec<u8>,
}

/// The unsigned body of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// Low 16 bits of the referenced block's number (TaPoS).
    pub ref_block_num: u16,
    /// Interior prefix of the referenced block's id (TaPoS).
    pub ref_block_prefix: u32,
    pub expiration: TimePoint,
    /// Strictly sorted, unique, disjoint from `write_scope`.
    pub read_scope: Vec<AccountName>,
    /// Strictly sorted, unique; must cover every authorizing actor.
    pub write_scope: Vec<AccountName>,
    pub actions: Vec<Action>,
}

fn put_str(buffer: &mut Vec<u8>, s: &str) {
    buffer.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buffer.extend_from_slice(s.as_bytes());
}

impl Transaction {
    /// Canonical digest over every field, in declaration order. Strings are
    /// length-prefixed so adjacent names can never alias.
    pub fn digest(&self) -> Digest {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(&self.ref_block_num.to_be_bytes());
        buffer.extend_from_slice(&self.ref_block_prefix.to_be_bytes());
        buffer.extend_from_slice(&self.expiration.as_millis().to_be_bytes());
        buffer.extend_from_slice(&(self.read_scope.len() as u32).to_be_bytes());
        for scope in &self.read_scope {
            put_str(&mut buffer, scope.as_str());
        }
        buffer.extend_from_slice(&(self.write_scope.len() as u32).to_be_bytes());
        for scope in &self.write_scope {
            put_str(&mut buffer, scope.as_str());
        }
        buffer.extend_from_slice(&(self.actions.len() as u32).to_be_bytes());
        for act in &self.actions {
            put_str(&mut buffer, act.scope.as_str());
            put_str(&mut buffer, act.name.as_str());
            buffer.extend_from_slice(&(act.authorization.len() as u32).to_be_bytes());
            for auth in &act.authorization {
                put_str(&mut buffer, auth.actor.as_str());
                put_str(&mut buffer, auth.permission.as_str());
            }
            buffer.extend_from_slice(&(act.payload.len() as u32).to_be_bytes());
            buffer.extend_from_slice(&act.payload);
        }
        digest(&buffer)
    }

    pub fn id(&self) -> TransactionId {
        TransactionId::new(self.digest())
    }

    /// The digest signatures are made over: the chain id bound to the
    /// transaction digest, so signatures cannot be replayed across chains.
    pub fn signing_digest(&self, chain_id: &Digest) -> Digest {
        digest_parts(&[chain_id.as_bytes(), self.digest().as_bytes()])
    }

    /// TaPoS: does this transaction reference the given block?
    pub fn verify_reference_block(&self, id: &BlockId) -> bool {
        self.ref_block_num == (id.block_num() & 0xffff) as u16
            && self.ref_block_prefix == id.ref_prefix()
    }

    /// Set the TaPoS fields to reference `id`.
    pub fn set_reference_block(&mut self, id: &BlockId) {
        self.ref_block_num = (id.block_num() & 0xffff) as u16;
        self.ref_block_prefix = id.ref_prefix();
    }
}

/// A transaction signature together with the key that made it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSignature {
    pub key: PublicKey,
    pub signature: Signature,
}

/// A transaction plus its signatures.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<AccountSignature>,
}

impl SignedTransaction {
    pub fn new(transaction: Transaction) -> Self {
        Self { transaction, signatures: Vec::new() }
    }

    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }

    /// Append a signature over the signing digest for `chain_id`.
    pub fn sign(&mut self, key_pair: &KeyPair, chain_id: &Digest) {
        let signing_digest = self.transaction.signing_digest(chain_id);
        self.signatures.push(AccountSignature {
            key: key_pair.public,
            signature: sign_digest(&signing_digest, &key_pair.private),
        });
    }

    /// Verify every signature and return the set of signing keys.
    ///
    /// Any invalid pair fails the whole transaction; a signature that does
    /// not verify is indistinguishable from garbage and must not be
    /// silently dropped.
    pub fn signature_keys(&self, chain_id: &Digest) -> Result<BTreeSet<PublicKey>, ChainError> {
        let signing_digest = self.transaction.signing_digest(chain_id);
        let mut keys = BTreeSet::new();
        for sig in &self.signatures {
            if !verify_digest(&signing_digest, &sig.signature, &sig.key) {
                return Err(ChainError::TxInvalidSignature { id: self.id() });
            }
            keys.insert(sig.key);
        }
        Ok(keys)
    }

    /// Serialized size in bytes, as charged against bandwidth and the
    /// pending block size limit.
    pub fn billable_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_crypto::keypair_from_seed;

    fn sample_transaction() -> Transaction {
        Transaction {
            ref_block_num: 1,
            ref_block_prefix: 0xDEAD_BEEF,
            expiration: TimePoint::from_secs(60),
            read_scope: vec![AccountName::new("bob")],
            write_scope: vec![AccountName::new("alice")],
            actions: vec![Action {
                scope: AccountName::new("alice"),
                name: ActionName::new("transfer"),
                authorization: vec![PermissionLevel {
                    actor: AccountName::new("alice"),
                    permission: PermissionName::new("active"),
                }],
                payload: vec![1, 2, 3],
            }],
        }
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(sample_transaction().id(), sample_transaction().id());
    }

    #[test]
    fn id_changes_with_content() {
        let mut trx = sample_transaction();
        trx.actions[0].payload.push(4);
        assert_ne!(trx.id(), sample_transaction().id());
    }

    #[test]
    fn scope_lists_cannot_alias_in_digest() {
        let mut a = sample_transaction();
        a.read_scope = vec![AccountName::new("ab"), AccountName::new("c")];
        let mut b = sample_transaction();
        b.read_scope = vec![AccountName::new("a"), AccountName::new("bc")];
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn sign_and_recover_keys() {
        let kp = keypair_from_seed(&[1u8; 32]);
        let chain_id = Digest::new([9u8; 32]);
        let mut strx = SignedTransaction::new(sample_transaction());
        strx.sign(&kp, &chain_id);

        let keys = strx.signature_keys(&chain_id).unwrap();
        assert!(keys.contains(&kp.public));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn wrong_chain_id_fails_signature() {
        let kp = keypair_from_seed(&[1u8; 32]);
        let mut strx = SignedTransaction::new(sample_transaction());
        strx.sign(&kp, &Digest::new([9u8; 32]));
        assert!(strx.signature_keys(&Digest::new([8u8; 32])).is_err());
    }

    #[test]
    fn tapos_round_trip() {
        let id = BlockId::new(Digest::new([0x42; 32]), 70_000);
        let mut trx = sample_transaction();
        trx.set_reference_block(&id);
        assert!(trx.verify_reference_block(&id));
        assert_eq!(trx.ref_block_num, (70_000 & 0xffff) as u16);

        let other = BlockId::new(Digest::new([0x43; 32]), 70_000);
        assert!(!trx.verify_reference_block(&other));
    }
}
