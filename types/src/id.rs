//! Digests and chain object identifiers.
//!
//! A [`BlockId`] is a digest whose high 32 bits are replaced by the block
//! number, so both ordering and number are recoverable from the id alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 256-bit Blake2b digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Default for Digest {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Digest {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A block identifier: a digest with the block number spliced into the
/// first four bytes (big-endian).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockId([u8; 32]);

impl BlockId {
    /// The id of the empty chain (head of a chain with no blocks).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Build an id from a header digest and the block's number.
    pub fn new(digest: Digest, block_num: u32) -> Self {
        let mut bytes = digest.0;
        bytes[..4].copy_from_slice(&block_num.to_be_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The block number embedded in the high 32 bits.
    pub fn block_num(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// The 32-bit prefix transactions pin themselves to (TaPoS).
    /// Taken from the interior of the id so it stays independent of the
    /// spliced block number.
    pub fn ref_prefix(&self) -> u32 {
        u32::from_le_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId(#{} ", self.block_num())?;
        for b in &self.0[4..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A transaction identifier: the digest of the transaction's canonical bytes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TransactionId(pub Digest);

impl TransactionId {
    pub const ZERO: Self = Self(Digest::ZERO);

    pub fn new(digest: Digest) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId(")?;
        for b in &self.0 .0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_embeds_number() {
        let digest = Digest::new([0xAB; 32]);
        let id = BlockId::new(digest, 7_654_321);
        assert_eq!(id.block_num(), 7_654_321);
        // body bytes are untouched
        assert_eq!(&id.as_bytes()[4..], &[0xAB; 28]);
    }

    #[test]
    fn zero_id_is_block_zero() {
        assert_eq!(BlockId::ZERO.block_num(), 0);
        assert!(BlockId::ZERO.is_zero());
    }

    #[test]
    fn ref_prefix_ignores_spliced_number() {
        let digest = Digest::new([0x5A; 32]);
        let a = BlockId::new(digest, 1);
        let b = BlockId::new(digest, 99);
        assert_eq!(a.ref_prefix(), b.ref_prefix());
    }

    #[test]
    fn ids_order_by_number_first() {
        let lo = BlockId::new(Digest::new([0xFF; 32]), 1);
        let hi = BlockId::new(Digest::new([0x00; 32]), 2);
        assert!(lo < hi);
    }
}
