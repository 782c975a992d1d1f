//! Property tests for the identifier and time primitives.

use proptest::prelude::*;

use cascade_types::params::BLOCK_INTERVAL_MS;
use cascade_types::{AccountName, BlockId, BlockTimestamp, Digest, TimePoint};

proptest! {
    /// Digest round trip: new -> as_bytes is the identity.
    #[test]
    fn digest_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let digest = Digest::new(bytes);
        prop_assert_eq!(digest.as_bytes(), &bytes);
        prop_assert_eq!(digest.is_zero(), bytes == [0u8; 32]);
    }

    /// A block id always reports the number it was spliced with, whatever
    /// the digest bytes underneath.
    #[test]
    fn block_id_number_recoverable(
        bytes in prop::array::uniform32(0u8..),
        num in any::<u32>(),
    ) {
        let id = BlockId::new(Digest::new(bytes), num);
        prop_assert_eq!(id.block_num(), num);
        // the body bytes survive the splice
        prop_assert_eq!(&id.as_bytes()[4..], &bytes[4..]);
    }

    /// The TaPoS prefix never depends on the spliced block number.
    #[test]
    fn ref_prefix_independent_of_number(
        bytes in prop::array::uniform32(0u8..),
        num_a in any::<u32>(),
        num_b in any::<u32>(),
    ) {
        let digest = Digest::new(bytes);
        prop_assert_eq!(
            BlockId::new(digest, num_a).ref_prefix(),
            BlockId::new(digest, num_b).ref_prefix()
        );
    }

    /// Timestamps truncate to slots consistently: converting back never
    /// moves forward in time, and exact boundaries round-trip.
    #[test]
    fn timestamp_truncation(ms in 0u64..u32::MAX as u64 * BLOCK_INTERVAL_MS) {
        let t = TimePoint::from_millis(ms);
        let slot = BlockTimestamp::from_time_point(t);
        prop_assert!(slot.to_time_point() <= t);
        prop_assert_eq!(BlockTimestamp::from_time_point(slot.to_time_point()), slot);
    }

    /// Name ordering agrees with the underlying string ordering, which is
    /// what sorted scope lists rely on.
    #[test]
    fn name_ordering_is_string_ordering(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
        let name_a = AccountName::new(a.clone());
        let name_b = AccountName::new(b.clone());
        prop_assert_eq!(name_a.cmp(&name_b), a.cmp(&b));
    }
}
