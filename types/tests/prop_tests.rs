use proptest::prelude::*;

use peerlink_types::{Hash256, PublicKey, Timestamp, TypesError};

proptest! {
    /// Hex of any length other than 32 bytes is refused with the actual length.
    #[test]
    fn hash_rejects_wrong_length_hex(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assume!(bytes.len() != 32);
        let err = hex::encode(&bytes).parse::<Hash256>().unwrap_err();
        prop_assert_eq!(err, TypesError::InvalidLength { expected: 32, actual: bytes.len() });
    }

    #[test]
    fn hash_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        prop_assert_eq!(Hash256::new(bytes).is_zero(), bytes == [0u8; 32]);
    }

    /// The log form of a node id is a prefix of its full hex form.
    #[test]
    fn public_key_short_is_display_prefix(bytes in prop::array::uniform32(0u8..)) {
        let key = PublicKey(bytes);
        let full = key.to_string();
        prop_assert_eq!(full.len(), 64);
        prop_assert!(full.starts_with(&key.short()));
    }

    #[test]
    fn timestamp_has_expired_correct(
        start in 0u64..500_000,
        duration in 1u64..500_000,
        offset in 0u64..1_000_000,
    ) {
        let t = Timestamp::new(start);
        let now = Timestamp::new(start.saturating_add(offset));
        prop_assert_eq!(t.has_expired(duration, now), offset >= duration);
        prop_assert_eq!(t.elapsed_since(now), offset);
    }

    /// plus_secs saturates instead of wrapping.
    #[test]
    fn timestamp_plus_secs_saturates(start in 0u64..u64::MAX, add in 0u64..u64::MAX) {
        let t = Timestamp::new(start).plus_secs(add);
        prop_assert_eq!(t.as_secs(), start.saturating_add(add));
    }
}
