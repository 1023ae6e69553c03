//! Property-based tests for cache entry formats.
//!
//! # Properties Tested
//!
//! 1. **Envelope Property**: every plain entry starts with magic + version
//! 2. **Corruption Property**: bad magic, wrong version and truncation are rejected
//! 3. **Sentinel Property**: no encoded entity is ever mistaken for cached absence
//! 4. **Logical Expiry Property**: timestamps survive storage to the millisecond
//!    and expiry is monotonic in time
//! 5. **Backoff Property**: lock backoff never shrinks and never exceeds its cap

use cache_shield::serialization::{
    deserialize_from_cache, is_null_sentinel, json, serialize_for_cache, CacheEnvelope,
    LogicalExpiryEnvelope, CACHE_MAGIC, CURRENT_SCHEMA_VERSION,
};
use cache_shield::{CacheConfig, Error};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Test Entities
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Shop {
    id: u64,
    name: String,
    type_id: u32,
    score: i32,
    tags: Vec<String>,
}

fn arb_shop() -> impl Strategy<Value = Shop> {
    (
        any::<u64>(),
        any::<String>(),
        any::<u32>(),
        any::<i32>(),
        prop::collection::vec(any::<String>(), 0..8),
    )
        .prop_map(|(id, name, type_id, score, tags)| Shop {
            id,
            name,
            type_id,
            score,
            tags,
        })
}

// ============================================================================
// Property 1: Envelope Property
// ============================================================================

proptest! {
    /// Property: every serialized entry carries the magic header and decodes back
    #[test]
    fn prop_envelope_header(shop in arb_shop()) {
        let bytes = serialize_for_cache(&shop).expect("Serialization should succeed");

        prop_assert_eq!(&bytes[0..4], &CACHE_MAGIC[..]);

        let envelope: CacheEnvelope<Shop> =
            postcard::from_bytes(&bytes).expect("Envelope should decode");
        prop_assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        prop_assert_eq!(envelope.payload, shop);
    }
}

// ============================================================================
// Property 2: Corruption Property
// ============================================================================

proptest! {
    /// Property: a corrupted magic header is always rejected
    #[test]
    fn prop_corrupted_magic_detected(shop in arb_shop(), junk in any::<[u8; 4]>()) {
        prop_assume!(junk != CACHE_MAGIC);

        let mut bytes = serialize_for_cache(&shop).expect("Serialization should succeed");
        bytes[0..4].copy_from_slice(&junk);

        let result: Result<Shop, Error> = deserialize_from_cache(&bytes);
        prop_assert!(matches!(result, Err(Error::InvalidCacheEntry(_))));
    }

    /// Property: entries from another schema version are always rejected
    #[test]
    fn prop_wrong_version_detected(shop in arb_shop(), version in any::<u32>()) {
        prop_assume!(version != CURRENT_SCHEMA_VERSION);

        let envelope = CacheEnvelope {
            magic: CACHE_MAGIC,
            version,
            payload: shop,
        };
        let bytes = postcard::to_allocvec(&envelope).expect("Encoding should succeed");

        let result: Result<Shop, Error> = deserialize_from_cache(&bytes);
        let mismatch =
            matches!(result, Err(Error::VersionMismatch { found, .. }) if found == version);
        prop_assert!(mismatch, "expected VersionMismatch for v{}", version);
    }

    /// Property: truncated logical envelopes are always rejected
    #[test]
    fn prop_truncated_logical_envelope_detected(
        data in prop::collection::vec(any::<u8>(), 1..256),
        expire_at in any::<u64>(),
        cut in 0usize..1000,
    ) {
        let bytes = LogicalExpiryEnvelope::expiring_at(data, expire_at)
            .to_bytes()
            .expect("Serialization should succeed");
        let truncated = &bytes[..cut % bytes.len()];

        prop_assert!(LogicalExpiryEnvelope::from_bytes(truncated).is_err());
    }
}

// ============================================================================
// Property 3: Sentinel Property
// ============================================================================

proptest! {
    /// Property: neither codec ever produces the null sentinel
    #[test]
    fn prop_entities_never_look_like_sentinel(shop in arb_shop()) {
        let postcard_bytes = serialize_for_cache(&shop).expect("Serialization should succeed");
        let json_bytes = json::serialize_for_cache(&shop).expect("Serialization should succeed");

        prop_assert!(!is_null_sentinel(&postcard_bytes));
        prop_assert!(!is_null_sentinel(&json_bytes));
    }

    /// Property: a logical envelope around any payload is never the sentinel
    #[test]
    fn prop_logical_envelope_never_looks_like_sentinel(
        data in prop::collection::vec(any::<u8>(), 0..64),
        expire_at in any::<u64>(),
    ) {
        let bytes = LogicalExpiryEnvelope::expiring_at(data, expire_at)
            .to_bytes()
            .expect("Serialization should succeed");
        prop_assert!(!is_null_sentinel(&bytes));
    }
}

// ============================================================================
// Property 4: Logical Expiry Property
// ============================================================================

proptest! {
    /// Property: the expiry timestamp and payload survive storage exactly
    #[test]
    fn prop_logical_timestamp_preserved(shop in arb_shop(), expire_at in any::<u64>()) {
        let data = serialize_for_cache(&shop).expect("Serialization should succeed");
        let envelope = LogicalExpiryEnvelope::expiring_at(data, expire_at);

        let decoded = LogicalExpiryEnvelope::from_bytes(
            &envelope.to_bytes().expect("Serialization should succeed"),
        )
        .expect("Envelope should decode");

        prop_assert_eq!(decoded.expire_at_millis, expire_at);
        let inner: Shop = deserialize_from_cache(&decoded.data).expect("Payload should decode");
        prop_assert_eq!(inner, shop);
    }

    /// Property: once expired, an envelope stays expired
    #[test]
    fn prop_expiry_is_monotonic(expire_at in any::<u64>(), now in any::<u64>(), later in any::<u64>()) {
        let envelope = LogicalExpiryEnvelope::expiring_at(Vec::new(), expire_at);
        let later = now.saturating_add(later);

        if envelope.is_expired_at(now) {
            prop_assert!(envelope.is_expired_at(later));
        }
        prop_assert_eq!(envelope.is_expired_at(now), expire_at <= now);
    }

    /// Property: a future expiry is not expired now
    #[test]
    fn prop_future_expiry_is_fresh(ttl_secs in 1u64..(10 * 365 * 24 * 3600)) {
        let envelope = LogicalExpiryEnvelope::expiring_in(Vec::new(), Duration::from_secs(ttl_secs));

        prop_assert!(!envelope.is_expired());
        prop_assert!(envelope.remaining() <= Duration::from_secs(ttl_secs));
    }
}

// ============================================================================
// Property 5: Backoff Property
// ============================================================================

proptest! {
    /// Property: backoff grows monotonically and respects the cap
    #[test]
    fn prop_backoff_monotonic_and_capped(
        initial_ms in 1u64..500,
        cap_factor in 1u64..64,
        attempt in 1u32..200,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let cap = Duration::from_millis(initial_ms * cap_factor);
        let config = CacheConfig::default().with_lock_retry(initial, cap, 100);

        let current = config.backoff_for(attempt);
        let next = config.backoff_for(attempt + 1);

        prop_assert!(current >= initial);
        prop_assert!(current <= cap);
        prop_assert!(next >= current);
    }
}
