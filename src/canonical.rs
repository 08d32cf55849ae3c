//! Canonical serialization for deterministic hashing.
//!
//! This module provides functions to serialize protocol entities in a
//! canonical, deterministic textual form suitable for hashing, idempotency
//! checks, and replay verification.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable Vec order: vectors serialize in index order
//! - No HashMap allowed: use BTreeMap for maps in hashed data
//! - Enum values serialize as lowercase snake_case strings
//! - Floats that participate in a policy hash are quantized first

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Quantization factor for float normalization.
/// Floats are multiplied by this value and rounded to i64 before hashing.
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// This function produces deterministic output for the same input,
/// suitable for hash computation and replay verification.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Serialize a value to its canonical textual form.
///
/// Round-trip through [`serde_json::from_str`] is exact on every field,
/// including enum spellings.
pub fn to_canonical_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("Canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// Quantize a float to an i64 for deterministic hashing.
///
/// Policy parameters are quantized before hashing so that the same
/// configuration always produces the same replay fingerprint across
/// platforms and serializer versions.
pub fn quantize_float(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestStruct {
        name: String,
        value: i32,
    }

    #[test]
    fn test_determinism() {
        let s = TestStruct {
            name: "test".to_string(),
            value: 42,
        };

        let h1 = canonical_hash(&s);
        let h2 = canonical_hash(&s);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = TestStruct {
            name: "a".to_string(),
            value: 1,
        };
        let b = TestStruct {
            name: "a".to_string(),
            value: 2,
        };
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_quantize_float() {
        assert_eq!(quantize_float(0.6), 600_000);
        assert_eq!(quantize_float(0.0), 0);
        assert_eq!(quantize_float(1.0), quantize_float(1.0000000001));
    }
}
