// 🔑 Identity Assigner - Content address for a canonical transaction
// transaction_id = sha256(compact JSON of the fields sorted by key)

use crate::canonical::CanonicalFields;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Length of a transaction id (hex-encoded SHA-256)
pub const ID_LEN: usize = 64;

/// Hash an arbitrary canonical field map
///
/// Insertion order is irrelevant: fields are sorted by key before
/// serialization. No clock, no randomness, so identical fields give the
/// identical id in every process and every run.
pub fn content_hash<K, I>(fields: I) -> String
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    let sorted: BTreeMap<String, Value> = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
    let object: Map<String, Value> = sorted.into_iter().collect();
    let serialized = Value::Object(object).to_string();

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Id of a canonical transaction (status and metadata are never inputs)
pub fn transaction_id(fields: &CanonicalFields) -> String {
    content_hash(fields.to_field_map())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> CanonicalFields {
        CanonicalFields {
            timestamp: "2025-01-01T00:00:00".to_string(),
            description: "Test transaction".to_string(),
            amount: 100.0,
            currency: "USD".to_string(),
            source: "LegalCodex".to_string(),
            account_number: Some("12345".to_string()),
        }
    }

    #[test]
    fn test_transaction_id_is_stable() {
        let id1 = transaction_id(&sample());
        let id2 = transaction_id(&sample());

        assert_eq!(id1, id2, "Same fields should produce same id");
        assert_eq!(id1.len(), ID_LEN, "SHA-256 hash should be 64 hex characters");
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_transaction_id_changes_with_any_field() {
        let base = transaction_id(&sample());

        let mut other = sample();
        other.amount = 100.01;
        assert_ne!(base, transaction_id(&other));

        let mut other = sample();
        other.account_number = None;
        assert_ne!(base, transaction_id(&other));

        let mut other = sample();
        other.source = "Comet".to_string();
        assert_ne!(base, transaction_id(&other));
    }

    #[test]
    fn test_content_hash_matches_canonical_serialization() {
        // Known serialization: keys sorted, compact separators
        let expected = {
            let mut hasher = Sha256::new();
            hasher.update(br#"{"a":1,"b":"x"}"#);
            format!("{:x}", hasher.finalize())
        };

        assert_eq!(content_hash([("b", Value::from("x")), ("a", Value::from(1))]), expected);
    }

    proptest! {
        #[test]
        fn prop_hash_ignores_insertion_order(
            fields in prop::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,24}", 1..8),
            rotate in 0usize..8,
        ) {
            let forward: Vec<(String, Value)> =
                fields.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))).collect();

            let mut reversed = forward.clone();
            reversed.reverse();

            let mut rotated = forward.clone();
            let n = rotated.len();
            rotated.rotate_left(rotate % n);

            let id = content_hash(forward.clone());
            prop_assert_eq!(&id, &content_hash(reversed));
            prop_assert_eq!(&id, &content_hash(rotated));
            prop_assert_eq!(&id, &content_hash(forward));
        }
    }
}
