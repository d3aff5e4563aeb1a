//! Label ↔ subject-key mapping.
//!
//! The mapping is computed from scratch on every training run from the full
//! subject list and is never mutated afterwards. Its fingerprint ties a
//! classifier artifact to the exact mapping it was trained against.

use crate::lbph::Label;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Immutable bidirectional mapping between classifier labels and subject keys.
///
/// Serialized as a JSON object keyed by the integer label, e.g. `{"1": "SV001"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Label, String>", into = "BTreeMap<Label, String>")]
pub struct LabelMapping {
    by_label: BTreeMap<Label, String>,
    by_key: HashMap<String, Label>,
}

impl LabelMapping {
    /// Assign labels 1, 2, 3, … to keys in first-seen order. Repeated keys keep
    /// their first label.
    pub fn build<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut by_label = BTreeMap::new();
        let mut by_key = HashMap::new();
        let mut next: Label = 1;
        for key in keys {
            if by_key.contains_key(key) {
                continue;
            }
            by_key.insert(key.to_string(), next);
            by_label.insert(next, key.to_string());
            next += 1;
        }
        Self { by_label, by_key }
    }

    /// Subject key for `label`, or `None` for a label this mapping never issued.
    pub fn resolve(&self, label: Label) -> Option<&str> {
        self.by_label.get(&label).map(String::as_str)
    }

    pub fn label_of(&self, key: &str) -> Option<Label> {
        self.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.by_label.iter().map(|(l, k)| (*l, k.as_str()))
    }

    /// Hex SHA-256 over the `label=key` pairs in label order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (label, key) in &self.by_label {
            hasher.update(label.to_le_bytes());
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl From<BTreeMap<Label, String>> for LabelMapping {
    fn from(by_label: BTreeMap<Label, String>) -> Self {
        let by_key = by_label.iter().map(|(l, k)| (k.clone(), *l)).collect();
        Self { by_label, by_key }
    }
}

impl From<LabelMapping> for BTreeMap<Label, String> {
    fn from(mapping: LabelMapping) -> Self {
        mapping.by_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_start_at_one_in_first_seen_order() {
        let m = LabelMapping::build(["SV010", "SV002", "SV007"]);
        assert_eq!(m.label_of("SV010"), Some(1));
        assert_eq!(m.label_of("SV002"), Some(2));
        assert_eq!(m.label_of("SV007"), Some(3));
        assert_eq!(m.resolve(2), Some("SV002"));
    }

    #[test]
    fn test_duplicate_keys_keep_first_label() {
        let m = LabelMapping::build(["a", "b", "a"]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.label_of("a"), Some(1));
        assert_eq!(m.label_of("b"), Some(2));
    }

    #[test]
    fn test_unknown_label_does_not_resolve() {
        let m = LabelMapping::build(["a"]);
        assert_eq!(m.resolve(0), None);
        assert_eq!(m.resolve(2), None);
    }

    #[test]
    fn test_build_is_pure() {
        // A second run over the same subjects yields the same mapping.
        let keys = ["x", "y", "z"];
        assert_eq!(LabelMapping::build(keys), LabelMapping::build(keys));
    }

    #[test]
    fn test_json_is_keyed_by_label() {
        let m = LabelMapping::build(["SV001", "SV002"]);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"1":"SV001","2":"SV002"}"#);
        let back: LabelMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back.label_of("SV002"), Some(2));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = LabelMapping::build(["a", "b"]);
        let b = LabelMapping::build(["b", "a"]);
        assert_eq!(a.fingerprint(), LabelMapping::build(["a", "b"]).fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
