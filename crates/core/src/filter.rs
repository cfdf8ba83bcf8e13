//! Typed filter values
//!
//! Search filters arrive as free-form JSON maps; internally they are a
//! tagged variant so downstream code never probes dynamic keys. The
//! canonical digest sorts keys and serialises deterministically so that
//! identical filters always produce identical cache keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single filter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
}

impl FilterValue {
    fn canonical(&self) -> String {
        match self {
            FilterValue::String(s) => format!("s:{}", s),
            // Ryu-style shortest form is not stable across platforms for
            // all inputs; fixed precision keeps the digest deterministic.
            FilterValue::Number(n) => format!("n:{:.6}", n),
            FilterValue::Bool(b) => format!("b:{}", b),
            FilterValue::List(items) => format!("l:{}", items.join("\x1f")),
        }
    }
}

/// An ordered filter map; `BTreeMap` keeps iteration deterministic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(pub BTreeMap<String, FilterValue>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FilterValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic digest over sorted key/value pairs
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.0 {
            hasher.update(key.as_bytes());
            hasher.update([0x1e]);
            hasher.update(value.canonical().as_bytes());
            hasher.update([0x1d]);
        }
        hex_prefix(hasher.finalize().as_slice(), 16)
    }
}

/// Hex-encode the first `n` bytes of a digest
pub fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_order_independent() {
        let mut a = Filters::new();
        a.insert("category", FilterValue::String("faq".into()));
        a.insert("active", FilterValue::Bool(true));

        let mut b = Filters::new();
        b.insert("active", FilterValue::Bool(true));
        b.insert("category", FilterValue::String("faq".into()));

        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_distinguishes_values() {
        let mut a = Filters::new();
        a.insert("k", FilterValue::String("x".into()));
        let mut b = Filters::new();
        b.insert("k", FilterValue::String("y".into()));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_untagged_deserialization() {
        let parsed: Filters =
            serde_json::from_str(r#"{"n": 3.5, "s": "a", "b": true, "l": ["x","y"]}"#).unwrap();
        assert_eq!(parsed.get("n"), Some(&FilterValue::Number(3.5)));
        assert_eq!(parsed.get("b"), Some(&FilterValue::Bool(true)));
        assert_eq!(
            parsed.get("l"),
            Some(&FilterValue::List(vec!["x".into(), "y".into()]))
        );
    }
}
