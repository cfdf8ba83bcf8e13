//! Correlation ids
//!
//! Each request carries one; generated at the boundary when absent and
//! echoed in logs, problem responses and downstream calls.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopt an id supplied by the caller, if it is usable
    ///
    /// Anything non-empty and reasonably sized is accepted; correlation
    /// ids are opaque to this service.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn test_parse_rejects_empty_and_oversized() {
        assert!(CorrelationId::parse("").is_none());
        assert!(CorrelationId::parse("   ").is_none());
        assert!(CorrelationId::parse(&"x".repeat(200)).is_none());
        assert_eq!(
            CorrelationId::parse(" abc ").unwrap().as_str(),
            "abc"
        );
    }
}
