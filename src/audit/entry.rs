//! Audit Ledger Entry
//!
//! Defines the structure for tamper-evident ledger entries
//! and the hash chain that links them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Previous-hash sentinel carried by the first entry of a fresh ledger.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Result of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Success,
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

/// Immutable ledger entry with cryptographic hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` marks a system-originated entry.
    pub actor: Option<String>,
    pub action: String,
    pub resource: String,
    pub method: Option<String>,
    pub origin: Option<String>,
    pub outcome: Outcome,
    pub details: Value,
    pub previous_hash: String,
    pub hash: String,
}

/// Fields supplied by the caller when appending; the ledger assigns
/// sequence, timestamp and both hashes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewAuditEntry {
    pub actor: Option<String>,
    pub action: String,
    pub resource: String,
    pub method: Option<String>,
    pub origin: Option<String>,
    pub outcome: Outcome,
    pub details: Value,
}

impl NewAuditEntry {
    pub fn new(action: impl Into<String>, resource: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            outcome,
            details: Value::Null,
            ..Default::default()
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl AuditEntry {
    /// Seal pending fields into a chained entry
    pub fn seal(
        fields: NewAuditEntry,
        sequence: u64,
        timestamp: DateTime<Utc>,
        previous_hash: String,
    ) -> Self {
        let mut entry = Self {
            sequence,
            timestamp,
            actor: fields.actor,
            action: fields.action,
            resource: fields.resource,
            method: fields.method,
            origin: fields.origin,
            outcome: fields.outcome,
            details: fields.details,
            previous_hash,
            hash: String::new(),
        };

        entry.hash = entry.calculate_hash();
        entry
    }

    /// Canonical serialization of every field except the two hashes.
    ///
    /// Values are JSON-encoded so `None` and `Some("")` never collide and
    /// separators inside strings cannot shift field boundaries.
    pub fn canonical_string(&self) -> String {
        format!(
            "sequence:{}|timestamp:{}|actor:{}|action:{}|resource:{}|method:{}|origin:{}|outcome:{}|details:{}",
            self.sequence,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            Value::from(self.actor.clone()),
            Value::from(self.action.as_str()),
            Value::from(self.resource.as_str()),
            Value::from(self.method.clone()),
            Value::from(self.origin.clone()),
            self.outcome,
            self.details
        )
    }

    /// Recompute this entry's digest from its content and stored previous hash
    pub fn calculate_hash(&self) -> String {
        chain_digest(&self.canonical_string(), &self.previous_hash)
    }

    /// Verify this entry's stored hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn is_system(&self) -> bool {
        self.actor.is_none()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} {} on {} ({})",
            self.sequence,
            self.actor.as_deref().unwrap_or("system"),
            self.action,
            self.resource,
            self.outcome
        )
    }
}

/// Chain link digest: `sha256(canonical ++ previous_hash)`.
pub fn chain_digest(canonical: &str, previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(previous_hash.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample(previous: &str) -> AuditEntry {
        AuditEntry::seal(
            NewAuditEntry::new("login", "auth", Outcome::Success)
                .with_actor("alice")
                .with_origin("10.0.0.1")
                .with_details(json!({"method": "password"})),
            1,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            previous.to_string(),
        )
    }

    #[test]
    fn test_entry_sealing() {
        let entry = sample(GENESIS_PREVIOUS_HASH);

        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.previous_hash, "0");
        assert!(entry.verify_hash());
        assert!(!entry.is_system());
    }

    #[test]
    fn test_hash_calculation() {
        let entry = sample(GENESIS_PREVIOUS_HASH);

        let hash1 = entry.calculate_hash();
        let hash2 = entry.calculate_hash();
        assert_eq!(hash1, hash2);
        assert!(hash1.starts_with("sha256:"));
        assert_eq!(hash1.len(), 71); // "sha256:" + 64 hex chars
    }

    #[test]
    fn test_hash_depends_on_previous_hash() {
        let a = sample(GENESIS_PREVIOUS_HASH);
        let b = sample("sha256:other");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_absent_actor_differs_from_empty_actor() {
        let mut entry = sample(GENESIS_PREVIOUS_HASH);
        entry.actor = None;
        let system_hash = entry.calculate_hash();
        entry.actor = Some(String::new());
        assert_ne!(system_hash, entry.calculate_hash());
    }

    #[test]
    fn test_tampered_field_breaks_hash() {
        let mut entry = sample(GENESIS_PREVIOUS_HASH);
        entry.outcome = Outcome::Failure;
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_json_round_trip_keeps_hash_valid() {
        let entry = sample(GENESIS_PREVIOUS_HASH);
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
        assert!(parsed.verify_hash());
    }

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("failure".parse::<Outcome>().unwrap(), Outcome::Failure);
        assert!("maybe".parse::<Outcome>().is_err());
    }
}
