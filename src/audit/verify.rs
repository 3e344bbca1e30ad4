//! Audit Ledger Verification
//!
//! Walks a partition from its anchor, recomputing every digest, and
//! reports the first entry whose link does not hold.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::audit::entry::AuditEntry;
use crate::audit::store::{read_entries, ChainAnchor};
use crate::error::{AuditError, Result};

/// Verification result for one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub first_bad_sequence: Option<u64>,
    pub entries_checked: usize,
    pub reason: Option<String>,
}

impl IntegrityReport {
    fn ok(entries_checked: usize) -> Self {
        Self {
            valid: true,
            first_bad_sequence: None,
            entries_checked,
            reason: None,
        }
    }

    pub(crate) fn broken(sequence: u64, entries_checked: usize, reason: String) -> Self {
        Self {
            valid: false,
            first_bad_sequence: Some(sequence),
            entries_checked,
            reason: Some(reason),
        }
    }

    /// Convert a failed report into `IntegrityViolation`
    pub fn into_result(self) -> Result<()> {
        match self.first_bad_sequence {
            Some(sequence) if !self.valid => Err(AuditError::integrity_violation(
                sequence,
                self.reason.unwrap_or_else(|| "hash chain broken".to_string()),
            )),
            _ => Ok(()),
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self.first_bad_sequence {
            None => format!("Audit ledger is valid ({} entries)", self.entries_checked),
            Some(sequence) => format!(
                "Audit ledger is invalid: first bad sequence {} ({})",
                sequence,
                self.reason.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Verify a partition's hash chain starting from `anchor`.
///
/// Each position must hold the next sequence number, link to the previous
/// entry's stored hash, and reproduce its own stored hash. The reported
/// sequence is the one expected at the failing position, so a tampered
/// sequence field is still reported where it sits.
pub fn verify_chain(anchor: &ChainAnchor, entries: &[AuditEntry]) -> IntegrityReport {
    let mut expected_sequence = anchor.sequence;
    let mut expected_previous = anchor.hash.as_str();

    for (i, entry) in entries.iter().enumerate() {
        expected_sequence += 1;

        if entry.sequence != expected_sequence {
            let reason = format!(
                "sequence gap: expected {}, found {}",
                expected_sequence, entry.sequence
            );
            warn!("Integrity check failed: {}", reason);
            return IntegrityReport::broken(expected_sequence, i + 1, reason);
        }

        if entry.previous_hash != expected_previous {
            let reason = format!(
                "hash chain broken: expected previous {}, got {}",
                expected_previous, entry.previous_hash
            );
            warn!("Integrity check failed at {}: {}", expected_sequence, reason);
            return IntegrityReport::broken(expected_sequence, i + 1, reason);
        }

        if !entry.verify_hash() {
            let reason = "entry content does not match its hash".to_string();
            warn!("Integrity check failed at {}: {}", expected_sequence, reason);
            return IntegrityReport::broken(expected_sequence, i + 1, reason);
        }

        expected_previous = entry.hash.as_str();
    }

    debug!("Verified {} entries", entries.len());
    IntegrityReport::ok(entries.len())
}

/// Verify a partition re-read from storage against the copy this process
/// holds.
///
/// The stored chain must verify from its stored anchor, start where the
/// held copy starts, and contain exactly the held entries. A stored chain
/// that was re-sealed after an edit still differs from the held entry.
pub fn verify_stored(
    expected_anchor: &ChainAnchor,
    expected: &[AuditEntry],
    stored_anchor: &ChainAnchor,
    stored: &[AuditEntry],
) -> IntegrityReport {
    let report = verify_chain(stored_anchor, stored);
    if !report.valid {
        return report;
    }

    if stored_anchor != expected_anchor {
        let reason = format!(
            "stored anchor moved from sequence {} to {}",
            expected_anchor.sequence, stored_anchor.sequence
        );
        warn!("Integrity check failed: {}", reason);
        return IntegrityReport::broken(expected_anchor.sequence + 1, 0, reason);
    }

    for (i, (held, persisted)) in expected.iter().zip(stored).enumerate() {
        if held != persisted {
            let reason = "stored entry differs from the appended entry".to_string();
            warn!("Integrity check failed at {}: {}", held.sequence, reason);
            return IntegrityReport::broken(held.sequence, i + 1, reason);
        }
    }

    if stored.len() < expected.len() {
        let missing = &expected[stored.len()];
        let reason = format!("{} appended entries missing from storage", expected.len() - stored.len());
        warn!("Integrity check failed at {}: {}", missing.sequence, reason);
        return IntegrityReport::broken(missing.sequence, stored.len(), reason);
    }

    if stored.len() > expected.len() {
        let extra = &stored[expected.len()];
        let reason = format!("{} stored entries were never appended", stored.len() - expected.len());
        warn!("Integrity check failed at {}: {}", extra.sequence, reason);
        return IntegrityReport::broken(extra.sequence, stored.len(), reason);
    }

    report
}

/// Verify a standalone partition (for example an archive artifact),
/// trusting only the first entry's link as its starting anchor.
pub fn verify_partition(entries: &[AuditEntry]) -> IntegrityReport {
    match entries.first() {
        None => IntegrityReport::ok(0),
        Some(first) => {
            let anchor = ChainAnchor {
                sequence: first.sequence.saturating_sub(1),
                hash: first.previous_hash.clone(),
            };
            verify_chain(&anchor, entries)
        }
    }
}

/// Verify archive and live partitions end to end by concatenating them
/// in order from `anchor`.
pub fn verify_partitions(anchor: &ChainAnchor, partitions: &[&[AuditEntry]]) -> IntegrityReport {
    let joined: Vec<AuditEntry> = partitions
        .iter()
        .flat_map(|partition| partition.iter().cloned())
        .collect();
    verify_chain(anchor, &joined)
}

/// Sequences of every entry whose own hash no longer matches its content
pub fn find_tampered_entries(entries: &[AuditEntry]) -> Vec<u64> {
    entries
        .iter()
        .filter(|entry| !entry.verify_hash())
        .map(|entry| entry.sequence)
        .collect()
}

/// Load and verify a JSONL partition file
pub fn verify_ledger_file(path: &Path) -> Result<IntegrityReport> {
    info!("Verifying audit ledger file: {}", path.display());

    if !path.exists() {
        return Err(AuditError::StorageError(format!(
            "Audit log file does not exist: {}",
            path.display()
        )));
    }

    let entries = read_entries(path)?;
    Ok(verify_partition(&entries))
}
