//! Merkle Roots for Ledger Partitions
//!
//! A partition's Merkle root commits to every entry hash in it, so an
//! archive artifact can be anchored or compared by a single value.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::audit::entry::AuditEntry;

fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Merkle root over the entries' hashes; `None` for an empty partition.
///
/// An odd node at any level is paired with itself.
pub fn merkle_root(entries: &[AuditEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let mut level: Vec<String> = entries.iter().map(|e| e.hash.clone()).collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                combine(left, right)
            })
            .collect();
    }

    let root = level.pop();
    debug!("Merkle root over {} entries: {:?}", entries.len(), root);
    root
}

/// Verify a claimed Merkle root against entries
pub fn verify_merkle_root(entries: &[AuditEntry], claimed_root: &str) -> bool {
    merkle_root(entries).as_deref() == Some(claimed_root)
}
