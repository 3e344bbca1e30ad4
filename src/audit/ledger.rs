//! Audit Ledger
//!
//! Append-only, hash-chained ledger. Appends are serialized through a
//! single writer; readers work from an immutable snapshot that is swapped
//! only after the store has durably accepted a change.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::audit::entry::{AuditEntry, NewAuditEntry, Outcome};
use crate::audit::export::{self, ExportFormat};
use crate::audit::merkle::merkle_root;
use crate::audit::query::{AuditFilter, TimeRange};
use crate::audit::store::{ChainAnchor, LedgerStore};
use crate::audit::verify::{verify_chain, verify_stored, IntegrityReport};
use crate::error::{AuditError, Result};
use crate::time::{SystemTimeSource, TimeSource};

pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Consistent view of the live partition
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub anchor: ChainAnchor,
    pub entries: Vec<AuditEntry>,
}

impl LedgerSnapshot {
    /// Link the next entry must carry, and its sequence number
    fn tail(&self) -> ChainAnchor {
        self.entries
            .last()
            .map(ChainAnchor::after)
            .unwrap_or_else(|| self.anchor.clone())
    }
}

/// Outcome of moving old entries out of the live partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub archived_count: usize,
    /// Artifact name; `None` when nothing was old enough or entries were dropped.
    pub artifact: Option<String>,
    pub merkle_root: Option<String>,
    /// Starting link of the live partition after the move.
    pub live_anchor: ChainAnchor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCount {
    pub name: String,
    pub count: usize,
}

/// Aggregate counts over the live partition
#[derive(Debug, Clone, Serialize)]
pub struct AuditStatistics {
    pub total_entries: usize,
    pub entries_by_action: HashMap<String, usize>,
    pub entries_by_outcome: HashMap<String, usize>,
    pub top_resources: Vec<RankedCount>,
    pub recent_failures: Vec<AuditEntry>,
}

/// Rank `counts` by descending count, then name, keeping the first `limit`
pub fn rank(counts: HashMap<String, usize>, limit: usize) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .into_iter()
        .map(|(name, count)| RankedCount { name, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(limit);
    ranked
}

pub struct AuditLedger {
    writer: Mutex<Box<dyn LedgerStore>>,
    snapshot: RwLock<Arc<LedgerSnapshot>>,
    time: Arc<dyn TimeSource>,
}

impl AuditLedger {
    /// Open a ledger over `store` using the system clock
    pub fn open(store: impl LedgerStore + 'static) -> Result<Self> {
        Self::open_with_time(Box::new(store), Arc::new(SystemTimeSource))
    }

    /// Open a ledger, loading whatever the store already holds.
    ///
    /// A broken chain is logged but does not prevent opening, so operators
    /// can still query and export the evidence; `verify_integrity` reports it.
    pub fn open_with_time(mut store: Box<dyn LedgerStore>, time: Arc<dyn TimeSource>) -> Result<Self> {
        let stored = store.load()?;

        let report = verify_chain(&stored.anchor, &stored.entries);
        if !report.valid {
            error!("Audit ledger loaded with integrity failure: {}", report.summary());
        }

        info!(
            "Audit ledger opened with {} entries (anchor sequence {})",
            stored.entries.len(),
            stored.anchor.sequence
        );

        Ok(Self {
            writer: Mutex::new(store),
            snapshot: RwLock::new(Arc::new(LedgerSnapshot {
                anchor: stored.anchor,
                entries: stored.entries,
            })),
            time,
        })
    }

    /// Append a new entry, returning it once durably persisted.
    ///
    /// On `WriteFailure` the in-memory chain is untouched, so memory and
    /// storage cannot diverge.
    pub async fn append(&self, fields: NewAuditEntry) -> Result<AuditEntry> {
        let mut store = self.writer.lock().await;

        let tail = self.snapshot.read().await.tail();
        let entry = AuditEntry::seal(fields, tail.sequence + 1, self.time.now(), tail.hash);

        if let Err(e) = store.append(&entry) {
            error!("Failed to persist audit entry #{}: {}", entry.sequence, e);
            return Err(e);
        }

        {
            let mut snapshot = self.snapshot.write().await;
            Arc::make_mut(&mut snapshot).entries.push(entry.clone());
        }

        debug!("Appended audit entry: {}", entry.summary());
        Ok(entry)
    }

    /// Current consistent view; never observes a partially applied append
    pub async fn snapshot(&self) -> Arc<LedgerSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Hash of the last entry (or the live anchor when empty)
    pub async fn head_hash(&self) -> String {
        self.snapshot.read().await.tail().hash
    }

    /// Re-read the live partition from the store and verify it.
    ///
    /// The stored chain is walked from its stored anchor and then compared
    /// with what this process has appended, so edits made to storage while
    /// the ledger is running are reported without a restart.
    pub async fn verify_integrity(&self) -> IntegrityReport {
        let report = {
            let mut store = self.writer.lock().await;
            let snapshot = self.snapshot().await;
            match store.read_back() {
                Ok(stored) => verify_stored(
                    &snapshot.anchor,
                    &snapshot.entries,
                    &stored.anchor,
                    &stored.entries,
                ),
                Err(e) => IntegrityReport::broken(
                    snapshot.anchor.sequence + 1,
                    0,
                    format!("stored ledger unreadable: {}", e),
                ),
            }
        };
        if report.valid {
            debug!("Integrity verified over {} entries", report.entries_checked);
        } else {
            warn!("Integrity verification failed: {}", report.summary());
        }
        report
    }

    /// `IntegrityViolation` with the first bad sequence, or `Ok`
    pub async fn ensure_integrity(&self) -> Result<()> {
        self.verify_integrity().await.into_result()
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        filter.validate()?;
        let snapshot = self.snapshot().await;
        Ok(filter.apply(&snapshot.entries))
    }

    pub async fn export(&self, range: TimeRange, format: ExportFormat) -> Result<Vec<u8>> {
        range.validate()?;
        let snapshot = self.snapshot().await;
        let entries: Vec<AuditEntry> = snapshot
            .entries
            .iter()
            .filter(|entry| range.contains(entry.timestamp))
            .cloned()
            .collect();
        export::render(&entries, format)
    }

    /// Move entries older than `older_than` into an archive partition.
    ///
    /// The live partition is not re-chained: its anchor becomes the last
    /// archived entry, which is exactly the first retained entry's stored
    /// `previous_hash`. The archive verifies on its own from its first link.
    pub async fn archive(&self, older_than: Duration) -> Result<ArchiveSummary> {
        self.split_off_older(older_than, true).await
    }

    /// Drop entries older than `retention_days`, returning how many went
    pub async fn clear_old_events(&self, retention_days: i64) -> Result<usize> {
        let older_than = Duration::try_days(retention_days).ok_or_else(|| {
            AuditError::InvalidFilter(format!("retention of {} days is out of range", retention_days))
        })?;
        let summary = self.split_off_older(older_than, false).await?;
        Ok(summary.archived_count)
    }

    async fn split_off_older(&self, older_than: Duration, keep_archive: bool) -> Result<ArchiveSummary> {
        if older_than < Duration::zero() {
            return Err(AuditError::InvalidFilter("age cutoff must not be negative".to_string()));
        }

        let mut store = self.writer.lock().await;

        let now = self.time.now();
        let cutoff = now.checked_sub_signed(older_than).ok_or_else(|| {
            AuditError::InvalidFilter(format!(
                "age cutoff of {} days reaches past the representable range",
                older_than.num_days()
            ))
        })?;
        let snapshot = self.snapshot().await;

        // Only a contiguous prefix can leave; partitions never interleave.
        let split = snapshot
            .entries
            .iter()
            .take_while(|entry| entry.timestamp < cutoff)
            .count();

        if split == 0 {
            return Ok(ArchiveSummary {
                archived_count: 0,
                artifact: None,
                merkle_root: None,
                live_anchor: snapshot.anchor.clone(),
            });
        }

        let (moved, retained) = snapshot.entries.split_at(split);
        let live_anchor = ChainAnchor::after(&moved[split - 1]);

        let artifact = if keep_archive {
            Some(store.write_archive(moved, now)?)
        } else {
            None
        };

        if let Err(e) = store.rewrite(&live_anchor, retained) {
            // The moved entries are still live; an artifact holding them too would duplicate them.
            if let Some(name) = artifact.as_deref() {
                if let Err(cleanup) = store.discard_archive(name) {
                    error!("Failed to remove archive {} after aborted rewrite: {}", name, cleanup);
                }
            }
            error!("Failed to rewrite live partition: {}", e);
            return Err(e);
        }

        {
            let mut current = self.snapshot.write().await;
            *current = Arc::new(LedgerSnapshot {
                anchor: live_anchor.clone(),
                entries: retained.to_vec(),
            });
        }

        if keep_archive {
            info!(
                "Archived {} entries older than {}; live partition now anchored at sequence {}",
                split,
                cutoff.to_rfc3339(),
                live_anchor.sequence
            );
        } else {
            info!("Removed {} entries older than {}", split, cutoff.to_rfc3339());
        }

        Ok(ArchiveSummary {
            archived_count: split,
            artifact,
            merkle_root: if keep_archive { merkle_root(moved) } else { None },
            live_anchor,
        })
    }

    pub async fn statistics(&self) -> AuditStatistics {
        let snapshot = self.snapshot().await;

        let mut by_action: HashMap<String, usize> = HashMap::new();
        let mut by_outcome: HashMap<String, usize> = HashMap::new();
        let mut by_resource: HashMap<String, usize> = HashMap::new();

        for entry in &snapshot.entries {
            *by_action.entry(entry.action.clone()).or_insert(0) += 1;
            *by_outcome.entry(entry.outcome.to_string()).or_insert(0) += 1;
            *by_resource.entry(entry.resource.clone()).or_insert(0) += 1;
        }

        let failures: Vec<AuditEntry> = snapshot
            .entries
            .iter()
            .filter(|entry| entry.outcome == Outcome::Failure)
            .cloned()
            .collect();
        let recent_failures = failures[failures.len().saturating_sub(10)..].to_vec();

        AuditStatistics {
            total_entries: snapshot.entries.len(),
            entries_by_action: by_action,
            entries_by_outcome: by_outcome,
            top_resources: rank(by_resource, 10),
            recent_failures,
        }
    }

    /// Entries appended at or after `since`, in sequence order
    pub async fn entries_since(&self, since: DateTime<Utc>) -> Vec<AuditEntry> {
        let snapshot = self.snapshot().await;
        snapshot
            .entries
            .iter()
            .filter(|entry| entry.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Flush the underlying store
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.close()
    }
}
