//! Ledger Stores
//!
//! Durable backing for the audit ledger. The ledger owns chain logic;
//! a store only persists what it is handed, in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::audit::entry::{AuditEntry, GENESIS_PREVIOUS_HASH};
use crate::error::{AuditError, Result};

/// Starting link of a partition: the sequence and hash of the entry that
/// precedes its first entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAnchor {
    pub sequence: u64,
    pub hash: String,
}

impl ChainAnchor {
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_PREVIOUS_HASH.to_string(),
        }
    }

    pub fn after(entry: &AuditEntry) -> Self {
        Self {
            sequence: entry.sequence,
            hash: entry.hash.clone(),
        }
    }
}

impl Default for ChainAnchor {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Live partition as persisted
#[derive(Debug, Clone, Default)]
pub struct StoredLedger {
    pub anchor: ChainAnchor,
    pub entries: Vec<AuditEntry>,
}

/// Durable store adapter behind the ledger's append path
pub trait LedgerStore: Send {
    /// Load the live partition persisted by a previous run, recovering
    /// from any write a crash cut short.
    fn load(&mut self) -> Result<StoredLedger>;

    /// Read the live partition back as it currently sits in storage.
    fn read_back(&mut self) -> Result<StoredLedger> {
        self.load()
    }

    /// Durably persist one entry. Must return `WriteFailure` unless the
    /// entry is on stable storage, and must leave nothing of it behind
    /// when it fails.
    fn append(&mut self, entry: &AuditEntry) -> Result<()>;

    /// Replace the live partition after archival or retention pruning.
    fn rewrite(&mut self, anchor: &ChainAnchor, entries: &[AuditEntry]) -> Result<()>;

    /// Write an archive partition verbatim, returning its artifact name.
    fn write_archive(&mut self, entries: &[AuditEntry], created_at: DateTime<Utc>) -> Result<String>;

    /// Remove an archive written by `write_archive` whose move was abandoned.
    fn discard_archive(&mut self, artifact: &str) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Archive artifact name for a partition created at `created_at`
pub fn archive_name(created_at: DateTime<Utc>) -> String {
    format!("audit-archive-{}.jsonl", created_at.format("%Y%m%dT%H%M%S%.3fZ"))
}

#[derive(Debug, Default)]
struct MemoryState {
    anchor: ChainAnchor,
    entries: Vec<AuditEntry>,
    archives: Vec<(String, Vec<AuditEntry>)>,
}

/// In-memory store. Clones share state so tests can inspect what was
/// persisted, tamper with it, or make writes fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_writes: Arc<AtomicBool>,
    fail_rewrites: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `WriteFailure`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only live partition rewrites fail, leaving appends and archives working.
    pub fn set_fail_rewrites(&self, fail: bool) {
        self.fail_rewrites.store(fail, Ordering::SeqCst);
    }

    pub fn persisted(&self) -> Vec<AuditEntry> {
        self.lock().entries.clone()
    }

    pub fn anchor(&self) -> ChainAnchor {
        self.lock().anchor.clone()
    }

    pub fn archives(&self) -> Vec<(String, Vec<AuditEntry>)> {
        self.lock().archives.clone()
    }

    /// Edit persisted entries in place, bypassing the ledger.
    pub fn tamper<F>(&self, edit: F)
    where
        F: FnOnce(&mut Vec<AuditEntry>),
    {
        edit(&mut self.lock().entries);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuditError::WriteFailure("memory store rejected write".to_string()));
        }
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn load(&mut self) -> Result<StoredLedger> {
        let state = self.lock();
        Ok(StoredLedger {
            anchor: state.anchor.clone(),
            entries: state.entries.clone(),
        })
    }

    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        self.check_writable()?;
        self.lock().entries.push(entry.clone());
        Ok(())
    }

    fn rewrite(&mut self, anchor: &ChainAnchor, entries: &[AuditEntry]) -> Result<()> {
        self.check_writable()?;
        if self.fail_rewrites.load(Ordering::SeqCst) {
            return Err(AuditError::WriteFailure("memory store rejected rewrite".to_string()));
        }
        let mut state = self.lock();
        state.anchor = anchor.clone();
        state.entries = entries.to_vec();
        Ok(())
    }

    fn write_archive(&mut self, entries: &[AuditEntry], created_at: DateTime<Utc>) -> Result<String> {
        self.check_writable()?;
        let name = archive_name(created_at);
        self.lock().archives.push((name.clone(), entries.to_vec()));
        Ok(name)
    }

    fn discard_archive(&mut self, artifact: &str) -> Result<()> {
        self.lock().archives.retain(|(name, _)| name != artifact);
        Ok(())
    }
}

/// Append-only JSONL file store, one entry per line.
///
/// The live partition's anchor sits next to the log in `<log>.anchor`.
/// A rewrite stages the new anchor in `<log>.anchor.pending` before the
/// log is swapped, so `load` can finish or discard a rewrite that a crash
/// interrupted.
pub struct JsonlFileStore {
    log_path: PathBuf,
    archive_dir: PathBuf,
    file: Option<File>,
}

impl JsonlFileStore {
    /// Open (or create) the log at `log_path`; archives go to `archive_dir`
    pub fn open(log_path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Result<Self> {
        let log_path = log_path.into();
        let archive_dir = archive_dir.into();

        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AuditError::StorageError(format!("Failed to create log directory: {}", e))
                })?;
            }
        }

        let file = open_append(&log_path)?;

        Ok(Self {
            log_path,
            archive_dir,
            file: Some(file),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn anchor_path(&self) -> PathBuf {
        with_suffix(&self.log_path, ".anchor")
    }

    fn pending_anchor_path(&self) -> PathBuf {
        with_suffix(&self.log_path, ".anchor.pending")
    }

    fn append_handle(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| AuditError::WriteFailure("Audit log file not available".to_string()))
    }

    /// Anchor for the stored `entries`. A pending anchor wins once the log
    /// already starts where it says, which means the swap went through.
    fn resolve_anchor(&self, entries: &[AuditEntry]) -> Result<(ChainAnchor, bool)> {
        let pending_path = self.pending_anchor_path();
        if pending_path.exists() {
            let pending = read_anchor(&pending_path)?;
            let swapped = entries.first().map_or(true, |first| {
                first.sequence == pending.sequence + 1 && first.previous_hash == pending.hash
            });
            if swapped {
                return Ok((pending, true));
            }
        }

        let anchor_path = self.anchor_path();
        let anchor = if anchor_path.exists() {
            read_anchor(&anchor_path)?
        } else {
            ChainAnchor::genesis()
        };
        Ok((anchor, false))
    }

    /// Cut the log back to its first `len` bytes
    fn truncate_log(&mut self, len: u64) -> Result<()> {
        let file = self.append_handle()?;
        file.set_len(len)?;
        file.sync_data()?;
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AuditError::StorageError(format!("Failed to open audit log file: {}", e)))
}

fn read_anchor(path: &Path) -> Result<ChainAnchor> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_anchor(path: &Path, anchor: &ChainAnchor) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(serde_json::to_string(anchor)?.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Flush directory metadata so a completed rename survives a crash
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

/// Parsed contents of a JSONL log
#[derive(Debug, Clone, Default)]
pub struct LogContents {
    pub entries: Vec<AuditEntry>,
    /// Byte length of the well-formed prefix holding `entries`.
    pub valid_len: u64,
    /// Line number of an unterminated final line that did not parse,
    /// left behind by a write that never completed.
    pub torn_line: Option<usize>,
    /// Whether the well-formed prefix ends with a newline.
    pub terminated: bool,
}

/// Read JSONL entries from `path`, skipping blank lines.
///
/// Only the final line may be torn; an unparsable line anywhere else is a
/// `StorageError`.
pub fn read_log(path: &Path) -> Result<LogContents> {
    if !path.exists() {
        return Ok(LogContents {
            terminated: true,
            ..LogContents::default()
        });
    }

    let data = fs::read(path)?;
    let mut entries = Vec::new();
    let mut valid_len = 0u64;
    let mut torn_line = None;

    for (index, chunk) in data.split_inclusive(|byte| *byte == b'\n').enumerate() {
        let line_num = index + 1;
        let complete = chunk.last() == Some(&b'\n');
        let line = String::from_utf8_lossy(chunk);
        let line = line.trim();

        if !line.is_empty() {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(_) if !complete => {
                    torn_line = Some(line_num);
                    break;
                }
                Err(e) => {
                    return Err(AuditError::StorageError(format!(
                        "Failed to parse entry at line {}: {}",
                        line_num, e
                    )))
                }
            }
        }
        valid_len += chunk.len() as u64;
    }

    let terminated = valid_len == 0 || data.get(valid_len as usize - 1) == Some(&b'\n');
    debug!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(LogContents {
        entries,
        valid_len,
        torn_line,
        terminated,
    })
}

/// Read JSONL entries from `path`, ignoring a torn final line
pub fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let contents = read_log(path)?;
    if let Some(line) = contents.torn_line {
        warn!("Ignoring incomplete final line {} of {}", line, path.display());
    }
    Ok(contents.entries)
}

fn write_entries(path: &Path, entries: &[AuditEntry]) -> Result<()> {
    let mut file = File::create(path)?;
    for entry in entries {
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
    }
    file.sync_all()?;
    Ok(())
}

impl LedgerStore for JsonlFileStore {
    fn load(&mut self) -> Result<StoredLedger> {
        let contents = read_log(&self.log_path)?;

        if let Some(line) = contents.torn_line {
            warn!(
                "Discarding incomplete final line {} of {} left by an interrupted write",
                line,
                self.log_path.display()
            );
            self.truncate_log(contents.valid_len)?;
        } else if !contents.terminated {
            let file = self.append_handle()?;
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        let (anchor, pending) = self.resolve_anchor(&contents.entries)?;
        let pending_path = self.pending_anchor_path();
        if pending {
            warn!("Completing interrupted rewrite of {}", self.log_path.display());
            fs::rename(&pending_path, self.anchor_path())?;
        } else if pending_path.exists() {
            warn!("Discarding anchor staged by an interrupted rewrite");
            fs::remove_file(&pending_path)?;
        }

        info!(
            "Loaded {} existing audit entries from {}",
            contents.entries.len(),
            self.log_path.display()
        );
        Ok(StoredLedger {
            anchor,
            entries: contents.entries,
        })
    }

    fn read_back(&mut self) -> Result<StoredLedger> {
        let contents = read_log(&self.log_path)?;
        let (anchor, _) = self.resolve_anchor(&contents.entries)?;
        Ok(StoredLedger {
            anchor,
            entries: contents.entries,
        })
    }

    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let file = self.append_handle()?;
        let len_before = file
            .metadata()
            .map_err(|e| AuditError::WriteFailure(format!("Failed to stat audit log: {}", e)))?
            .len();

        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data());

        if let Err(e) = written {
            // Whatever reached the file must go, or the next append would reuse this sequence.
            let rolled_back = file.set_len(len_before).and_then(|_| file.sync_data());
            if let Err(rollback) = rolled_back {
                error!(
                    "Failed to roll back partial audit entry #{}: {}; refusing further appends",
                    entry.sequence, rollback
                );
                self.file = None;
            }
            return Err(AuditError::WriteFailure(format!("Failed to write to audit log: {}", e)));
        }

        Ok(())
    }

    fn rewrite(&mut self, anchor: &ChainAnchor, entries: &[AuditEntry]) -> Result<()> {
        let tmp_path = with_suffix(&self.log_path, ".tmp");
        let pending_path = self.pending_anchor_path();

        write_entries(&tmp_path, entries)
            .map_err(|e| AuditError::WriteFailure(format!("Failed to write live log: {}", e)))?;
        write_anchor(&pending_path, anchor)
            .map_err(|e| AuditError::WriteFailure(format!("Failed to stage chain anchor: {}", e)))?;

        // Drop the append handle before swapping the file underneath it.
        self.file = None;
        if let Err(e) = fs::rename(&tmp_path, &self.log_path) {
            if let Err(cleanup) = fs::remove_file(&pending_path) {
                warn!("Failed to remove staged chain anchor: {}", cleanup);
            }
            self.file = Some(open_append(&self.log_path)?);
            return Err(AuditError::WriteFailure(format!("Failed to replace live log: {}", e)));
        }
        self.file = Some(open_append(&self.log_path)?);

        // The new log is live. If the anchor cannot be promoted now, `load`
        // and `read_back` still pick the staged one.
        if let Err(e) = fs::rename(&pending_path, self.anchor_path()) {
            error!("Failed to promote staged chain anchor: {}", e);
        }
        if let Err(e) = sync_parent(&self.log_path) {
            warn!("Failed to sync log directory: {}", e);
        }

        debug!("Rewrote live log with {} entries", entries.len());
        Ok(())
    }

    fn write_archive(&mut self, entries: &[AuditEntry], created_at: DateTime<Utc>) -> Result<String> {
        fs::create_dir_all(&self.archive_dir).map_err(|e| {
            AuditError::WriteFailure(format!("Failed to create archive directory: {}", e))
        })?;

        let path = self.archive_dir.join(archive_name(created_at));
        write_entries(&path, entries)
            .map_err(|e| AuditError::WriteFailure(format!("Failed to write archive: {}", e)))?;

        info!("Archived {} entries to {}", entries.len(), path.display());
        Ok(path.to_string_lossy().to_string())
    }

    fn discard_archive(&mut self, artifact: &str) -> Result<()> {
        fs::remove_file(artifact)
            .map_err(|e| AuditError::StorageError(format!("Failed to remove archive {}: {}", artifact, e)))?;
        info!("Removed abandoned archive {}", artifact);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .map_err(|e| AuditError::StorageError(format!("Failed to flush audit log on close: {}", e)))?;
        }
        Ok(())
    }
}
