//! Audit Ledger
//!
//! Tamper-evident, append-only ledger of security-relevant events.
//! Every entry embeds the hash of its predecessor; any retroactive edit
//! breaks the chain at the edited entry.

pub mod entry;
pub mod export;
pub mod ledger;
pub mod merkle;
pub mod query;
pub mod store;
pub mod verify;

pub use entry::{chain_digest, AuditEntry, NewAuditEntry, Outcome, GENESIS_PREVIOUS_HASH};
pub use export::{ExportFormat, CSV_HEADER};
pub use ledger::{
    ArchiveSummary, AuditLedger, AuditStatistics, LedgerSnapshot, RankedCount,
    DEFAULT_RETENTION_DAYS,
};
pub use merkle::{merkle_root, verify_merkle_root};
pub use query::{AuditFilter, TimeRange};
pub use store::{ChainAnchor, JsonlFileStore, LedgerStore, MemoryStore, StoredLedger};
pub use verify::{
    find_tampered_entries, verify_chain, verify_ledger_file, verify_partition, verify_partitions,
    verify_stored, IntegrityReport,
};
