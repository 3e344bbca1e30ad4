use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
    /// The store could not durably persist an entry. The append did not happen.
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// A broken link in the hash chain. `sequence` is the first bad entry.
    #[error("Integrity violation at sequence {sequence}: {reason}")]
    IntegrityViolation { sequence: u64, reason: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<serde_yaml::Error> for AuditError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigError(format!("YAML parse error: {}", err))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(format!("I/O error: {}", err))
    }
}

impl AuditError {
    pub fn integrity_violation(sequence: u64, reason: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            sequence,
            reason: reason.into(),
        }
    }

    /// Sequence number of the first bad entry, if this is an integrity failure.
    pub fn first_bad_sequence(&self) -> Option<u64> {
        match self {
            Self::IntegrityViolation { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }
}
