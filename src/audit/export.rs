//! Ledger Export
//!
//! JSON is an exact structural dump of the entries; CSV is a flat view
//! with a fixed eight-column layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audit::entry::AuditEntry;
use crate::error::{AuditError, Result};

pub const CSV_HEADER: [&str; 8] = [
    "id", "timestamp", "userId", "action", "resource", "method", "ip", "status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AuditError::InvalidFilter(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }
}

/// Render entries in the requested format
pub fn render(entries: &[AuditEntry], format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(entries)?),
        ExportFormat::Csv => Ok(to_csv(entries).into_bytes()),
    }
}

/// Fixed-column CSV; absent optional fields become empty strings
pub fn to_csv(entries: &[AuditEntry]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');

    for entry in entries {
        let row = [
            entry.sequence.to_string(),
            entry.timestamp.to_rfc3339(),
            entry.actor.clone().unwrap_or_default(),
            entry.action.clone(),
            entry.resource.clone(),
            entry.method.clone().unwrap_or_default(),
            entry.origin.clone().unwrap_or_default(),
            entry.outcome.to_string(),
        ];

        let fields: Vec<String> = row.iter().map(|field| escape_csv(field)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
