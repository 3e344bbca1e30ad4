//! Threat signature catalog for rule-based detection.
//!
//! Each signature is a labeled regex with a severity tier and the
//! mitigation an operator should apply when it fires.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tier shared by signatures, events and detections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution to an additive risk score
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Critical => 40,
            Severity::High => 25,
            Severity::Medium => 15,
            Severity::Low => 5,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Threat categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    SqlInjection,
    CrossSiteScripting,
    PathTraversal,
    CommandInjection,
    CredentialExposure,
    WeakCryptography,
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatCategory::SqlInjection => write!(f, "sql_injection"),
            ThreatCategory::CrossSiteScripting => write!(f, "xss"),
            ThreatCategory::PathTraversal => write!(f, "path_traversal"),
            ThreatCategory::CommandInjection => write!(f, "command_injection"),
            ThreatCategory::CredentialExposure => write!(f, "credential_exposure"),
            ThreatCategory::WeakCryptography => write!(f, "weak_cryptography"),
        }
    }
}

/// A threat detection signature
#[derive(Debug, Clone, Serialize)]
pub struct ThreatSignature {
    pub id: &'static str,
    pub name: &'static str,
    pub category: ThreatCategory,
    #[serde(skip)]
    pub pattern: &'static str,
    pub severity: Severity,
    pub mitigation: &'static str,
}

pub static THREAT_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        id: "sql_injection",
        name: "SQL injection",
        category: ThreatCategory::SqlInjection,
        pattern: r"(?i)\bselect\s+(\*|[\w\.]+(\s*,\s*[\w\.]+)+)\s+from\s+\w+|\bselect\s+[\w\.]+\s+from\s+[\w\.]+\s+where\s+[\w\.]+\s*(=|<|>|\blike\b|\bin\s*\()|\bunion\s+(all\s+)?select\b|\binsert\s+into\b|\bdelete\s+from\b|\bdrop\s+(table|database)\b|'\s*or\s+'?\d+'?\s*=\s*'?\d+",
        severity: Severity::Critical,
        mitigation: "Use parameterized queries or prepared statements",
    },
    ThreatSignature {
        id: "xss_script_tag",
        name: "Cross-site scripting",
        category: ThreatCategory::CrossSiteScripting,
        pattern: r"(?i)<\s*script\b[^>]*>|javascript\s*:|\bon(error|load|click|mouseover)\s*=",
        severity: Severity::High,
        mitigation: "Encode output and enforce a Content-Security-Policy",
    },
    ThreatSignature {
        id: "path_traversal",
        name: "Path traversal",
        category: ThreatCategory::PathTraversal,
        pattern: r"\.\./|\.\.\\",
        severity: Severity::High,
        mitigation: "Canonicalize paths and restrict access to an allow-listed root",
    },
    ThreatSignature {
        id: "command_injection",
        name: "Command injection",
        category: ThreatCategory::CommandInjection,
        pattern: r#"[;&|`]\s*(rm|cat|ls|wget|curl|nc|bash|sh|chmod|whoami|id)(\s|$|[;&|`'"])|\$\([^)]*\)"#,
        severity: Severity::Critical,
        mitigation: "Never pass user input to a shell; use argument vectors and allow-lists",
    },
    ThreatSignature {
        id: "credential_exposure",
        name: "Hardcoded credential",
        category: ThreatCategory::CredentialExposure,
        pattern: r#"(?i)\b(password|passwd|pwd|secret|api[_-]?key|access[_-]?key|token)\s*[=:]\s*['"]?[^\s'"&]{3,}"#,
        severity: Severity::High,
        mitigation: "Move secrets to a secrets manager and rotate exposed credentials",
    },
    ThreatSignature {
        id: "weak_hash",
        name: "Weak hash algorithm",
        category: ThreatCategory::WeakCryptography,
        pattern: r#"(?i)\b(md5|sha1)\s*\(|createhash\(\s*['"](md5|sha1)['"]"#,
        severity: Severity::Medium,
        mitigation: "Use SHA-256 or stronger; use a password KDF such as Argon2 for passwords",
    },
];

lazy_static! {
    /// Compiled signatures, in catalog order
    pub static ref COMPILED_SIGNATURES: Vec<(Regex, &'static ThreatSignature)> = {
        THREAT_SIGNATURES
            .iter()
            .map(|s| (Regex::new(s.pattern).expect("threat signature pattern must compile"), s))
            .collect()
    };
}

/// Match content against every signature independently
pub fn match_signatures(content: &str) -> Vec<&'static ThreatSignature> {
    COMPILED_SIGNATURES
        .iter()
        .filter(|(regex, _)| regex.is_match(content))
        .map(|(_, signature)| *signature)
        .collect()
}
