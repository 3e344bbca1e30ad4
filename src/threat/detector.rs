//! Threat detector for arbitrary text.
//!
//! Scores content by summing the severity weights of every signature it
//! triggers. Detection is infallible: unmatched input scores zero.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use super::signatures::{match_signatures, Severity, ThreatSignature};

/// Guidance added whenever a critical signature fires
pub const ADVANCED_MONITORING_GUIDANCE: &str = "Enable advanced monitoring";

/// Result of scanning one input
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionResult {
    pub matches: Vec<&'static ThreatSignature>,
    /// Additive, uncapped sum of matched severity weights.
    pub risk_score: u32,
}

impl DetectionResult {
    pub fn is_clean(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.matches.iter().any(|s| s.severity == Severity::Critical)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.matches.iter().map(|s| s.severity).max()
    }

    pub fn signature_ids(&self) -> Vec<String> {
        self.matches.iter().map(|s| s.id.to_string()).collect()
    }
}

/// Signature-based threat detector
#[derive(Debug, Clone)]
pub struct ThreatDetector {
    /// Maximum content size to scan (bytes)
    pub max_scan_size: usize,
}

impl Default for ThreatDetector {
    fn default() -> Self {
        Self {
            max_scan_size: 1024 * 1024, // 1MB
        }
    }
}

impl ThreatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_scan_size(mut self, max_scan_size: usize) -> Self {
        self.max_scan_size = max_scan_size;
        self
    }

    /// Match `text` against every signature
    pub fn detect(&self, text: &str) -> DetectionResult {
        let content = truncate_to_boundary(text, self.max_scan_size);
        let matches = match_signatures(content);
        let risk_score = matches.iter().map(|s| s.severity.weight()).sum();

        if !matches.is_empty() {
            debug!(
                "Detected {} signature(s), risk score {}",
                matches.len(),
                risk_score
            );
        }

        DetectionResult { matches, risk_score }
    }

    /// Deduplicated mitigation guidance for `matches`
    pub fn recommendations(&self, matches: &[&ThreatSignature]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut recommendations: Vec<String> = matches
            .iter()
            .filter(|s| seen.insert(s.mitigation))
            .map(|s| s.mitigation.to_string())
            .collect();

        if matches.iter().any(|s| s.severity == Severity::Critical) {
            recommendations.push(ADVANCED_MONITORING_GUIDANCE.to_string());
        }

        recommendations
    }
}

fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
