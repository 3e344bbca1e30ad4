//! Compliance reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::audit::ledger::rank;
use crate::audit::{AuditEntry, Outcome, RankedCount};
use crate::monitor::event::ThreatDetection;

const TOP_N: usize = 10;
const SYSTEM_ACTOR: &str = "system";

/// Derived aggregate over a time range. Computed on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub total_events: usize,
    pub successful_events: usize,
    pub failed_events: usize,
    /// Rounded success percentage, unweighted by severity
    pub compliance_score: u32,
    pub top_actors: Vec<RankedCount>,
    pub top_actions: Vec<RankedCount>,
    pub detections_by_severity: BTreeMap<String, usize>,
    pub generated_at: DateTime<Utc>,
}

impl ComplianceReport {
    pub fn from_entries(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        entries: &[AuditEntry],
        detections: &[ThreatDetection],
        generated_at: DateTime<Utc>,
    ) -> Self {
        let total_events = entries.len();
        let successful_events = entries
            .iter()
            .filter(|entry| entry.outcome == Outcome::Success)
            .count();

        let mut actors: HashMap<String, usize> = HashMap::new();
        let mut actions: HashMap<String, usize> = HashMap::new();
        for entry in entries {
            let actor = entry.actor.clone().unwrap_or_else(|| SYSTEM_ACTOR.to_string());
            *actors.entry(actor).or_insert(0) += 1;
            *actions.entry(entry.action.clone()).or_insert(0) += 1;
        }

        let mut detections_by_severity = BTreeMap::new();
        for detection in detections {
            *detections_by_severity
                .entry(detection.severity.to_string())
                .or_insert(0) += 1;
        }

        Self {
            start,
            end,
            total_events,
            successful_events,
            failed_events: total_events - successful_events,
            compliance_score: compliance_score(successful_events, total_events),
            top_actors: rank(actors, TOP_N),
            top_actions: rank(actions, TOP_N),
            detections_by_severity,
            generated_at,
        }
    }
}

/// Success percentage rounded half-up; an empty range is fully compliant
pub fn compliance_score(successful: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((successful * 100 + total / 2) / total) as u32
}
