//! Ledger Query Filters

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::audit::entry::{AuditEntry, Outcome};
use crate::error::{AuditError, Result};

/// Inclusive time range; open on either side when a bound is absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        Self::new(Some(start), Some(end))
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(AuditError::InvalidFilter(format!(
                    "start {} is after end {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

/// Query filter over ledger entries. All set criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor: Option<String>,
    pub action: Option<String>,
    /// Substring match against the entry resource.
    pub resource: Option<String>,
    pub outcome: Option<Outcome>,
    pub range: TimeRange,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.range.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.range.end = Some(end);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Parse string parameters such as an HTTP query string.
    ///
    /// Recognised keys: `actor`, `action`, `resource`, `outcome`, `start`,
    /// `end` (RFC 3339), `limit`, `offset`. Unknown keys are ignored.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let mut filter = Self::new();

        filter.actor = params.get("actor").cloned();
        filter.action = params.get("action").cloned();
        filter.resource = params.get("resource").cloned();

        if let Some(outcome) = params.get("outcome") {
            filter.outcome = Some(outcome.parse().map_err(AuditError::InvalidFilter)?);
        }

        filter.range = parse_range(params)?;

        if let Some(limit) = params.get("limit") {
            filter.limit = Some(parse_number(limit, "limit")?);
        }

        if let Some(offset) = params.get("offset") {
            filter.offset = parse_number(offset, "offset")?;
        }

        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        self.range.validate()?;
        if self.limit == Some(0) {
            return Err(AuditError::InvalidFilter("limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor) = &self.actor {
            if entry.actor.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }

        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }

        if let Some(resource) = &self.resource {
            if !entry.resource.contains(resource.as_str()) {
                return false;
            }
        }

        if let Some(outcome) = self.outcome {
            if entry.outcome != outcome {
                return false;
            }
        }

        self.range.contains(entry.timestamp)
    }

    /// Apply the filter and pagination, preserving sequence order
    pub fn apply(&self, entries: &[AuditEntry]) -> Vec<AuditEntry> {
        let matching = entries
            .iter()
            .filter(|entry| self.matches(entry))
            .skip(self.offset);

        match self.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }
}

/// Parse `start` / `end` RFC 3339 parameters into a range
pub fn parse_range(params: &HashMap<String, String>) -> Result<TimeRange> {
    let start = params.get("start").map(|s| parse_timestamp(s, "start")).transpose()?;
    let end = params.get("end").map(|s| parse_timestamp(s, "end")).transpose()?;
    TimeRange::new(start, end)
}

fn parse_timestamp(value: &str, name: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuditError::InvalidFilter(format!("{} is not an RFC 3339 timestamp: {}", name, e)))
}

fn parse_number(value: &str, name: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| AuditError::InvalidFilter(format!("{} must be a non-negative integer", name)))
}
