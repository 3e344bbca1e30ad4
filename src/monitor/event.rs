//! Security events, decisions and detections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::audit::{NewAuditEntry, Outcome};
use crate::threat::Severity;

/// Resource recorded when an event names none
pub const DEFAULT_EVENT_RESOURCE: &str = "security";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    Login,
    Logout,
    FailedLogin,
    PasswordChange,
    SuspiciousActivity,
    DataAccess,
    ApiCall,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::Login => "login",
            SecurityEventType::Logout => "logout",
            SecurityEventType::FailedLogin => "failed_login",
            SecurityEventType::PasswordChange => "password_change",
            SecurityEventType::SuspiciousActivity => "suspicious_activity",
            SecurityEventType::DataAccess => "data_access",
            SecurityEventType::ApiCall => "api_call",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound event submitted for logging and evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    #[serde(default)]
    pub actor: Option<String>,
    pub origin: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub details: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, origin: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            actor: None,
            origin: origin.into(),
            user_agent: String::new(),
            severity: Severity::Low,
            details: Value::Null,
            timestamp,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Brute-force key: the actor when known, otherwise the origin address
    pub fn subject_key(&self) -> &str {
        self.actor.as_deref().unwrap_or(&self.origin)
    }

    fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    pub fn resource(&self) -> &str {
        self.detail_str("resource")
            .or_else(|| self.detail_str("path"))
            .unwrap_or(DEFAULT_EVENT_RESOURCE)
    }

    pub fn outcome(&self) -> Outcome {
        let explicit_failure = self.details.get("success").and_then(Value::as_bool) == Some(false);
        match self.event_type {
            SecurityEventType::FailedLogin | SecurityEventType::SuspiciousActivity => Outcome::Failure,
            _ if explicit_failure => Outcome::Failure,
            _ => Outcome::Success,
        }
    }

    /// Ledger fields recording this event
    pub fn to_audit_entry(&self) -> NewAuditEntry {
        let mut entry = NewAuditEntry::new(self.event_type.as_str(), self.resource(), self.outcome())
            .with_origin(self.origin.clone())
            .with_details(json!({
                "userAgent": self.user_agent,
                "severity": self.severity,
                "observedAt": self.timestamp,
                "details": self.details,
            }));

        if let Some(actor) = &self.actor {
            entry = entry.with_actor(actor.clone());
        }
        if let Some(method) = self.detail_str("method") {
            entry = entry.with_method(method);
        }
        entry
    }
}

/// Verdict on an event. Ordered so escalation is a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    #[default]
    Allow,
    Flag,
    Deny,
}

impl DecisionAction {
    /// Raise to `other` if it is stricter; never relaxes
    pub fn escalate(&mut self, other: DecisionAction) {
        if other > *self {
            *self = other;
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAction::Allow => write!(f, "allow"),
            DecisionAction::Flag => write!(f, "flag"),
            DecisionAction::Deny => write!(f, "deny"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    BruteForce,
    UnauthorizedAccess,
    SignatureMatch,
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatType::BruteForce => write!(f, "brute_force"),
            ThreatType::UnauthorizedAccess => write!(f, "unauthorized_access"),
            ThreatType::SignatureMatch => write!(f, "signature_match"),
        }
    }
}

/// A recorded detection. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatDetection {
    pub threat_type: ThreatType,
    pub signatures: Vec<String>,
    pub severity: Severity,
    pub source: String,
    pub blocked: bool,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub detections: Vec<ThreatDetection>,
    pub risk_score: u32,
    pub recommendations: Vec<String>,
    /// Sequence of the ledger entry recording the event
    pub audit_sequence: u64,
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        self.action == DecisionAction::Deny
    }
}
