#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use security_audit::audit::MemoryStore;
use security_audit::time::ManualTimeSource;
use security_audit::{AuditLedger, NewAuditEntry, Outcome, SecurityConfig, SecurityEvent, SecurityEventType, SecurityMonitor};

/// Fixed starting instant for deterministic tests
pub fn test_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
}

pub fn test_clock() -> Arc<ManualTimeSource> {
    Arc::new(ManualTimeSource::new(test_start()))
}

/// In-memory ledger on a manual clock
pub fn setup_test_ledger(store: MemoryStore) -> (AuditLedger, Arc<ManualTimeSource>) {
    let clock = test_clock();
    let ledger = AuditLedger::open_with_time(Box::new(store), clock.clone())
        .expect("Failed to open test ledger");
    (ledger, clock)
}

/// Monitor with default thresholds over an in-memory store
pub async fn setup_test_monitor(store: MemoryStore) -> (SecurityMonitor, Arc<ManualTimeSource>) {
    let clock = test_clock();
    let monitor = SecurityMonitor::from_config(&SecurityConfig::default(), Box::new(store), clock.clone())
        .await
        .expect("Failed to create test monitor");
    (monitor, clock)
}

/// A varied set of entries covering optional fields both present and absent
pub fn sample_entries() -> Vec<NewAuditEntry> {
    vec![
        NewAuditEntry::new("login", "/login", Outcome::Success)
            .with_actor("alice")
            .with_method("POST")
            .with_origin("192.0.2.10"),
        NewAuditEntry::new("data_access", "/records/17", Outcome::Success)
            .with_actor("alice")
            .with_method("GET")
            .with_origin("192.0.2.10")
            .with_details(json!({"fields": ["name", "email"]})),
        NewAuditEntry::new("failed_login", "/login", Outcome::Failure)
            .with_actor("bob")
            .with_origin("198.51.100.4"),
        NewAuditEntry::new("api_call", "/reports, quarterly \"draft\"", Outcome::Success)
            .with_actor("carol")
            .with_method("GET"),
        NewAuditEntry::new("retention", "audit-ledger", Outcome::Success)
            .with_details(json!({"removed": 0})),
        NewAuditEntry::new("password_change", "/account/password", Outcome::Success)
            .with_actor("alice")
            .with_origin("192.0.2.10"),
    ]
}

pub fn failed_login(actor: &str, origin: &str, at: DateTime<Utc>) -> SecurityEvent {
    SecurityEvent::new(SecurityEventType::FailedLogin, origin, at)
        .with_actor(actor)
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)")
        .with_details(json!({"path": "/login", "method": "POST"}))
}
