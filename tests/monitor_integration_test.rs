//! Integration tests for the security monitor
//! Brute-force lockout, signature scoring and compliance reporting

mod common;

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

use common::{failed_login, setup_test_monitor, test_start};
use security_audit::audit::{MemoryStore, Outcome};
use security_audit::guard::GuardState;
use security_audit::monitor::ThreatType;
use security_audit::threat::{Severity, ThreatDetector};
use security_audit::{
    AuditError, DecisionAction, SecurityConfig, SecurityEvent, SecurityEventType, SecurityMonitor,
};

#[tokio::test]
async fn test_five_failed_logins_lock_the_actor() {
    let (monitor, _) = setup_test_monitor(MemoryStore::new()).await;

    for attempt in 1..=4 {
        let decision = monitor
            .evaluate(failed_login("alice", "203.0.113.50", test_start()))
            .await
            .unwrap();
        assert_ne!(decision.action, DecisionAction::Deny, "attempt {}", attempt);
        assert!(!monitor.is_blocked("alice"));
    }

    let fifth = monitor
        .evaluate(failed_login("alice", "203.0.113.50", test_start()))
        .await
        .unwrap();

    assert_eq!(fifth.action, DecisionAction::Deny);
    let lockout = fifth
        .detections
        .iter()
        .find(|d| d.threat_type == ThreatType::BruteForce && d.blocked)
        .expect("lockout detection");
    assert_eq!(lockout.severity, Severity::High);
    assert_eq!(lockout.source, "alice");
    assert!(monitor.is_blocked("alice"));
    assert!(monitor.is_blocked("203.0.113.50"));

    // Every attempt, including the denied one, is on the ledger.
    let snapshot = monitor.ledger().snapshot().await;
    assert_eq!(snapshot.entries.len(), 5);
    assert!(snapshot.entries.iter().all(|e| e.outcome == Outcome::Failure));
}

#[tokio::test]
async fn test_already_blocked_key_is_denied_without_new_lockout() {
    let (monitor, _) = setup_test_monitor(MemoryStore::new()).await;
    for _ in 0..5 {
        monitor
            .evaluate(failed_login("bob", "198.51.100.7", test_start()))
            .await
            .unwrap();
    }
    let before = monitor.detections().await.iter().filter(|d| d.blocked).count();

    let login = SecurityEvent::new(SecurityEventType::Login, "198.51.100.7", test_start())
        .with_actor("bob");
    let decision = monitor.evaluate(login).await.unwrap();

    assert_eq!(decision.action, DecisionAction::Deny);
    assert!(decision.detections.iter().all(|d| !d.blocked));
    let after = monitor.detections().await.iter().filter(|d| d.blocked).count();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_lock_survives_window_and_unblock_releases() {
    let (monitor, clock) = setup_test_monitor(MemoryStore::new()).await;
    for _ in 0..5 {
        monitor
            .evaluate(failed_login("carol", "192.0.2.200", test_start()))
            .await
            .unwrap();
    }

    clock.advance(Duration::hours(2));
    let later = test_start() + Duration::hours(2);
    assert_eq!(monitor.guard().state("carol", later), GuardState::Locked);

    assert!(monitor.unblock("carol").await.unwrap());
    assert!(monitor.unblock("192.0.2.200").await.unwrap());

    let sixth = monitor
        .evaluate(failed_login("carol", "192.0.2.200", later))
        .await
        .unwrap();
    assert_ne!(sixth.action, DecisionAction::Deny);
    assert!(!monitor.is_blocked("carol"));
    assert_eq!(monitor.guard().state("carol", later), GuardState::Watching);
}

#[tokio::test]
async fn test_attempts_outside_window_do_not_accumulate() {
    let (monitor, clock) = setup_test_monitor(MemoryStore::new()).await;
    let window = Duration::minutes(15);

    for i in 0..4 {
        if i > 0 {
            clock.advance(window);
        }
        let at = test_start() + window * i;
        monitor.evaluate(failed_login("dave", "192.0.2.9", at)).await.unwrap();
    }
    // Attempts spaced exactly one window apart never share a window.
    assert_eq!(monitor.guard().attempts_in_window("dave", test_start() + window * 3), 1);
    assert!(!monitor.is_blocked("dave"));
}

#[tokio::test]
async fn test_sql_injection_signature_scores_critical() {
    let detector = ThreatDetector::new();
    let result = detector.detect("SELECT * FROM users WHERE id=1");
    assert!(result.matches.iter().any(|s| s.severity == Severity::Critical));
    assert!(result.risk_score >= 40);

    let benign = detector.detect("Quarterly report for team standup");
    assert!(benign.matches.is_empty());
    assert_eq!(benign.risk_score, 0);
}

#[tokio::test]
async fn test_signature_match_is_recorded_with_event() {
    let (monitor, _) = setup_test_monitor(MemoryStore::new()).await;
    let event = SecurityEvent::new(SecurityEventType::ApiCall, "192.0.2.66", test_start())
        .with_actor("eve")
        .with_details(json!({"path": "/search", "q": "<script>alert(1)</script>"}));

    let decision = monitor.evaluate(event).await.unwrap();
    assert_eq!(decision.action, DecisionAction::Flag);
    assert_eq!(decision.risk_score, 25);
    let detection = &decision.detections[0];
    assert_eq!(detection.threat_type, ThreatType::SignatureMatch);
    assert_eq!(detection.signatures, vec!["xss_script_tag".to_string()]);

    let entry = &monitor.ledger().snapshot().await.entries[0];
    assert_eq!(entry.resource, "/search");
    assert_eq!(entry.actor.as_deref(), Some("eve"));
}

#[tokio::test]
async fn test_compliance_score_seventy() {
    let (monitor, _) = setup_test_monitor(MemoryStore::new()).await;
    for i in 0..7 {
        let event = SecurityEvent::new(SecurityEventType::DataAccess, "192.0.2.1", test_start())
            .with_actor(format!("analyst{}", i % 2))
            .with_details(json!({"resource": "/records"}));
        monitor.evaluate(event).await.unwrap();
    }
    for _ in 0..3 {
        monitor
            .evaluate(failed_login("intruder", "198.51.100.99", test_start()))
            .await
            .unwrap();
    }

    let report = monitor
        .compliance_report(Some(test_start() - Duration::hours(1)), Some(test_start() + Duration::hours(1)))
        .await
        .unwrap();
    assert_eq!(report.total_events, 10);
    assert_eq!(report.successful_events, 7);
    assert_eq!(report.compliance_score, 70);
    assert_eq!(report.top_actions[0].name, "data_access");
    assert_eq!(report.top_actors[0].name, "analyst0");

    let empty = monitor
        .compliance_report(Some(test_start() + Duration::days(1)), None)
        .await
        .unwrap();
    assert_eq!(empty.total_events, 0);
    assert_eq!(empty.compliance_score, 100);
}

#[tokio::test]
async fn test_write_failure_is_never_a_silent_allow() {
    let store = MemoryStore::new();
    let (monitor, _) = setup_test_monitor(store.clone()).await;
    store.set_fail_writes(true);

    let event = SecurityEvent::new(SecurityEventType::Login, "192.0.2.1", test_start()).with_actor("frank");
    let result = monitor.evaluate(event).await;
    assert!(matches!(result, Err(AuditError::WriteFailure(_))));
    assert!(monitor.ledger().is_empty().await);
    assert!(monitor.detections().await.is_empty());
}

#[tokio::test]
async fn test_file_backed_monitor_restart_and_retention() {
    let temp_dir = tempdir().unwrap();
    let mut config = SecurityConfig::default();
    config.ledger.log_path = temp_dir.path().join("audit.jsonl").to_string_lossy().to_string();
    config.ledger.archive_dir = temp_dir.path().join("archive").to_string_lossy().to_string();

    let clock = common::test_clock();
    let open = |clock: Arc<security_audit::time::ManualTimeSource>| {
        let store = security_audit::audit::JsonlFileStore::open(
            &config.ledger.log_path,
            &config.ledger.archive_dir,
        )
        .unwrap();
        SecurityMonitor::from_config(&config, Box::new(store), clock)
    };

    {
        let monitor = open(clock.clone()).await.unwrap();
        for _ in 0..3 {
            monitor
                .evaluate(failed_login("grace", "192.0.2.5", test_start()))
                .await
                .unwrap();
        }
        monitor.close().await.unwrap();
    }

    clock.advance(Duration::days(91));
    let monitor = open(clock.clone()).await.unwrap();
    assert!(!monitor.is_trust_suspended());
    assert_eq!(monitor.ledger().len().await, 3);

    let removed = monitor.clear_old_events(90).await.unwrap();
    assert_eq!(removed, 3);

    // Only the retention record remains, chained after the removed entries.
    let snapshot = monitor.ledger().snapshot().await;
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].action, "retention");
    assert_eq!(snapshot.entries[0].sequence, 4);
    assert!(monitor.verify_ledger().await.valid);

    assert!(matches!(
        monitor.clear_old_events(0).await,
        Err(AuditError::InvalidFilter(_))
    ));
    assert!(matches!(
        monitor.clear_old_events(i64::MAX).await,
        Err(AuditError::InvalidFilter(_))
    ));
}

#[tokio::test]
async fn test_caller_timestamps_cannot_stretch_the_lockout_window() {
    let (monitor, _) = setup_test_monitor(MemoryStore::new()).await;

    let mut last = None;
    for i in 0..10 {
        let claimed = test_start() + Duration::minutes(16 * i);
        last = Some(
            monitor
                .evaluate(failed_login("eve", "203.0.113.77", claimed))
                .await
                .unwrap(),
        );
    }

    assert_eq!(last.map(|d| d.action), Some(DecisionAction::Deny));
    assert!(monitor.is_blocked("eve"));
    assert!(monitor.is_blocked("203.0.113.77"));
}

#[tokio::test]
async fn test_tampering_the_store_is_seen_without_restart() {
    let store = MemoryStore::new();
    let (monitor, _) = setup_test_monitor(store.clone()).await;
    for _ in 0..3 {
        monitor
            .evaluate(failed_login("henry", "192.0.2.8", test_start()))
            .await
            .unwrap();
    }

    store.tamper(|entries| entries[1].origin = Some("10.0.0.1".to_string()));

    let report = monitor.verify_ledger().await;
    assert_eq!(report.first_bad_sequence, Some(2));
    assert!(monitor.is_trust_suspended());
}
