//! Security Monitor
//!
//! Orchestrates the ledger, the signature detector and the brute-force
//! guard. Every evaluated event is written to the ledger before any
//! decision is made, so denied actions still leave an audit trail.

pub mod event;
pub mod report;

pub use event::{
    Decision, DecisionAction, SecurityEvent, SecurityEventType, ThreatDetection, ThreatType,
    DEFAULT_EVENT_RESOURCE,
};
pub use report::{compliance_score, ComplianceReport};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::audit::{
    ArchiveSummary, AuditLedger, IntegrityReport, JsonlFileStore, LedgerStore, NewAuditEntry,
    Outcome, TimeRange,
};
use crate::config::{MonitorConfig, SecurityConfig};
use crate::error::{AuditError, Result};
use crate::guard::BruteForceGuard;
use crate::threat::{Severity, ThreatDetector};
use crate::time::{SystemTimeSource, TimeSource};

/// Thresholds for the monitor's own checks
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub deny_risk_threshold: u32,
    pub suspicious_window: Duration,
    pub max_events_per_window: usize,
    pub max_failed_logins_per_window: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            deny_risk_threshold: config.deny_risk_threshold,
            suspicious_window: Duration::minutes(config.suspicious_window_minutes),
            max_events_per_window: config.max_events_per_window,
            max_failed_logins_per_window: config.max_failed_logins_per_window,
        }
    }
}

pub struct SecurityMonitor {
    ledger: Arc<AuditLedger>,
    detector: ThreatDetector,
    guard: BruteForceGuard,
    settings: MonitorSettings,
    time: Arc<dyn TimeSource>,
    detections: RwLock<Vec<ThreatDetection>>,
    /// First bad sequence seen by `verify_ledger`; 0 while the ledger is trusted
    suspended_at: AtomicU64,
}

impl SecurityMonitor {
    pub fn new(
        ledger: Arc<AuditLedger>,
        detector: ThreatDetector,
        guard: BruteForceGuard,
        settings: MonitorSettings,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            ledger,
            detector,
            guard,
            settings,
            time,
            detections: RwLock::new(Vec::new()),
            suspended_at: AtomicU64::new(0),
        }
    }

    /// Build a monitor over `store` using the configured thresholds, and
    /// verify the loaded ledger before accepting events.
    pub async fn from_config(
        config: &SecurityConfig,
        store: Box<dyn LedgerStore>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(AuditLedger::open_with_time(store, time.clone())?);
        let guard = BruteForceGuard::new(
            config.brute_force.max_attempts,
            Duration::minutes(config.brute_force.window_minutes),
        );

        let monitor = Self::new(
            ledger,
            ThreatDetector::new(),
            guard,
            MonitorSettings::from(&config.monitor),
            time,
        );
        monitor.verify_ledger().await;
        Ok(monitor)
    }

    /// Open the JSONL ledger named in `config` with the system clock
    pub async fn open(config: &SecurityConfig) -> Result<Self> {
        let store = JsonlFileStore::open(
            Path::new(&config.ledger.log_path),
            Path::new(&config.ledger.archive_dir),
        )?;
        Self::from_config(config, Box::new(store), Arc::new(SystemTimeSource)).await
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn guard(&self) -> &BruteForceGuard {
        &self.guard
    }

    /// Log, score and decide on one event.
    ///
    /// The ledger write happens first and its failure aborts evaluation with
    /// `WriteFailure`; an event that could not be recorded is never allowed.
    pub async fn evaluate(&self, event: SecurityEvent) -> Result<Decision> {
        let entry = self.ledger.append(event.to_audit_entry()).await?;
        // Windows and detections run on the ledger's clock; the event's own
        // timestamp is caller-supplied and only kept as evidence.
        let now = entry.timestamp;

        let key = event.subject_key().to_string();
        let mut decision = Decision {
            audit_sequence: entry.sequence,
            ..Decision::default()
        };

        if event.event_type == SecurityEventType::FailedLogin {
            let attempt = self.guard.record_attempt(&key, now);
            if attempt.newly_locked {
                self.guard.block(&event.origin, now);
                decision.action.escalate(DecisionAction::Deny);
                decision.detections.push(ThreatDetection {
                    threat_type: ThreatType::BruteForce,
                    signatures: Vec::new(),
                    severity: Severity::High,
                    source: key.clone(),
                    blocked: true,
                    timestamp: now,
                    description: format!(
                        "{} failed logins within {} minutes from {}",
                        attempt.attempts_in_window,
                        self.guard.window().num_minutes(),
                        event.origin
                    ),
                });
            }
        }

        if self.guard.is_blocked(&key) || self.guard.is_blocked(&event.origin) {
            decision.action.escalate(DecisionAction::Deny);
        }

        let payload = serde_json::to_string(&event)?;
        let scan = self.detector.detect(&payload);
        if !scan.is_clean() {
            let verdict = if scan.has_critical() && scan.risk_score >= self.settings.deny_risk_threshold {
                DecisionAction::Deny
            } else {
                DecisionAction::Flag
            };
            decision.action.escalate(verdict);
            decision.risk_score = scan.risk_score;
            decision.recommendations = self.detector.recommendations(&scan.matches);
            decision.detections.push(ThreatDetection {
                threat_type: ThreatType::SignatureMatch,
                signatures: scan.signature_ids(),
                severity: scan.highest_severity().unwrap_or_default(),
                source: key.clone(),
                blocked: false,
                timestamp: now,
                description: format!(
                    "{} signature(s) matched with risk score {}",
                    scan.matches.len(),
                    scan.risk_score
                ),
            });
        }

        if let Some(actor) = event.actor.as_deref() {
            match self.detect_suspicious_activity(actor).await {
                Ok(found) => {
                    if !found.is_empty() {
                        decision.action.escalate(DecisionAction::Flag);
                    }
                    decision.detections.extend(found);
                }
                Err(e) => warn!("Skipping ledger-derived checks for {}: {}", actor, e),
            }
        }

        if !decision.detections.is_empty() {
            self.detections.write().await.extend(decision.detections.iter().cloned());
        }

        match decision.action {
            DecisionAction::Deny => warn!(
                "Denied {} from {} (audit #{}, risk {})",
                event.event_type, key, entry.sequence, decision.risk_score
            ),
            DecisionAction::Flag => info!(
                "Flagged {} from {} (audit #{}, risk {})",
                event.event_type, key, entry.sequence, decision.risk_score
            ),
            DecisionAction::Allow => debug!("Allowed {} from {}", event.event_type, key),
        }

        Ok(decision)
    }

    /// Secondary, slower signal over `actor`'s recent ledger history.
    ///
    /// Refuses with `IntegrityViolation` while ledger trust is suspended.
    pub async fn detect_suspicious_activity(&self, actor: &str) -> Result<Vec<ThreatDetection>> {
        if let Some(sequence) = self.suspended_sequence() {
            return Err(AuditError::integrity_violation(
                sequence,
                "ledger-derived checks suspended until reconcile",
            ));
        }

        let now = self.time.now();
        let recent: Vec<_> = self
            .ledger
            .entries_since(now - self.settings.suspicious_window)
            .await
            .into_iter()
            .filter(|entry| entry.actor.as_deref() == Some(actor))
            .collect();

        let failed_logins = recent
            .iter()
            .filter(|entry| entry.action == SecurityEventType::FailedLogin.as_str())
            .count();
        let window_minutes = self.settings.suspicious_window.num_minutes();

        let mut found = Vec::new();
        if recent.len() > self.settings.max_events_per_window {
            found.push(ThreatDetection {
                threat_type: ThreatType::UnauthorizedAccess,
                signatures: Vec::new(),
                severity: Severity::Medium,
                source: actor.to_string(),
                blocked: false,
                timestamp: now,
                description: format!("{} events within {} minutes", recent.len(), window_minutes),
            });
        }
        if failed_logins > self.settings.max_failed_logins_per_window {
            found.push(ThreatDetection {
                threat_type: ThreatType::BruteForce,
                signatures: Vec::new(),
                severity: Severity::High,
                source: actor.to_string(),
                blocked: false,
                timestamp: now,
                description: format!(
                    "{} failed logins within {} minutes",
                    failed_logins, window_minutes
                ),
            });
        }

        Ok(found)
    }

    fn suspended_sequence(&self) -> Option<u64> {
        match self.suspended_at.load(Ordering::SeqCst) {
            0 => None,
            sequence => Some(sequence),
        }
    }

    pub fn is_trust_suspended(&self) -> bool {
        self.suspended_sequence().is_some()
    }

    /// Verify the live chain; a failure suspends ledger-derived checks
    pub async fn verify_ledger(&self) -> IntegrityReport {
        let report = self.ledger.verify_integrity().await;
        if let Some(sequence) = report.first_bad_sequence {
            if self.suspended_at.swap(sequence, Ordering::SeqCst) != sequence {
                error!(
                    "Ledger trust suspended: first bad sequence {} ({})",
                    sequence,
                    report.reason.as_deref().unwrap_or("hash chain broken")
                );
            }
        }
        report
    }

    /// Re-verify and lift the suspension if the chain is whole again
    pub async fn reconcile(&self) -> Result<IntegrityReport> {
        let report = self.ledger.verify_integrity().await;
        if report.valid {
            if self.suspended_at.swap(0, Ordering::SeqCst) != 0 {
                info!("Ledger trust restored over {} entries", report.entries_checked);
            }
            return Ok(report);
        }
        if let Some(sequence) = report.first_bad_sequence {
            self.suspended_at.store(sequence, Ordering::SeqCst);
        }
        report.clone().into_result()?;
        Ok(report)
    }

    /// Release a block. Unknown keys are a no-op; returns whether one was removed.
    pub async fn unblock(&self, key: &str) -> Result<bool> {
        let blocked_at = self.guard.blocked_at(key);
        self.ledger
            .append(
                NewAuditEntry::new("unblock", format!("block:{}", key), Outcome::Success).with_details(json!({
                    "key": key,
                    "wasBlocked": blocked_at.is_some(),
                    "blockedAt": blocked_at.map(|at| at.to_rfc3339()),
                })),
            )
            .await?;
        Ok(self.guard.unblock(key))
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        self.guard.is_blocked(key)
    }

    pub fn blocked_keys(&self) -> Vec<String> {
        self.guard.blocked_keys()
    }

    pub async fn detections(&self) -> Vec<ThreatDetection> {
        self.detections.read().await.clone()
    }

    pub async fn detections_for(&self, source: &str) -> Vec<ThreatDetection> {
        self.detections
            .read()
            .await
            .iter()
            .filter(|d| d.source == source)
            .cloned()
            .collect()
    }

    /// Archive entries older than `older_than` and record the move
    pub async fn archive(&self, older_than: Duration) -> Result<ArchiveSummary> {
        let summary = self.ledger.archive(older_than).await?;
        if summary.archived_count > 0 {
            self.ledger
                .append(
                    NewAuditEntry::new("archive", "audit-ledger", Outcome::Success).with_details(json!({
                        "archivedCount": summary.archived_count,
                        "artifact": summary.artifact,
                        "merkleRoot": summary.merkle_root,
                        "liveAnchorSequence": summary.live_anchor.sequence,
                    })),
                )
                .await?;
        }
        Ok(summary)
    }

    /// Drop entries older than `retention_days` and record the purge
    pub async fn clear_old_events(&self, retention_days: i64) -> Result<usize> {
        if retention_days <= 0 {
            return Err(AuditError::InvalidFilter("retention_days must be positive".to_string()));
        }
        let removed = self.ledger.clear_old_events(retention_days).await?;
        if removed > 0 {
            self.ledger
                .append(
                    NewAuditEntry::new("retention", "audit-ledger", Outcome::Success)
                        .with_details(json!({"removed": removed, "retentionDays": retention_days})),
                )
                .await?;
        }
        Ok(removed)
    }

    pub async fn compliance_report(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ComplianceReport> {
        let range = TimeRange::new(start, end)?;
        let snapshot = self.ledger.snapshot().await;
        let entries: Vec<_> = snapshot
            .entries
            .iter()
            .filter(|entry| range.contains(entry.timestamp))
            .cloned()
            .collect();
        let detections: Vec<_> = self
            .detections
            .read()
            .await
            .iter()
            .filter(|d| range.contains(d.timestamp))
            .cloned()
            .collect();

        Ok(ComplianceReport::from_entries(
            start,
            end,
            &entries,
            &detections,
            self.time.now(),
        ))
    }

    pub async fn close(&self) -> Result<()> {
        info!("Closing security monitor");
        self.ledger.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryStore;
    use crate::time::ManualTimeSource;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
    }

    async fn monitor_with(store: MemoryStore) -> (SecurityMonitor, Arc<ManualTimeSource>) {
        let clock = Arc::new(ManualTimeSource::new(start()));
        let monitor = SecurityMonitor::from_config(&SecurityConfig::default(), Box::new(store), clock.clone())
            .await
            .unwrap();
        (monitor, clock)
    }

    fn failed_login(actor: &str, at: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::FailedLogin, "198.51.100.23", at)
            .with_actor(actor)
            .with_user_agent("Mozilla/5.0")
            .with_details(json!({"path": "/login", "method": "POST"}))
    }

    #[tokio::test]
    async fn test_benign_event_is_allowed_and_logged() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let event = SecurityEvent::new(SecurityEventType::Login, "198.51.100.23", start())
            .with_actor("alice")
            .with_details(json!({"path": "/login"}));

        let decision = monitor.evaluate(event).await.unwrap();
        assert_eq!(decision.action, DecisionAction::Allow);
        assert!(decision.detections.is_empty());
        assert_eq!(decision.audit_sequence, 1);
        assert_eq!(monitor.ledger().len().await, 1);
    }

    #[tokio::test]
    async fn test_fifth_failed_login_denies_and_blocks() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;

        for _ in 0..4 {
            let decision = monitor.evaluate(failed_login("alice", start())).await.unwrap();
            assert_ne!(decision.action, DecisionAction::Deny);
        }

        let fifth = monitor.evaluate(failed_login("alice", start())).await.unwrap();
        assert_eq!(fifth.action, DecisionAction::Deny);
        assert!(fifth
            .detections
            .iter()
            .any(|d| d.threat_type == ThreatType::BruteForce && d.blocked));
        assert!(monitor.is_blocked("alice"));
        assert!(monitor.is_blocked("198.51.100.23"));
        assert_eq!(monitor.ledger().len().await, 5);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_evaluation() {
        let store = MemoryStore::new();
        let (monitor, _) = monitor_with(store.clone()).await;
        store.set_fail_writes(true);

        let result = monitor.evaluate(failed_login("alice", start())).await;
        assert!(matches!(result, Err(AuditError::WriteFailure(_))));
        assert_eq!(monitor.guard().attempts_in_window("alice", start()), 0);
    }

    #[tokio::test]
    async fn test_combined_critical_payload_denies() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let event = SecurityEvent::new(SecurityEventType::ApiCall, "192.0.2.10", start())
            .with_details(json!({"query": "SELECT * FROM users; rm -rf /"}));

        let decision = monitor.evaluate(event).await.unwrap();
        assert_eq!(decision.action, DecisionAction::Deny);
        assert_eq!(decision.risk_score, 80);
        assert!(decision.recommendations.iter().any(|r| r == "Enable advanced monitoring"));
        assert!(!monitor.is_blocked("192.0.2.10"));
    }

    #[tokio::test]
    async fn test_ordinary_query_strings_and_prose_are_allowed() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        for details in [
            json!({"path": "/api/courses?page=2&id=7"}),
            json!({"note": "please select one from catalog"}),
        ] {
            let event = SecurityEvent::new(SecurityEventType::ApiCall, "192.0.2.10", start())
                .with_actor("ivan")
                .with_details(details);
            let decision = monitor.evaluate(event).await.unwrap();
            assert_eq!(decision.action, DecisionAction::Allow);
            assert_eq!(decision.risk_score, 0);
        }
    }

    #[tokio::test]
    async fn test_single_critical_below_threshold_flags() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let event = SecurityEvent::new(SecurityEventType::DataAccess, "192.0.2.10", start())
            .with_details(json!({"query": "SELECT * FROM users WHERE id=1"}));

        let decision = monitor.evaluate(event).await.unwrap();
        assert_eq!(decision.action, DecisionAction::Flag);
        assert_eq!(decision.risk_score, 40);
    }

    #[tokio::test]
    async fn test_suspicious_failed_logins_flag_before_lockout() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let mut decisions = Vec::new();
        for _ in 0..4 {
            decisions.push(monitor.evaluate(failed_login("bob", start())).await.unwrap());
        }

        assert_eq!(decisions[2].action, DecisionAction::Allow);
        assert_eq!(decisions[3].action, DecisionAction::Flag);
        assert!(decisions[3]
            .detections
            .iter()
            .any(|d| d.threat_type == ThreatType::BruteForce && !d.blocked));
        assert!(!monitor.is_blocked("bob"));
    }

    #[tokio::test]
    async fn test_high_volume_flags_unauthorized_access() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let mut last = Decision::default();
        for _ in 0..101 {
            let event = SecurityEvent::new(SecurityEventType::DataAccess, "192.0.2.44", start())
                .with_actor("carol")
                .with_details(json!({"resource": "/records"}));
            last = monitor.evaluate(event).await.unwrap();
        }

        assert_eq!(last.action, DecisionAction::Flag);
        assert!(last
            .detections
            .iter()
            .any(|d| d.threat_type == ThreatType::UnauthorizedAccess && d.severity == Severity::Medium));
    }

    #[tokio::test]
    async fn test_old_history_falls_out_of_suspicious_window() {
        let (monitor, clock) = monitor_with(MemoryStore::new()).await;
        for _ in 0..3 {
            monitor.evaluate(failed_login("dave", start())).await.unwrap();
        }
        clock.advance(Duration::minutes(61));

        let found = monitor.detect_suspicious_activity("dave").await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_unblock_is_audited_and_unknown_is_noop() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        for _ in 0..5 {
            monitor.evaluate(failed_login("erin", start())).await.unwrap();
        }

        assert!(monitor.unblock("erin").await.unwrap());
        assert!(!monitor.unblock("nobody").await.unwrap());
        assert!(!monitor.is_blocked("erin"));

        let snapshot = monitor.ledger().snapshot().await;
        let unblocks: Vec<_> = snapshot.entries.iter().filter(|e| e.action == "unblock").collect();
        assert_eq!(unblocks.len(), 2);
        assert_eq!(unblocks[0].details["blockedAt"], json!(start().to_rfc3339()));
        assert_eq!(unblocks[1].details["wasBlocked"], json!(false));
        assert!(unblocks[1].details["blockedAt"].is_null());
        assert!(snapshot.entries.last().unwrap().is_system());
    }

    #[tokio::test]
    async fn test_lockout_window_runs_on_ledger_clock() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let mut last = Decision::default();
        // Claimed timestamps a full window apart do not spread the attempts out.
        for i in 0..5 {
            let claimed = start() + Duration::minutes(16 * i);
            last = monitor.evaluate(failed_login("eve", claimed)).await.unwrap();
        }

        assert_eq!(last.action, DecisionAction::Deny);
        assert!(monitor.is_blocked("eve"));
        let lockout = last.detections.iter().find(|d| d.blocked).unwrap();
        assert_eq!(lockout.timestamp, start());
    }

    #[tokio::test]
    async fn test_retention_out_of_range_is_invalid_filter() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        monitor.evaluate(failed_login("gina", start())).await.unwrap();

        let result = monitor.clear_old_events(1_000_000_000).await;
        assert!(matches!(result, Err(AuditError::InvalidFilter(_))));
        assert_eq!(monitor.ledger().len().await, 1);
    }

    #[tokio::test]
    async fn test_tampered_ledger_suspends_then_reconciles() {
        let store = MemoryStore::new();
        {
            let (monitor, _) = monitor_with(store.clone()).await;
            for _ in 0..3 {
                monitor.evaluate(failed_login("frank", start())).await.unwrap();
            }
        }
        let pristine = store.persisted();
        store.tamper(|entries| entries[1].action = "login".to_string());

        let (monitor, _) = monitor_with(store.clone()).await;
        assert!(monitor.is_trust_suspended());
        let err = monitor.detect_suspicious_activity("frank").await.unwrap_err();
        assert_eq!(err.first_bad_sequence(), Some(2));

        // Evaluation still records and decides; only the ledger-derived check is skipped.
        let decision = monitor.evaluate(failed_login("frank", start())).await.unwrap();
        assert_eq!(decision.audit_sequence, 4);

        let err = monitor.reconcile().await.unwrap_err();
        assert_eq!(err.first_bad_sequence(), Some(2));

        store.tamper(|entries| entries[1] = pristine[1].clone());
        let (restored, _) = monitor_with(store).await;
        assert!(!restored.is_trust_suspended());
        assert!(restored.reconcile().await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_compliance_report_over_monitor() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        for i in 0..7 {
            let event = SecurityEvent::new(SecurityEventType::Login, "192.0.2.1", start())
                .with_actor(format!("user{}", i));
            monitor.evaluate(event).await.unwrap();
        }
        for i in 0..3 {
            monitor.evaluate(failed_login(&format!("user{}", i), start())).await.unwrap();
        }

        let report = monitor.compliance_report(None, None).await.unwrap();
        assert_eq!(report.total_events, 10);
        assert_eq!(report.compliance_score, 70);

        let inverted = monitor
            .compliance_report(Some(start()), Some(start() - Duration::days(1)))
            .await;
        assert!(matches!(inverted, Err(AuditError::InvalidFilter(_))));
    }

    #[tokio::test]
    async fn test_detection_history() {
        let (monitor, _) = monitor_with(MemoryStore::new()).await;
        let event = SecurityEvent::new(SecurityEventType::ApiCall, "192.0.2.77", start())
            .with_details(json!({"file": "../../etc/passwd"}));
        monitor.evaluate(event).await.unwrap();

        assert_eq!(monitor.detections().await.len(), 1);
        let mine = monitor.detections_for("192.0.2.77").await;
        assert_eq!(mine[0].signatures, vec!["path_traversal".to_string()]);
        assert!(monitor.detections_for("someone-else").await.is_empty());
    }
}
