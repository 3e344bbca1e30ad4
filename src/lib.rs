pub mod audit;
pub mod config;
pub mod error;
pub mod guard;
pub mod monitor;
pub mod server;
pub mod threat;
pub mod time;

pub use audit::{AuditEntry, AuditLedger, NewAuditEntry, Outcome};
pub use config::SecurityConfig;
pub use error::{AuditError, Result};
pub use guard::BruteForceGuard;
pub use monitor::{Decision, DecisionAction, SecurityEvent, SecurityEventType, SecurityMonitor};
pub use threat::ThreatDetector;
