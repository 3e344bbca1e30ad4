//! Threat detection
//!
//! Signature-based classification of request payloads.
//!
//! | Signature             | Category            | Severity |
//! |-----------------------|---------------------|----------|
//! | `sql_injection`       | SQL injection       | Critical |
//! | `command_injection`   | Command injection   | Critical |
//! | `xss_script_tag`      | Cross-site script   | High     |
//! | `path_traversal`      | Path traversal      | High     |
//! | `credential_exposure` | Credential leakage  | High     |
//! | `weak_hash`           | Weak cryptography   | Medium   |
//!
//! Severity weights (`Critical=40, High=25, Medium=15, Low=5`) add up
//! without a cap, so combined payloads escalate linearly.

mod detector;
mod signatures;

pub use detector::{DetectionResult, ThreatDetector, ADVANCED_MONITORING_GUIDANCE};
pub use signatures::{
    match_signatures, Severity, ThreatCategory, ThreatSignature,
    THREAT_SIGNATURES,
};
