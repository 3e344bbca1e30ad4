use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::audit::DEFAULT_RETENTION_DAYS;
use crate::error::{AuditError, Result};
use crate::guard::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW_MINUTES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub brute_force: BruteForceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub log_path: String,
    pub archive_dir: String,
    pub retention_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            log_path: "./audit/audit.jsonl".to_string(),
            archive_dir: "./audit/archive".to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BruteForceConfig {
    pub max_attempts: usize,
    pub window_minutes: i64,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_minutes: DEFAULT_WINDOW_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum risk score at which a critical signature match denies
    pub deny_risk_threshold: u32,
    pub suspicious_window_minutes: i64,
    pub max_events_per_window: usize,
    pub max_failed_logins_per_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            deny_risk_threshold: 50,
            suspicious_window_minutes: 60,
            max_events_per_window: 100,
            max_failed_logins_per_window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            brute_force: BruteForceConfig::default(),
            monitor: MonitorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl SecurityConfig {
    /// Load from `SECURITY_AUDIT_CONFIG` (YAML) when set, otherwise from
    /// individual environment variables over the defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = env::var("SECURITY_AUDIT_CONFIG") {
            return Self::load_from_file(path);
        }

        let defaults = Self::default();

        let log_path = env::var("AUDIT_LOG_PATH").unwrap_or(defaults.ledger.log_path);
        let archive_dir = env::var("AUDIT_ARCHIVE_DIR").unwrap_or(defaults.ledger.archive_dir);
        let retention_days = env_or("AUDIT_RETENTION_DAYS", defaults.ledger.retention_days)?;

        let max_attempts = env_or("BRUTE_FORCE_MAX_ATTEMPTS", defaults.brute_force.max_attempts)?;
        let window_minutes = env_or("BRUTE_FORCE_WINDOW_MINUTES", defaults.brute_force.window_minutes)?;

        let deny_risk_threshold = env_or("DENY_RISK_THRESHOLD", defaults.monitor.deny_risk_threshold)?;

        let host = env::var("SERVER_HOST").unwrap_or(defaults.server.host);
        let port = env_or("SERVER_PORT", defaults.server.port)?;

        let config = SecurityConfig {
            ledger: LedgerConfig {
                log_path,
                archive_dir,
                retention_days,
            },
            brute_force: BruteForceConfig {
                max_attempts,
                window_minutes,
            },
            monitor: MonitorConfig {
                deny_risk_threshold,
                ..defaults.monitor
            },
            server: ServerConfig { host, port },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = fs::read_to_string(path).map_err(|e| {
            AuditError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: SecurityConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.log_path.is_empty() {
            return Err(AuditError::ConfigError("ledger.log_path must be set".to_string()));
        }
        if self.ledger.retention_days <= 0 {
            return Err(AuditError::ConfigError("ledger.retention_days must be positive".to_string()));
        }
        if self.brute_force.max_attempts == 0 {
            return Err(AuditError::ConfigError("brute_force.max_attempts must be positive".to_string()));
        }
        if self.brute_force.window_minutes <= 0 {
            return Err(AuditError::ConfigError("brute_force.window_minutes must be positive".to_string()));
        }
        if self.monitor.suspicious_window_minutes <= 0 {
            return Err(AuditError::ConfigError(
                "monitor.suspicious_window_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| AuditError::ConfigError(format!("{} is invalid: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::default();
        assert_eq!(config.ledger.retention_days, 90);
        assert_eq!(config.brute_force.max_attempts, 5);
        assert_eq!(config.brute_force.window_minutes, 15);
        assert_eq!(config.monitor.deny_risk_threshold, 50);
        assert_eq!(config.monitor.max_failed_logins_per_window, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "ledger:\n  log_path: /var/lib/audit/ledger.jsonl\nbrute_force:\n  max_attempts: 3\n"
        )
        .unwrap();

        let config = SecurityConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.ledger.log_path, "/var/lib/audit/ledger.jsonl");
        assert_eq!(config.ledger.retention_days, 90);
        assert_eq!(config.brute_force.max_attempts, 3);
        assert_eq!(config.brute_force.window_minutes, 15);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = SecurityConfig::default();
        config.brute_force.max_attempts = 0;
        assert!(matches!(config.validate(), Err(AuditError::ConfigError(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ledger: [unterminated").unwrap();
        assert!(matches!(
            SecurityConfig::load_from_file(file.path()),
            Err(AuditError::ConfigError(_))
        ));
    }
}
