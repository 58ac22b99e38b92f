//! Credential health checks for monitors and operators.

use std::path::Path;

use {
    chrono::{DateTime, Utc},
    salesmcp_config::SalesConfig,
    serde::Serialize,
};

use crate::{expiry::seconds_until_expiry, storage::read_credential};

/// Less than this many seconds left is reported as a warning.
pub const WARN_WITHIN_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealth {
    pub provider: String,
    pub status: HealthStatus,
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_until_expiry: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub overall_healthy: bool,
    pub checks: Vec<CredentialHealth>,
}

impl CredentialHealth {
    fn new(provider: &str, status: HealthStatus, message: String) -> Self {
        Self {
            provider: provider.to_string(),
            status,
            healthy: status != HealthStatus::Error,
            message,
            expiry: None,
            seconds_until_expiry: None,
        }
    }
}

/// Inspect one credential file without touching the network.
pub fn check_credential(provider: &str, path: &Path, now: DateTime<Utc>) -> CredentialHealth {
    let credential = match read_credential(path) {
        Ok(c) => c,
        Err(e) => return CredentialHealth::new(provider, HealthStatus::Error, e.to_string()),
    };
    let refreshable = credential.has_refresh_token();

    let (status, message) = match seconds_until_expiry(&credential, now) {
        None => (
            HealthStatus::Warning,
            "no expiry recorded in token".to_string(),
        ),
        Some(secs) if secs <= 0 && refreshable => (
            HealthStatus::Error,
            format!(
                "token expired {} minutes ago, refresh has not succeeded",
                -secs / 60
            ),
        ),
        Some(secs) if secs <= 0 => (
            HealthStatus::Error,
            format!(
                "token expired {} minutes ago and cannot be refreshed, re-authenticate",
                -secs / 60
            ),
        ),
        Some(secs) if secs < WARN_WITHIN_SECS => (
            HealthStatus::Warning,
            format!("token expires in {} minutes", secs / 60),
        ),
        Some(secs) => (
            HealthStatus::Healthy,
            format!("token valid for {:.1} hours", secs as f64 / 3600.0),
        ),
    };

    CredentialHealth {
        expiry: credential.expiry,
        seconds_until_expiry: seconds_until_expiry(&credential, now),
        ..CredentialHealth::new(provider, status, message)
    }
}

/// Check every enabled credential in `config`.
pub fn check_all(config: &SalesConfig, now: DateTime<Utc>) -> HealthReport {
    let checks: Vec<CredentialHealth> = config
        .credentials
        .enabled()
        .map(|(provider, entry)| check_credential(provider, &entry.path, now))
        .collect();
    HealthReport {
        timestamp: now,
        overall_healthy: checks.iter().all(|c| c.healthy),
        checks,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{storage::write_credential, types::Credential},
        chrono::{TimeDelta, TimeZone},
        salesmcp_config::CredentialEntry,
        secrecy::Secret,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 15, 0, 0).unwrap()
    }

    fn write(dir: &Path, name: &str, expires_in: Option<i64>, refresh: bool) -> std::path::PathBuf {
        let path = dir.join(name);
        let credential = Credential {
            access_token: Secret::new("a".into()),
            refresh_token: refresh.then(|| Secret::new("r".into())),
            expiry: expires_in.map(|s| now() + TimeDelta::seconds(s)),
            client_id: "cid".into(),
            client_secret: Secret::new("s".into()),
            token_endpoint: "https://oauth2.googleapis.com/token".into(),
            scope: String::new(),
        };
        write_credential(&path, &credential).unwrap();
        path
    }

    #[test]
    fn classifies_by_remaining_lifetime() {
        let dir = tempfile::tempdir().unwrap();

        let ok = check_credential("google", &write(dir.path(), "ok.json", Some(7200), true), now());
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert_eq!(ok.seconds_until_expiry, Some(7200));

        let soon = check_credential("google", &write(dir.path(), "soon.json", Some(600), true), now());
        assert_eq!(soon.status, HealthStatus::Warning);
        assert!(soon.healthy);
        assert_eq!(soon.message, "token expires in 10 minutes");

        let dead = check_credential("google", &write(dir.path(), "dead.json", Some(-120), false), now());
        assert_eq!(dead.status, HealthStatus::Error);
        assert!(!dead.healthy);
        assert!(dead.message.contains("re-authenticate"));

        let pending = check_credential("google", &write(dir.path(), "pending.json", Some(-120), true), now());
        assert_eq!(pending.status, HealthStatus::Error);
        assert!(!pending.healthy);
        assert!(pending.message.contains("refresh has not succeeded"));

        let unknown = check_credential("google", &write(dir.path(), "unknown.json", None, false), now());
        assert_eq!(unknown.status, HealthStatus::Warning);
        assert!(unknown.healthy);
        assert_eq!(unknown.seconds_until_expiry, None);
    }

    #[test]
    fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let health = check_credential("calendly", &dir.path().join("nope.json"), now());
        assert_eq!(health.status, HealthStatus::Error);
        assert!(health.message.contains("interactive OAuth flow"));
    }

    #[test]
    fn report_is_unhealthy_if_any_check_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SalesConfig::default();
        config.credentials.providers.insert(
            "google".into(),
            CredentialEntry::at(write(dir.path(), "g.json", Some(7200), true)),
        );
        config
            .credentials
            .providers
            .insert("calendly".into(), CredentialEntry::at(dir.path().join("missing.json")));

        let report = check_all(&config, now());
        assert_eq!(report.checks.len(), 2);
        assert!(!report.overall_healthy);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checks"][0]["provider"], "calendly");
        assert_eq!(json["checks"][0]["status"], "error");
        assert_eq!(json["checks"][1]["status"], "healthy");
    }
}
