/// Config schema types (refresh policy and per-provider credential files).
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesConfig {
    pub refresh: RefreshConfig,
    pub credentials: CredentialsConfig,
}

/// Timing knobs for the credential refresh coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between background refresh ticks.
    pub interval_secs: u64,

    /// A token with this many seconds or fewer left is refreshed ahead of time.
    pub min_lifetime_secs: u64,

    /// Upper bound on a single token exchange.
    pub exchange_timeout_secs: u64,

    /// Seconds a failed exchange is reported to new callers before another
    /// exchange is attempted.
    pub retry_backoff_secs: u64,

    /// Consecutive `invalid_grant` ticks before the background loop stops
    /// calling the token endpoint and waits for re-authentication.
    pub escalate_after: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1800,
            min_lifetime_secs: 300,
            exchange_timeout_secs: 120,
            retry_backoff_secs: 5,
            escalate_after: 3,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_lifetime(&self) -> Duration {
        Duration::from_secs(self.min_lifetime_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

/// Credential files keyed by provider name ("google", "calendly", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    #[serde(flatten)]
    pub providers: BTreeMap<String, CredentialEntry>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert("google".into(), CredentialEntry::at("token.json"));
        providers.insert(
            "calendly".into(),
            CredentialEntry::at("calendly_token.json"),
        );
        Self { providers }
    }
}

impl CredentialsConfig {
    /// Enabled providers in name order.
    pub fn enabled(&self) -> impl Iterator<Item = (&str, &CredentialEntry)> {
        self.providers
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, e)| (name.as_str(), e))
    }

    pub fn get(&self, name: &str) -> Option<&CredentialEntry> {
        self.providers.get(name)
    }
}

/// Where one provider's credential lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialEntry {
    /// Whether the credential is managed. Defaults to true.
    pub enabled: bool,

    /// Path of the persisted credential JSON.
    pub path: PathBuf,

    /// Override the token endpoint stored in the credential file.
    pub token_endpoint: Option<String>,
}

impl CredentialEntry {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for CredentialEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::new(),
            token_endpoint: None,
        }
    }
}
