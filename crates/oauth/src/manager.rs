//! All managed credentials of the server, one coordinator per provider.

use std::{collections::BTreeMap, sync::Arc};

use {
    salesmcp_config::SalesConfig,
    secrecy::Secret,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    background::BackgroundSettings,
    clock::Clock,
    coordinator::{CredentialStatus, RefreshCoordinator, RefreshSettings},
    defaults::resolve_token_endpoint,
    error::AuthError,
    storage::{CredentialStore, FileCredentialStore},
    transport::TokenTransport,
    types::Credential,
};

/// Entry point for vendor-tool adapters needing a bearer token.
///
/// Each provider has its own coordinator, so a slow refresh for one never
/// blocks another.
pub struct CredentialManager {
    coordinators: BTreeMap<String, RefreshCoordinator>,
    background: BackgroundSettings,
}

impl CredentialManager {
    pub fn new(background: BackgroundSettings) -> Self {
        Self {
            coordinators: BTreeMap::new(),
            background,
        }
    }

    /// Load every enabled credential named in `config`.
    ///
    /// Credentials that are missing or unreadable are skipped with a warning;
    /// their tools report "re-authenticate" until the interactive flow runs.
    pub async fn from_config(
        config: &SalesConfig,
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = RefreshSettings::from(&config.refresh);
        let mut manager = Self::new(BackgroundSettings::from(&config.refresh));

        for (provider, entry) in config.credentials.enabled() {
            let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(&entry.path));
            let mut credential = match store.load().await {
                Ok(c) => c,
                Err(e) if e.is_not_found() => {
                    warn!(provider, path = %entry.path.display(), "no stored credential, run the OAuth flow for this provider");
                    continue;
                },
                Err(e) => {
                    warn!(provider, error = %e, "skipping unreadable credential");
                    continue;
                },
            };

            match resolve_token_endpoint(
                provider,
                entry.token_endpoint.as_deref(),
                &credential.token_endpoint,
            ) {
                Some(endpoint) => credential.token_endpoint = endpoint,
                None => warn!(provider, "no usable token endpoint, refresh will fail"),
            }

            info!(provider, path = %entry.path.display(), "loaded credential");
            manager.insert(RefreshCoordinator::with_configured_endpoint(
                provider,
                credential,
                store,
                Arc::clone(&transport),
                Arc::clone(&clock),
                settings,
                entry.token_endpoint.clone(),
            ));
        }

        manager
    }

    pub fn insert(&mut self, coordinator: RefreshCoordinator) {
        self.coordinators
            .insert(coordinator.provider().to_string(), coordinator);
    }

    pub fn get(&self, provider: &str) -> Option<&RefreshCoordinator> {
        self.coordinators.get(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.coordinators.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    fn coordinator(&self, provider: &str) -> Result<&RefreshCoordinator, AuthError> {
        self.get(provider).ok_or_else(|| {
            AuthError::reauth(provider, "no credential loaded; run the OAuth flow first")
        })
    }

    /// A valid bearer token for `provider`.
    pub async fn get_valid_token(&self, provider: &str) -> Result<Secret<String>, AuthError> {
        self.coordinator(provider)?.get_valid_token().await
    }

    /// Force a token exchange for `provider`.
    pub async fn refresh_now(&self, provider: &str) -> Result<Credential, AuthError> {
        self.coordinator(provider)?.refresh_now().await
    }

    pub async fn status(&self) -> Vec<CredentialStatus> {
        let mut out = Vec::with_capacity(self.coordinators.len());
        for coordinator in self.coordinators.values() {
            out.push(coordinator.status().await);
        }
        out
    }

    /// Start one background refresh loop per credential.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.coordinators
            .values()
            .map(|coordinator| {
                let coordinator = coordinator.clone();
                let cancel = cancel.child_token();
                let settings = self.background;
                tokio::spawn(async move {
                    coordinator.run_background_refresh(settings, cancel).await;
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use {
        super::*,
        crate::{
            clock::ManualClock,
            error::TransportError,
            expiry::TokenState,
            storage::write_credential,
            types::{RefreshRequest, TokenResponse},
        },
        async_trait::async_trait,
        chrono::{DateTime, TimeDelta, TimeZone, Utc},
        salesmcp_config::CredentialEntry,
        secrecy::ExposeSecret,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    fn credential(expires_in: i64, endpoint: &str) -> Credential {
        Credential {
            access_token: Secret::new("a1".into()),
            refresh_token: Some(Secret::new("r1".into())),
            expiry: Some(now() + TimeDelta::seconds(expires_in)),
            client_id: "cid".into(),
            client_secret: Secret::new("secret".into()),
            token_endpoint: endpoint.into(),
            scope: String::new(),
        }
    }

    /// Records which endpoints were hit; calendly's answers slowly.
    #[derive(Default)]
    struct EndpointRecorder {
        google: AtomicUsize,
        calendly: AtomicUsize,
    }

    #[async_trait]
    impl TokenTransport for EndpointRecorder {
        async fn refresh(&self, request: &RefreshRequest) -> Result<TokenResponse, TransportError> {
            if request.token_endpoint.contains("calendly") {
                self.calendly.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(TokenResponse::new("calendly-new", 3600))
            } else {
                self.google.fetch_add(1, Ordering::SeqCst);
                Ok(TokenResponse::new("google-new", 3600))
            }
        }
    }

    fn config_with(dir: &std::path::Path) -> SalesConfig {
        let mut config = SalesConfig::default();
        config.credentials.providers.clear();
        config.credentials.providers.insert(
            "google".into(),
            CredentialEntry::at(dir.join("token.json")),
        );
        config.credentials.providers.insert(
            "calendly".into(),
            CredentialEntry::at(dir.join("calendly_token.json")),
        );
        config
    }

    #[tokio::test]
    async fn loads_present_credentials_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_credential(&dir.path().join("token.json"), &credential(3600, "")).unwrap();

        let manager = CredentialManager::from_config(
            &config_with(dir.path()),
            Arc::new(EndpointRecorder::default()),
            Arc::new(ManualClock::new(now())),
        )
        .await;

        assert_eq!(manager.providers().collect::<Vec<_>>(), vec!["google"]);
        let err = manager.get_valid_token("calendly").await.unwrap_err();
        assert!(err.is_reauth_required());

        let token = manager.get_valid_token("google").await.unwrap();
        assert_eq!(token.expose_secret(), "a1");
    }

    #[tokio::test]
    async fn empty_endpoint_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        write_credential(&dir.path().join("token.json"), &credential(3600, "")).unwrap();
        let transport = Arc::new(EndpointRecorder::default());

        let manager = CredentialManager::from_config(
            &config_with(dir.path()),
            transport.clone(),
            Arc::new(ManualClock::new(now())),
        )
        .await;
        manager.refresh_now("google").await.unwrap();
        assert_eq!(transport.google.load(Ordering::SeqCst), 1);

        let stored = crate::storage::read_credential(&dir.path().join("token.json")).unwrap();
        assert_eq!(stored.token_endpoint, "https://oauth2.googleapis.com/token");
        assert_eq!(stored.access_token.expose_secret(), "google-new");
    }

    #[tokio::test]
    async fn slow_refresh_does_not_block_other_credentials() {
        let dir = tempfile::tempdir().unwrap();
        write_credential(
            &dir.path().join("token.json"),
            &credential(60, "https://oauth2.googleapis.com/token"),
        )
        .unwrap();
        write_credential(
            &dir.path().join("calendly_token.json"),
            &credential(60, "https://auth.calendly.com/oauth/token"),
        )
        .unwrap();
        let transport = Arc::new(EndpointRecorder::default());
        let manager = CredentialManager::from_config(
            &config_with(dir.path()),
            transport.clone(),
            Arc::new(ManualClock::new(now())),
        )
        .await;

        let started = std::time::Instant::now();
        let (calendly, google) = tokio::join!(
            manager.get_valid_token("calendly"),
            async {
                let token = manager.get_valid_token("google").await;
                (token, started.elapsed())
            }
        );

        assert_eq!(calendly.unwrap().expose_secret(), "calendly-new");
        let (google, elapsed) = google;
        assert_eq!(google.unwrap().expose_secret(), "google-new");
        assert!(elapsed < Duration::from_millis(200), "{elapsed:?}");

        let states: Vec<TokenState> = manager.status().await.into_iter().map(|s| s.state).collect();
        assert_eq!(states, vec![TokenState::Fresh, TokenState::Fresh]);
    }

    #[tokio::test]
    async fn background_loops_stop_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        write_credential(&dir.path().join("token.json"), &credential(3600, "")).unwrap();
        let manager = CredentialManager::from_config(
            &config_with(dir.path()),
            Arc::new(EndpointRecorder::default()),
            Arc::new(ManualClock::new(now())),
        )
        .await;

        let cancel = CancellationToken::new();
        let handles = manager.spawn_background(&cancel);
        assert_eq!(handles.len(), 1);
        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
