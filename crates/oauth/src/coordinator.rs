//! Single-flight refresh of one credential.
//!
//! A [`RefreshCoordinator`] owns the in-memory copy of a credential and is the
//! only thing allowed to replace it. Callers that find the token stale join
//! the attempt already in flight, if any, instead of starting another
//! exchange: providers that rotate refresh tokens invalidate the old one on
//! every exchange, so two concurrent exchanges can leave the store holding a
//! dead refresh token.
//!
//! The exchange runs in its own task and publishes its outcome on a `watch`
//! channel, so a caller that gives up waiting does not cancel the attempt for
//! everyone else. Callers that were already waiting to start an attempt when
//! one finished receive that attempt's result, and a failed attempt is shared
//! with every caller arriving within the retry backoff.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    tokio::sync::{Mutex, RwLock, watch},
    tracing::{debug, error, info, warn},
};

use crate::{
    clock::Clock,
    defaults::resolve_token_endpoint,
    error::{AuthError, StoreError, TransportError},
    expiry::{self, DEFAULT_MIN_LIFETIME, TokenState},
    storage::CredentialStore,
    transport::TokenTransport,
    types::Credential,
};

/// Default upper bound on one token exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a failed attempt is handed to new callers instead of retrying.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub min_lifetime: Duration,
    /// Bounds the whole attempt, store I/O included.
    pub exchange_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            min_lifetime: DEFAULT_MIN_LIFETIME,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl From<&salesmcp_config::RefreshConfig> for RefreshSettings {
    fn from(cfg: &salesmcp_config::RefreshConfig) -> Self {
        Self {
            min_lifetime: cfg.min_lifetime(),
            exchange_timeout: cfg.exchange_timeout(),
            retry_backoff: cfg.retry_backoff(),
        }
    }
}

/// Snapshot for status and health reporting. Contains no secrets.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub provider: String,
    pub state: TokenState,
    pub expiry: Option<DateTime<Utc>>,
    pub seconds_until_expiry: Option<i64>,
    pub has_refresh_token: bool,
    pub scope: String,
}

/// Result of re-reading the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Replaced,
    /// A refresh was in flight; the in-memory credential was left alone.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Skip the exchange if someone else already refreshed.
    IfStale,
    Force,
}

type AttemptResult = Result<Credential, AuthError>;

/// Bookkeeping for the single in-flight attempt.
#[derive(Default)]
struct Flight {
    /// Number of attempts that have finished.
    generation: u64,
    running: Option<watch::Receiver<Option<AttemptResult>>>,
    last: Option<Finished>,
}

struct Finished {
    result: AttemptResult,
    at: DateTime<Utc>,
}

/// Hands out valid bearer tokens for one provider account.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    provider: String,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn TokenTransport>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    credential: RwLock<Credential>,
    /// Endpoint override from configuration, re-applied to every credential
    /// adopted from the store.
    configured_endpoint: Option<String>,
    /// Locked only to join, start or publish an attempt.
    flight: Mutex<Flight>,
}

impl RefreshCoordinator {
    pub fn new(
        provider: impl Into<String>,
        credential: Credential,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
    ) -> Self {
        Self::with_configured_endpoint(provider, credential, store, transport, clock, settings, None)
    }

    /// Like [`RefreshCoordinator::new`], keeping a configured token endpoint
    /// that wins over whatever a stored credential names.
    pub fn with_configured_endpoint(
        provider: impl Into<String>,
        credential: Credential,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
        configured_endpoint: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider: provider.into(),
                store,
                transport,
                clock,
                settings,
                credential: RwLock::new(credential),
                configured_endpoint,
                flight: Mutex::new(Flight::default()),
            }),
        }
    }

    /// Build a coordinator from whatever the store currently holds.
    pub async fn load(
        provider: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
    ) -> Result<Self, StoreError> {
        let credential = store.load().await?;
        Ok(Self::new(
            provider, credential, store, transport, clock, settings,
        ))
    }

    pub fn provider(&self) -> &str {
        &self.inner.provider
    }

    pub fn settings(&self) -> RefreshSettings {
        self.inner.settings
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Current classification of the in-memory credential.
    pub async fn state(&self) -> TokenState {
        let credential = self.inner.credential.read().await;
        expiry::classify(
            &credential,
            self.inner.clock.now(),
            self.inner.settings.min_lifetime,
        )
    }

    pub async fn status(&self) -> CredentialStatus {
        let now = self.inner.clock.now();
        let credential = self.inner.credential.read().await;
        CredentialStatus {
            provider: self.inner.provider.clone(),
            state: expiry::classify(&credential, now, self.inner.settings.min_lifetime),
            expiry: credential.expiry,
            seconds_until_expiry: expiry::seconds_until_expiry(&credential, now),
            has_refresh_token: credential.has_refresh_token(),
            scope: credential.scope.clone(),
        }
    }

    /// A bearer token that is valid right now.
    ///
    /// Fresh tokens are returned without I/O. Stale ones are refreshed, or the
    /// caller joins the refresh already in flight.
    pub async fn get_valid_token(&self) -> Result<Secret<String>, AuthError> {
        let provider = self.provider();
        let seen = self.generation().await;
        match self.state().await {
            TokenState::Fresh => return Ok(self.current_token().await),
            TokenState::Expired => {
                return Err(AuthError::reauth(
                    provider,
                    "access token expired and no refresh token is stored",
                ));
            },
            TokenState::NeedsRefresh => {},
        }

        match self.attempt(Mode::IfStale, seen).await {
            Ok(credential) => Ok(credential.access_token),
            Err(err @ AuthError::Storage { .. }) => {
                error!(provider = %provider, error = %err, "refreshed token not persisted, using it for this request");
                Ok(self.current_token().await)
            },
            Err(err) => {
                // The old token may still have a few minutes left.
                let credential = self.inner.credential.read().await;
                let usable = !credential.access_token.expose_secret().is_empty()
                    && credential
                        .expiry
                        .is_some_and(|at| at > self.inner.clock.now());
                if !usable {
                    return Err(err);
                }
                if err.is_reauth_required() {
                    error!(provider = %provider, error = %err, "refresh rejected, serving the last valid token until it expires");
                } else {
                    warn!(provider = %provider, error = %err, "refresh failed, serving the last valid token");
                }
                Ok(credential.access_token.clone())
            },
        }
    }

    /// Exchange the refresh token now, whatever the current freshness.
    pub async fn refresh_now(&self) -> Result<Credential, AuthError> {
        let seen = self.generation().await;
        self.attempt(Mode::Force, seen).await
    }

    /// Adopt the stored credential if it supersedes the in-memory one, e.g.
    /// after an operator re-ran the interactive OAuth flow.
    ///
    /// A stored credential that is older than the in-memory one is ignored:
    /// after a failed save the store can still hold a refresh token the
    /// provider has already rotated away.
    pub async fn reload(&self) -> Result<ReloadOutcome, StoreError> {
        let flight = self.inner.flight.lock().await;
        if flight.running.is_some() {
            return Ok(ReloadOutcome::Skipped);
        }
        let stored = self.inner.store.load().await?;
        let mut credential = self.inner.credential.write().await;
        if credential.same_tokens(&stored) || !supersedes(&stored, &credential) {
            return Ok(ReloadOutcome::Unchanged);
        }
        info!(provider = %self.inner.provider, "adopted credential written outside this process");
        let adopted = self.inner.adopt(stored, &credential.token_endpoint);
        *credential = adopted;
        Ok(ReloadOutcome::Replaced)
    }

    async fn generation(&self) -> u64 {
        self.inner.flight.lock().await.generation
    }

    async fn current_token(&self) -> Secret<String> {
        self.inner.credential.read().await.access_token.clone()
    }

    /// Join the in-flight attempt, reuse one that finished since `seen`, or
    /// start one.
    async fn attempt(&self, mode: Mode, seen: u64) -> AttemptResult {
        let mut rx = {
            let mut flight = self.inner.flight.lock().await;
            if let Some(rx) = flight.running.as_ref() {
                debug!(provider = %self.inner.provider, "joining in-flight refresh");
                rx.clone()
            } else if let Some(result) = self.inner.reusable(&flight, seen) {
                debug!(provider = %self.inner.provider, "reusing result of the last refresh");
                return result;
            } else {
                let (tx, rx) = watch::channel(None);
                flight.running = Some(rx.clone());
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let timeout = inner.settings.exchange_timeout;
                    let result = match tokio::time::timeout(timeout, inner.exchange(mode)).await {
                        Ok(result) => result,
                        Err(_) => Err(inner.failed(TransportError::Timeout(timeout))),
                    };
                    {
                        let mut flight = inner.flight.lock().await;
                        flight.generation += 1;
                        flight.running = None;
                        flight.last = Some(Finished {
                            result: result.clone(),
                            at: inner.clock.now(),
                        });
                    }
                    let _ = tx.send(Some(result));
                });
                rx
            }
        };

        match rx.wait_for(Option::is_some).await {
            Ok(published) => (*published).clone().unwrap_or_else(|| {
                Err(AuthError::transient(
                    &self.inner.provider,
                    "refresh finished without a result",
                ))
            }),
            Err(_) => Err(AuthError::transient(
                &self.inner.provider,
                "refresh task ended without a result",
            )),
        }
    }
}

impl Inner {
    /// One guarded token exchange. Runs at most once at a time per credential.
    async fn exchange(&self, mode: Mode) -> AttemptResult {
        let current = self.latest().await;
        let state = expiry::classify(&current, self.clock.now(), self.settings.min_lifetime);
        if mode == Mode::IfStale && state == TokenState::Fresh {
            debug!(provider = %self.provider, "credential already refreshed");
            return Ok(current);
        }

        let Some(request) = current.refresh_request() else {
            return Err(AuthError::reauth(
                &self.provider,
                "no refresh token is stored",
            ));
        };
        if request.token_endpoint.is_empty() {
            return Err(AuthError::reauth(
                &self.provider,
                "credential has no token endpoint",
            ));
        }

        let forced = mode == Mode::Force;
        debug!(provider = %self.provider, forced, "exchanging refresh token");
        let response = self
            .transport
            .refresh(&request)
            .await
            .map_err(|err| self.failed(err))?;

        let rotated = response.refresh_token.is_some();
        let updated = current.refreshed(response, self.clock.now());

        // Replace in memory first: a rotated refresh token must survive even
        // if the write below fails.
        *self.credential.write().await = updated.clone();

        if let Err(e) = self.store.save(&updated).await {
            error!(provider = %self.provider, location = %self.store.location(), error = %e, "failed to persist refreshed credential");
            return Err(AuthError::storage(&self.provider, e.to_string()));
        }

        info!(
            provider = %self.provider,
            expiry = ?updated.expiry,
            rotated,
            "access token refreshed"
        );
        Ok(updated)
    }

    /// The newer of the in-memory and stored credential.
    async fn latest(&self) -> Credential {
        let in_memory = self.credential.read().await.clone();
        match self.store.load().await {
            Ok(stored) if is_newer(&stored, &in_memory) => {
                debug!(provider = %self.provider, "store holds a newer credential");
                let adopted = self.adopt(stored, &in_memory.token_endpoint);
                *self.credential.write().await = adopted.clone();
                adopted
            },
            Ok(_) => in_memory,
            Err(e) => {
                debug!(provider = %self.provider, error = %e, "store unreadable, using in-memory credential");
                in_memory
            },
        }
    }

    /// Prepare a stored credential for use: the token endpoint is resolved the
    /// same way it was at load time, falling back to the one in memory.
    fn adopt(&self, mut stored: Credential, current_endpoint: &str) -> Credential {
        let candidate = if stored.token_endpoint.trim().is_empty() {
            current_endpoint
        } else {
            stored.token_endpoint.as_str()
        };
        let resolved = resolve_token_endpoint(
            &self.provider,
            self.configured_endpoint.as_deref(),
            candidate,
        );
        stored.token_endpoint = resolved.unwrap_or_else(|| current_endpoint.to_string());
        stored
    }

    /// The last attempt's result, if a caller that saw generation `seen`
    /// should take it instead of starting a new exchange.
    fn reusable(&self, flight: &Flight, seen: u64) -> Option<AttemptResult> {
        let last = flight.last.as_ref()?;
        let finished_since = flight.generation > seen;
        let backing_off = last.result.is_err()
            && TimeDelta::from_std(self.settings.retry_backoff)
                .ok()
                .and_then(|backoff| last.at.checked_add_signed(backoff))
                .is_some_and(|until| self.clock.now() < until);
        (finished_since || backing_off).then(|| last.result.clone())
    }

    fn failed(&self, err: TransportError) -> AuthError {
        let err = AuthError::from_transport(&self.provider, err);
        if err.is_reauth_required() {
            error!(provider = %self.provider, error = %err, "refresh token rejected, re-authentication required");
        } else {
            warn!(provider = %self.provider, error = %err, "token refresh failed");
        }
        err
    }
}

fn is_newer(candidate: &Credential, current: &Credential) -> bool {
    match (candidate.expiry, current.expiry) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Whether a stored credential should replace the in-memory one on reload.
fn supersedes(stored: &Credential, current: &Credential) -> bool {
    is_newer(stored, current) || (stored.has_refresh_token() && !current.has_refresh_token())
}
