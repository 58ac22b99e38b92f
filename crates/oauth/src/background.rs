//! Proactive refresh loop, one per credential.

use std::time::Duration;

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    coordinator::{RefreshCoordinator, ReloadOutcome},
    error::AuthError,
    expiry::TokenState,
};

/// Default time between background ticks.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, Copy)]
pub struct BackgroundSettings {
    pub interval: Duration,
    /// Consecutive re-auth failures after which the loop stops calling the
    /// token endpoint and only watches the store.
    pub escalate_after: u32,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
            escalate_after: 3,
        }
    }
}

impl From<&salesmcp_config::RefreshConfig> for BackgroundSettings {
    fn from(cfg: &salesmcp_config::RefreshConfig) -> Self {
        Self {
            interval: cfg.interval(),
            escalate_after: cfg.escalate_after.max(1),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Fresh,
    Refreshed,
    TransientFailure,
    StorageFailure,
    ReauthRequired { consecutive: u32 },
    /// Escalated: waiting for an out-of-band re-authentication.
    AwaitingReauth { consecutive: u32 },
}

/// Drives [`RefreshCoordinator::refresh_now`] ahead of expiry.
pub struct BackgroundRefresher {
    coordinator: RefreshCoordinator,
    settings: BackgroundSettings,
    consecutive_reauth: u32,
}

impl BackgroundRefresher {
    pub fn new(coordinator: RefreshCoordinator, settings: BackgroundSettings) -> Self {
        Self {
            coordinator,
            settings,
            consecutive_reauth: 0,
        }
    }

    /// Classify and refresh if needed. Never fails; the outcome is logged.
    pub async fn tick(&mut self) -> TickOutcome {
        let provider = self.coordinator.provider().to_string();

        if self.escalated() {
            match self.coordinator.reload().await {
                Ok(ReloadOutcome::Replaced) => {
                    info!(provider = %provider, "re-authenticated credential found, resuming refresh");
                    self.consecutive_reauth = 0;
                },
                Ok(_) => {
                    self.consecutive_reauth = self.consecutive_reauth.saturating_add(1);
                    error!(
                        provider = %provider,
                        consecutive = self.consecutive_reauth,
                        "credential still needs re-authentication, not retrying refresh"
                    );
                    return TickOutcome::AwaitingReauth {
                        consecutive: self.consecutive_reauth,
                    };
                },
                Err(e) => {
                    self.consecutive_reauth = self.consecutive_reauth.saturating_add(1);
                    error!(provider = %provider, error = %e, "credential store unreadable while awaiting re-authentication");
                    return TickOutcome::AwaitingReauth {
                        consecutive: self.consecutive_reauth,
                    };
                },
            }
        }

        let state = self.coordinator.state().await;
        if state == TokenState::Fresh {
            debug!(provider = %provider, "token fresh, nothing to do");
            self.consecutive_reauth = 0;
            return TickOutcome::Fresh;
        }

        match self.coordinator.refresh_now().await {
            Ok(credential) => {
                self.consecutive_reauth = 0;
                info!(provider = %provider, expiry = ?credential.expiry, "background refresh succeeded");
                TickOutcome::Refreshed
            },
            Err(AuthError::ReauthRequired { reason, .. }) => {
                self.consecutive_reauth = self.consecutive_reauth.saturating_add(1);
                if self.escalated() {
                    error!(
                        provider = %provider,
                        consecutive = self.consecutive_reauth,
                        reason = %reason,
                        "re-authentication required; pausing refresh attempts until the credential is replaced"
                    );
                } else {
                    error!(
                        provider = %provider,
                        consecutive = self.consecutive_reauth,
                        reason = %reason,
                        "re-authentication required"
                    );
                }
                TickOutcome::ReauthRequired {
                    consecutive: self.consecutive_reauth,
                }
            },
            Err(e @ AuthError::Transient { .. }) => {
                warn!(provider = %provider, error = %e, "background refresh failed, retrying next tick");
                TickOutcome::TransientFailure
            },
            Err(e @ AuthError::Storage { .. }) => {
                error!(provider = %provider, error = %e, "refreshed token could not be persisted");
                TickOutcome::StorageFailure
            },
        }
    }

    fn escalated(&self) -> bool {
        self.consecutive_reauth >= self.settings.escalate_after
    }

    /// Tick immediately, then every `interval`, until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let clock = self.coordinator.clock().clone();
        let interval = self.settings.interval;
        info!(
            provider = %self.coordinator.provider(),
            interval_secs = interval.as_secs(),
            min_lifetime_secs = self.coordinator.settings().min_lifetime.as_secs(),
            "background refresh started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.tick() => debug!(?outcome, "background refresh tick"),
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = clock.sleep(interval) => {},
            }
        }

        info!(provider = %self.coordinator.provider(), "background refresh stopped");
    }
}

impl RefreshCoordinator {
    /// Run the proactive refresh loop for this credential until `cancel` fires.
    pub async fn run_background_refresh(
        &self,
        settings: BackgroundSettings,
        cancel: CancellationToken,
    ) {
        BackgroundRefresher::new(self.clone(), settings)
            .run(cancel)
            .await;
    }
}
