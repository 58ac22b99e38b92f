use std::{io, time::Duration};

/// Why a bearer token could not be produced.
///
/// `Clone` so one refresh attempt's outcome can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The grant is dead. Only a new interactive OAuth flow fixes this.
    #[error("authentication expired for {provider}, re-authenticate: {reason}")]
    ReauthRequired { provider: String, reason: String },

    /// Network, 5xx or timeout. The stored credential is untouched.
    #[error("token refresh for {provider} failed, will retry: {reason}")]
    Transient { provider: String, reason: String },

    /// The exchange succeeded but the result could not be persisted.
    #[error("credential storage for {provider} failed: {reason}")]
    Storage { provider: String, reason: String },
}

impl AuthError {
    pub fn reauth(provider: &str, reason: impl Into<String>) -> Self {
        Self::ReauthRequired {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transient(provider: &str, reason: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn storage(provider: &str, reason: impl Into<String>) -> Self {
        Self::Storage {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Map a token-endpoint failure onto the auth taxonomy.
    pub fn from_transport(provider: &str, err: TransportError) -> Self {
        match err {
            TransportError::InvalidGrant { .. } => Self::reauth(provider, err.to_string()),
            _ => Self::transient(provider, err.to_string()),
        }
    }

    pub fn is_reauth_required(&self) -> bool {
        matches!(self, Self::ReauthRequired { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Failure talking to a provider's token endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("refresh token rejected (invalid_grant): {description}")]
    InvalidGrant { description: String },

    #[error("token endpoint returned {status}: {error}")]
    Status { status: u16, error: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("token exchange timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure reading or writing a persisted credential.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no credential stored at {0}; run the interactive OAuth flow first")]
    NotFound(String),

    #[error("failed to read credential {location}: {source}")]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse credential {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write credential {location}: {source}")]
    Write {
        location: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
