//! OAuth credential lifecycle for the sales MCP server's Google and Calendly
//! tools: expiry tracking, proactive single-flight refresh, and durable
//! storage of rotated tokens.

pub mod background;
pub mod clock;
pub mod coordinator;
pub mod defaults;
pub mod error;
pub mod expiry;
pub mod health;
pub mod manager;
pub mod storage;
pub mod transport;
pub mod types;

pub use {
    background::{BackgroundRefresher, BackgroundSettings, TickOutcome},
    clock::{Clock, ManualClock, SystemClock},
    coordinator::{CredentialStatus, RefreshCoordinator, RefreshSettings, ReloadOutcome},
    error::{AuthError, StoreError, TransportError},
    expiry::{TokenState, classify, seconds_until_expiry},
    health::{CredentialHealth, HealthReport, HealthStatus},
    manager::CredentialManager,
    storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore},
    transport::{ReqwestTransport, TokenTransport},
    types::{Credential, RefreshRequest, TokenResponse},
};
