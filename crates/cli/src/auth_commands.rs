use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    salesmcp_config::SalesConfig,
    salesmcp_oauth::{CredentialManager, CredentialStatus, ReqwestTransport, SystemClock, TokenState},
    secrecy::ExposeSecret,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Show token state for every managed credential.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Exchange the refresh token now, regardless of expiry.
    Refresh {
        /// Provider name (e.g. "google", "calendly").
        #[arg(long)]
        provider: String,
    },
    /// Print a valid bearer token, refreshing first if needed.
    Token {
        /// Provider name (e.g. "google", "calendly").
        #[arg(long)]
        provider: String,
    },
}

pub async fn handle_auth(config: &SalesConfig, action: AuthAction) -> Result<()> {
    let manager = CredentialManager::from_config(
        config,
        Arc::new(ReqwestTransport::default()),
        Arc::new(SystemClock),
    )
    .await;

    match action {
        AuthAction::Status { json } => status(&manager, json).await,
        AuthAction::Refresh { provider } => refresh(&manager, &provider).await,
        AuthAction::Token { provider } => token(&manager, &provider).await,
    }
}

async fn status(manager: &CredentialManager, json: bool) -> Result<()> {
    let statuses = manager.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }
    if statuses.is_empty() {
        println!("No credentials loaded.");
        return Ok(());
    }
    for s in &statuses {
        println!("{}", describe(s));
    }
    Ok(())
}

async fn refresh(manager: &CredentialManager, provider: &str) -> Result<()> {
    let credential = manager.refresh_now(provider).await?;
    let expiry = credential
        .expiry
        .map_or("unknown".to_string(), |at| at.to_rfc3339());
    println!("Refreshed {provider}, new expiry {expiry}");
    Ok(())
}

async fn token(manager: &CredentialManager, provider: &str) -> Result<()> {
    let token = manager.get_valid_token(provider).await?;
    println!("{}", token.expose_secret());
    Ok(())
}

/// One status line, e.g. `google [valid (1h 5m remaining)]`.
pub fn describe(status: &CredentialStatus) -> String {
    let remaining = match status.seconds_until_expiry {
        Some(secs) if secs > 0 => {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{hours}h {mins}m remaining")
        },
        Some(_) => "expired".to_string(),
        None => "expiry unknown".to_string(),
    };
    let state = match status.state {
        TokenState::Fresh => "valid",
        TokenState::NeedsRefresh => "refresh due",
        TokenState::Expired => "re-authentication required",
    };
    let refresh = if status.has_refresh_token {
        ""
    } else {
        ", no refresh token"
    };
    format!("{} [{state} ({remaining}){refresh}]", status.provider)
}
