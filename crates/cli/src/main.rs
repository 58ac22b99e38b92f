mod auth_commands;
mod health_commands;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use {
    clap::{Parser, Subcommand},
    salesmcp_config::SalesConfig,
    salesmcp_oauth::{CredentialManager, ReqwestTransport, SystemClock},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "salesmcp", about = "OAuth credential manager for the sales MCP server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: discover salesmcp.{toml,yaml,json}).
    #[arg(long, global = true, env = "SALESMCP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep every credential refreshed in the background until Ctrl-C.
    Serve,
    /// Credential management.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Check credential health; exits non-zero when unhealthy.
    Health {
        /// Print JSON for monitoring systems.
        #[arg(long)]
        json: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SalesConfig> {
    match &cli.config {
        Some(path) => salesmcp_config::load_config(path),
        None => Ok(salesmcp_config::discover_and_load()),
    }
}

async fn serve(config: &SalesConfig) -> anyhow::Result<()> {
    let manager = CredentialManager::from_config(
        config,
        Arc::new(ReqwestTransport::default()),
        Arc::new(SystemClock),
    )
    .await;
    if manager.is_empty() {
        anyhow::bail!("no credentials could be loaded; run the OAuth flow for at least one provider");
    }

    let cancel = CancellationToken::new();
    let handles = manager.spawn_background(&cancel);
    info!(
        providers = ?manager.providers().collect::<Vec<_>>(),
        "credential refresh running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "background refresh task panicked");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Auth { action } => auth_commands::handle_auth(&config, action).await?,
        Commands::Health { json } => {
            if !health_commands::handle_health(&config, json)? {
                return Ok(ExitCode::FAILURE);
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "salesmcp starting");
    run(cli).await
}
