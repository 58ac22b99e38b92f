use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::SalesConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "salesmcp.toml",
    "salesmcp.yaml",
    "salesmcp.yml",
    "salesmcp.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory and relative credential paths resolve against it.
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut slot) = CONFIG_DIR_OVERRIDE.lock() {
        *slot = Some(path);
    }
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    if let Ok(mut slot) = CONFIG_DIR_OVERRIDE.lock() {
        *slot = None;
    }
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.lock().ok().and_then(|slot| slot.clone())
}

/// Load config from the given path (any supported format).
///
/// Relative credential paths are resolved against the config file's directory.
pub fn load_config(path: &Path) -> anyhow::Result<SalesConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    if let Some(base) = path.parent() {
        resolve_paths(&mut config, base);
    }
    validate(&config)?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./salesmcp.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/salesmcp/salesmcp.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `SalesConfig::default()`, whose credential paths are
/// relative to the working directory.
pub fn discover_and_load() -> SalesConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        let mut config = SalesConfig::default();
        if let Some(dir) = config_dir_override() {
            resolve_paths(&mut config, &dir);
        }
        return config;
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            SalesConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    if let Some(p) = first_existing(Path::new("")) {
        return Some(p);
    }

    config_dir().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/salesmcp/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("salesmcp"))
}

fn resolve_paths(config: &mut SalesConfig, base: &Path) {
    for entry in config.credentials.providers.values_mut() {
        if entry.path.is_relative() && !entry.path.as_os_str().is_empty() {
            entry.path = base.join(&entry.path);
        }
    }
}

fn validate(config: &SalesConfig) -> anyhow::Result<()> {
    if config.refresh.interval_secs == 0 {
        anyhow::bail!("refresh.interval_secs must be greater than zero");
    }
    if config.refresh.exchange_timeout_secs == 0 {
        anyhow::bail!("refresh.exchange_timeout_secs must be greater than zero");
    }
    for (name, entry) in config.credentials.enabled() {
        if entry.path.as_os_str().is_empty() {
            anyhow::bail!("credentials.{name}.path is required");
        }
        if let Some(endpoint) = &entry.token_endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| anyhow::anyhow!("credentials.{name}.token_endpoint: {e}"))?;
        }
    }
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SalesConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
