use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Name of the settings file (persisted storage).
pub const SETTINGS_FILE: &str = "vuer.json";
/// Default log file name for `--log` without a path.
pub const LOG_FILE: &str = "vuer.log";

const APP_DIR: &str = "vuer";
const ENV_CONFIG_DIR: &str = "VUER_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (VUER_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(ENV_CONFIG_DIR).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. VUER_CONFIG_DIR environment variable
/// 3. Local folder IF any of vuer.json / vuer.log exist there
/// 4. Platform config directory from dirs-next (`~/.config/vuer` on Linux)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Get path to a data file (logs). Same priority as [`config_file`], with
/// the platform data directory as the last step.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

/// Create the config and data directories if missing.
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    if data_dir != config_dir {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

/// Shared resolution: explicit dir, then `cwd` if it holds our files, then
/// `platform`.
fn resolve(config: &PathConfig, cwd: Option<&Path>, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(cwd) = cwd
        && has_local_files(cwd)
    {
        return cwd.to_path_buf();
    }
    platform
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn config_dir(config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve(config, cwd.as_deref(), dirs_next::config_dir())
}

fn data_dir(config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve(config, cwd.as_deref(), dirs_next::data_dir())
}
