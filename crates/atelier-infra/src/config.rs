//! Configuration loader for Atelier.
//!
//! Reads `config.toml` and deserializes it into [`OrchestratorConfig`]. An
//! explicitly requested file (`--config` / `ATELIER_CONFIG`) must load; the
//! default file under the user config directory falls back to defaults when
//! missing or malformed.

use std::path::{Path, PathBuf};

use atelier_types::config::OrchestratorConfig;
use thiserror::Error;

/// Errors loading an explicitly requested configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// `<config_dir>/atelier/config.toml`, e.g. `~/.config/atelier/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("atelier").join("config.toml"))
}

/// Load configuration.
///
/// - With `explicit`, the file must exist and parse.
/// - Otherwise the default path is tried: missing returns
///   [`OrchestratorConfig::default()`], malformed logs a warning and returns
///   the default.
pub async fn load_config(explicit: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    if let Some(path) = explicit {
        let config = load_config_file(path).await?;
        tracing::debug!(path = %path.display(), services = config.services.len(), "loaded configuration");
        return Ok(config);
    }

    match default_config_path() {
        Some(path) => Ok(load_default_config(&path).await),
        None => {
            tracing::debug!("no user config directory, using defaults");
            Ok(OrchestratorConfig::default())
        }
    }
}

/// Read and parse one configuration file.
pub async fn load_config_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

async fn load_default_config(config_path: &Path) -> OrchestratorConfig {
    match load_config_file(config_path).await {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            OrchestratorConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            OrchestratorConfig::default()
        }
    }
}
