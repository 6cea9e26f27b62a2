//! Configuration management for Kiln

pub mod schema;

pub use schema::Config;

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "KILN_CACHE_DIR";

/// Environment variable forcing rebuilds ("1" or "true")
pub const FORCE_REBUILD_ENV: &str = "KILN_FORCE_REBUILD";

/// Platform cache directory for Kiln
///
/// - Linux: `$XDG_CACHE_HOME/kiln` or `~/.cache/kiln`
/// - macOS: `~/Library/Caches/kiln`
/// - Windows: `%LOCALAPPDATA%/kiln/cache`
pub fn default_cache_dir() -> Option<PathBuf> {
    let base = dirs::cache_dir()?.join("kiln");
    if cfg!(windows) {
        Some(base.join("cache"))
    } else {
        Some(base)
    }
}

/// Cache root: `KILN_CACHE_DIR`, then `[cache].dir`, then the platform default
pub fn resolve_cache_dir(config: &Config) -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    config.cache.dir.clone().or_else(default_cache_dir)
}

/// Whether every build should be forced, from `KILN_FORCE_REBUILD` or `[cache].force_rebuild`
pub fn force_rebuild(config: &Config) -> bool {
    let from_env = std::env::var(FORCE_REBUILD_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false);
    from_env || config.cache.force_rebuild
}

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
            .join("config.toml")
    }

    fn parse(path: &Path, content: &str) -> KilnResult<Config> {
        toml::from_str(content).map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> KilnResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            KilnError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;
        Self::parse(&self.config_path, &content)
    }

    /// Blocking variant of `load` for callers outside an async runtime
    pub fn load_blocking(&self) -> KilnResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            KilnError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;
        Self::parse(&self.config_path, &content)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> KilnResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KilnError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> KilnResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
