//! Configuration management for strata

pub mod schema;

pub use schema::Config;

use crate::error::{StrataError, StrataResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local config file looked up in the build context
pub const LOCAL_CONFIG_FILE: &str = "strata.toml";

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
            .join("strata")
            .join("config.toml")
    }

    /// Get the state directory path (layer store, images, build log)
    pub fn state_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata")
    }

    /// Get the build log path
    pub fn build_log_path() -> PathBuf {
        Self::state_dir().join("builds.log")
    }

    /// Resolve the layer store root, honoring `cache.dir`
    pub fn store_root(config: &Config) -> PathBuf {
        config.cache.dir.clone().unwrap_or_else(Self::state_dir)
    }

    /// Look for a project-local config file in `dir`
    pub fn find_local_config(dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(LOCAL_CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    }

    /// Load configuration, falling back to defaults when no file exists
    pub async fn load(&self) -> StrataResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StrataResult<Config> {
        let value = read_toml_value(path).await?;
        value.try_into().map_err(|e: toml::de::Error| StrataError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the global config and merge a project-local file over it.
    ///
    /// Tables are merged key by key; any other value in the local file
    /// replaces the global one.
    pub async fn load_merged(&self, local: Option<&Path>) -> StrataResult<Config> {
        let mut merged = if self.config_path.exists() {
            read_toml_value(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let source = match local {
            Some(local) => {
                debug!("Merging local config {}", local.display());
                merge_values(&mut merged, read_toml_value(local).await?);
                local.to_path_buf()
            }
            None => self.config_path.clone(),
        };

        merged
            .try_into()
            .map_err(|e: toml::de::Error| StrataError::ConfigInvalid {
                path: source,
                reason: e.to_string(),
            })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StrataResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StrataError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StrataResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StrataError::ConfigDirCreate {
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

async fn read_toml_value(path: &Path) -> StrataResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StrataError::io(format!("reading config from {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| StrataError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.build.base_image, "python:3.11-slim");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.build.workdir = "/srv".to_string();

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.build.workdir, "/srv");
    }

    #[tokio::test]
    async fn local_config_overrides_global_keys() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config.toml");
        std::fs::write(
            &global,
            "[build]\nbase_image = \"python:3.10\"\nworkdir = \"/srv\"\n[cache]\ngc_days = 7\n",
        )
        .unwrap();

        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join(LOCAL_CONFIG_FILE),
            "[build]\nbase_image = \"python:3.12-slim\"\n",
        )
        .unwrap();

        let manager = ConfigManager::with_path(global);
        let local = ConfigManager::find_local_config(&project);
        assert!(local.is_some());

        let config = manager.load_merged(local.as_deref()).await.unwrap();
        assert_eq!(config.build.base_image, "python:3.12-slim");
        assert_eq!(config.build.workdir, "/srv");
        assert_eq!(config.cache.gc_days, 7);
    }

    #[tokio::test]
    async fn invalid_local_config_errors() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(&local, "[build]\nworkdir = 42\n").unwrap();

        let manager = ConfigManager::with_path(temp.path().join("missing.toml"));
        let err = manager.load_merged(Some(&local)).await.unwrap_err();
        assert!(matches!(err, StrataError::ConfigInvalid { .. }));
    }

    #[test]
    fn find_local_config_absent() {
        let temp = TempDir::new().unwrap();
        assert!(ConfigManager::find_local_config(temp.path()).is_none());
    }
}
