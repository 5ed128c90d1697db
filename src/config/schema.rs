//! Configuration schema for strata
//!
//! Global configuration is stored at `~/.config/strata/config.toml`.
//! A project-local `strata.toml` in the build context is merged on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Image build defaults
    pub build: BuildConfig,

    /// Dependency installer settings
    pub installer: InstallerConfig,

    /// Container runtime selection
    pub runtime: RuntimeConfig,

    /// Layer cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append build events to the build log
    pub build_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            build_log: true,
        }
    }
}

/// Image build defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Base runtime image
    pub base_image: String,

    /// Dependency manifest, relative to the build context
    pub manifest: PathBuf,

    /// Working directory inside the image
    pub workdir: String,

    /// Command recorded as the image entry point
    pub entry_command: Vec<String>,

    /// Path prefixes (relative to the context) left out of the source layer
    pub exclude: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_image: "python:3.11-slim".to_string(),
            manifest: PathBuf::from("requirements.txt"),
            workdir: "/app".to_string(),
            entry_command: vec!["python".to_string(), "main.py".to_string()],
            exclude: vec![
                ".git".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "strata.toml".to_string(),
            ],
        }
    }
}

/// Dependency installer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Installer argv, run inside the base image.
    ///
    /// `{manifest}` expands to the manifest path and `{target}` to the
    /// layer root inside the installer container.
    pub command: Vec<String>,

    /// Network mode for the installer container
    pub network: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            command: [
                "pip",
                "install",
                "--no-cache-dir",
                "--prefix",
                "{target}/usr/local",
                "-r",
                "{manifest}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            network: "host".to_string(),
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// "auto", "podman" or "docker"
    pub engine: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: "auto".to_string(),
        }
    }
}

/// Layer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Override for the layer store root (default: the state directory)
    pub dir: Option<PathBuf>,

    /// `cache gc` removes layers older than N days (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            gc_days: 30,
        }
    }
}
