//! Error types for strata
//!
//! All modules use `StrataResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for strata operations
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors that can occur in strata
#[derive(Error, Debug)]
pub enum StrataError {
    // Runtime errors
    #[error("No container runtime found. Install podman or docker")]
    RuntimeNotFound,

    #[error("Container runtime '{0}' is not available")]
    RuntimeUnavailable(String),

    #[error("Unknown container engine '{0}', expected auto, podman or docker")]
    UnknownEngine(String),

    // Build pipeline errors
    #[error("Base image not found: {image}: {reason}")]
    BaseNotFound { image: String, reason: String },

    #[error("Dependency installation failed for manifest {key}: {output}")]
    DependencyInstall { key: String, output: String },

    #[error("Failed to copy source {path}: {source}")]
    SourceCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Build cancelled during {0}")]
    Cancelled(String),

    #[error("Manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image reference '{prefix}' is ambiguous ({count} matches)")]
    ImageAmbiguous { prefix: String, count: usize },

    #[error("Image build failed: {tag}: {output}")]
    ImageBuild { tag: String, output: String },

    // Store errors
    #[error("Layer store corrupt at {path}: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StrataError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a source copy error for a path
    pub fn source_copy(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceCopy {
            path: path.into(),
            source,
        }
    }

    /// Name of the build step this error terminates, if it is a pipeline error
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            Self::BaseNotFound { .. } => Some("resolve-base"),
            Self::DependencyInstall { .. } | Self::Cancelled(_) | Self::ManifestNotFound(_) => {
                Some("install-dependencies")
            }
            Self::SourceCopy { .. } => Some("copy-source"),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeNotFound => Some("Install podman (https://podman.io) or docker"),
            Self::BaseNotFound { .. } => Some("Check the base image name and tag, e.g. python:3.11-slim"),
            Self::DependencyInstall { .. } => Some("Fix the dependency manifest and rebuild"),
            Self::ManifestNotFound(_) => Some("Pass --manifest or set build.manifest in strata.toml"),
            Self::ImageAmbiguous { .. } => Some("Use a longer image id prefix"),
            _ => None,
        }
    }
}
