//! Runtime factory for creating the configured container runtime
//!
//! Resolves `runtime.engine` to a concrete engine, probing the PATH when
//! it is set to `auto`.

use crate::config::Config;
use crate::error::{StrataError, StrataResult};
use crate::orchestration::cli_runtime::CliRuntime;
use crate::orchestration::runtime::ContainerRuntime;
use std::sync::Arc;
use tracing::debug;

/// Supported container engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Rootless-friendly podman CLI
    Podman,
    /// Docker CLI
    Docker,
}

impl Engine {
    /// Parse an explicit engine name; `None` for "auto"
    pub fn parse(name: &str) -> StrataResult<Option<Self>> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(None),
            "podman" => Ok(Some(Self::Podman)),
            "docker" => Ok(Some(Self::Docker)),
            other => Err(StrataError::UnknownEngine(other.to_string())),
        }
    }

    /// Executable name
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }

    /// Get a human-readable engine name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Podman => "Podman",
            Self::Docker => "Docker",
        }
    }

    /// Engines tried by "auto", in preference order
    fn detection_order() -> &'static [Self] {
        &[Self::Podman, Self::Docker]
    }
}

/// Create the container runtime selected by the configuration
///
/// # Returns
/// * `Ok(Arc<dyn ContainerRuntime>)` - A shared runtime implementation
/// * `Err` - If the engine name is unknown or no engine is installed
pub async fn create_runtime(config: &Config) -> StrataResult<Arc<dyn ContainerRuntime>> {
    let engine = match Engine::parse(&config.runtime.engine)? {
        Some(engine) => engine,
        None => detect_engine().await?,
    };

    debug!("Using container engine: {}", engine.binary());
    Ok(Arc::new(CliRuntime::new(engine)))
}

/// Find the first installed engine
pub async fn detect_engine() -> StrataResult<Engine> {
    for engine in Engine::detection_order() {
        if CliRuntime::installed(*engine).await {
            return Ok(*engine);
        }
    }
    Err(StrataError::RuntimeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parse() {
        assert_eq!(Engine::parse("auto").unwrap(), None);
        assert_eq!(Engine::parse("Podman").unwrap(), Some(Engine::Podman));
        assert_eq!(Engine::parse("docker").unwrap(), Some(Engine::Docker));
        assert!(matches!(
            Engine::parse("containerd"),
            Err(StrataError::UnknownEngine(_))
        ));
    }

    #[test]
    fn engine_names() {
        assert_eq!(Engine::Podman.binary(), "podman");
        assert_eq!(Engine::Docker.display_name(), "Docker");
    }

    #[tokio::test]
    async fn create_runtime_explicit_engine() {
        let mut config = Config::default();
        config.runtime.engine = "docker".to_string();
        let runtime = create_runtime(&config).await.unwrap();
        assert_eq!(runtime.runtime_name(), "Docker");
    }
}
