//! Container runtime abstraction
//!
//! Provides a trait for container operations that can be implemented
//! by different backends (podman or docker CLI).

use crate::error::StrataResult;
use crate::orchestration::container::{ContainerConfig, RunOutput};
use async_trait::async_trait;
use std::path::Path;

/// Abstract container runtime interface
///
/// The builder uses it to resolve base images, to run the dependency
/// installer inside the base image, and to materialize and run finished
/// images.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is available on this system
    async fn is_available(&self) -> StrataResult<bool>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> StrataResult<bool>;

    /// Pull an image from its registry
    async fn pull(&self, image: &str) -> StrataResult<()>;

    /// Run a container to completion, streaming its output to `on_output`.
    ///
    /// Dropping the returned future kills the runtime client process.
    async fn run_captured(
        &self,
        config: &ContainerConfig,
        command: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> StrataResult<RunOutput>;

    /// Run a container attached to the terminal and return its exit code
    async fn run_attached(&self, config: &ContainerConfig, command: &[String])
        -> StrataResult<i32>;

    /// Force-remove a container by name (no error if it is gone)
    async fn remove_container(&self, name: &str) -> StrataResult<()>;

    /// Build an image from a context directory containing a Dockerfile
    async fn build_image(&self, context_dir: &Path, tag: &str) -> StrataResult<()>;

    /// Remove a local image (no error if it is gone)
    async fn remove_image(&self, image: &str) -> StrataResult<()>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
