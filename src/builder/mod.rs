//! Image builder
//!
//! Runs the build pipeline over the layer cache, the source layer store
//! and the image store, and runs finished images in the container runtime.

pub mod cancel;
pub mod image;
pub mod installer;
pub mod pipeline;
#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use image::{EntryCommand, Image, ImageConfig, ImageStore};
pub use installer::{ContainerInstaller, DependencyInstaller};
pub use pipeline::{
    BuildOutcome, BuildRequest, BuildStep, DependencyLayerHandle, ImageBuilder,
    SourceLayerHandle, DEFAULT_WORKDIR,
};
