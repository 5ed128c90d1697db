//! Image layers
//!
//! An image is a base image with two layers stacked on it: the installed
//! dependencies and a copy of the application source. This module resolves
//! base references, snapshots source trees and materializes finished
//! images in the container runtime.

pub mod base;
pub mod compose;
pub mod source;

pub use base::{resolve_base, BaseImage, ImageRef};
pub use compose::{materialize, LayerDirs, MaterializedImage};
pub use source::{SourceLayer, SourceLayers, SourceTree};
