//! Strata - cache-aware layered image builder
//!
//! Builds container images as a stack of a base image, a dependency layer
//! and a source layer. The dependency layer is cached by the hash of the
//! dependency manifest, so rebuilding after a source-only change never
//! reinstalls dependencies.

pub mod build_log;
pub mod builder;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod layer;
pub mod orchestration;
pub mod ui;

pub use error::{StrataError, StrataResult};
