//! Content-addressed dependency layer cache
//!
//! Dependency layers are keyed by the SHA256 of the dependency manifest
//! and nothing else. Changing application source never changes the key,
//! so the expensive install step only reruns when the manifest does.
//!
//! # Cache States
//!
//! | State | Description |
//! |-------|-------------|
//! | Miss | No layer for the key, next build installs |
//! | Building | Leftover from an interrupted commit, replaced on next build |
//! | Complete | Committed, immutable, reused by every build with this key |

pub(crate) mod locks;
pub mod manifest;
pub mod store;

pub use manifest::{DependencyManifest, ManifestKey, Requirement};
pub use store::{format_bytes, CacheState, DependencyLayer, LayerCache};
