//! Source tree snapshots
//!
//! The source layer is a full copy of the build context (minus excluded
//! paths), identified by a digest over its sorted file list. It is copied
//! on every build and never written into the dependency layer below it.

use crate::cache::locks::KeyedLocks;
use crate::cache::{DependencyLayer, ManifestKey};
use crate::error::{StrataError, StrataResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const LAYER_META: &str = "layer.json";
const ROOTFS_DIR: &str = "rootfs";

/// Application files to be layered on top of the dependencies
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    exclude: Vec<String>,
}

impl SourceTree {
    /// A source tree rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: Vec::new(),
        }
    }

    /// Leave paths out of the layer.
    ///
    /// A pattern without `/` matches any path component with that name
    /// (`__pycache__`); a pattern with `/` matches a path prefix relative
    /// to the root (`data/raw`).
    pub fn with_exclude(mut self, patterns: &[String]) -> Self {
        self.exclude = patterns
            .iter()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    /// Root directory of the tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, rel: &Path) -> bool {
        self.exclude.iter().any(|pattern| {
            if pattern.contains('/') {
                rel.starts_with(pattern)
            } else {
                rel.components().any(|c| c.as_os_str() == pattern.as_str())
            }
        })
    }
}

/// A copied source layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLayer {
    /// Content digest (`sha256:...`)
    pub digest: String,
    /// Dependency layer this source layer was copied onto
    pub parent: ManifestKey,
    /// Number of files copied
    pub file_count: usize,
    /// Total size of copied files
    pub size_bytes: u64,
    /// When the layer was last copied
    pub created_at: DateTime<Utc>,
    /// Directory holding the layer files
    #[serde(skip)]
    pub rootfs: PathBuf,
}

impl SourceLayer {
    /// Hex part of the digest
    pub fn hex(&self) -> &str {
        self.digest.trim_start_matches("sha256:")
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        short_hex(self.hex())
    }
}

/// Store of source layers below a store root
pub struct SourceLayers {
    layers_dir: PathBuf,
    tmp_dir: PathBuf,
    committing: KeyedLocks<String>,
}

impl SourceLayers {
    /// Open (and create) the source layer store
    pub async fn open(root: &Path) -> StrataResult<Self> {
        let layers_dir = root.join("layers").join("source");
        let tmp_dir = root.join("tmp");

        for dir in [&layers_dir, &tmp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StrataError::io(format!("creating {}", dir.display()), e))?;
        }

        Ok(Self {
            layers_dir,
            tmp_dir,
            committing: KeyedLocks::new(),
        })
    }

    /// Copy `tree` into a new layer on top of `parent`.
    ///
    /// The whole tree is copied every time; no files are diffed against
    /// earlier builds.
    pub async fn copy(
        &self,
        parent: &DependencyLayer,
        tree: &SourceTree,
    ) -> StrataResult<SourceLayer> {
        let staging = self.tmp_dir.join(Uuid::new_v4().to_string());
        let tree = tree.clone();
        let staging_rootfs = staging.join(ROOTFS_DIR);

        let copied =
            tokio::task::spawn_blocking(move || copy_tree(&tree, &staging_rootfs))
                .await
                .map_err(|e| StrataError::Internal(format!("source copy task: {}", e)))?;

        let snapshot = match copied {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        let mut layer = SourceLayer {
            digest: format!("sha256:{}", snapshot.hex),
            parent: parent.key.clone(),
            file_count: snapshot.file_count,
            size_bytes: snapshot.size_bytes,
            created_at: Utc::now(),
            rootfs: PathBuf::new(),
        };

        let final_dir = self.layers_dir.join(&snapshot.hex);
        let committed = {
            let _guard = self.committing.lock(&snapshot.hex).await;
            self.commit(&layer, &staging, &final_dir).await
        };
        match committed {
            Ok(true) => {}
            Ok(false) => {
                debug!("Source layer {} already stored", short_hex(&snapshot.hex));
                let _ = tokio::fs::remove_dir_all(&staging).await;
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        }

        layer.rootfs = final_dir.join(ROOTFS_DIR);
        Ok(layer)
    }

    /// Move `staging` into place unless the digest is already stored.
    ///
    /// Returns `false` when a committed layer was found instead, in which
    /// case `staging` is left for the caller to discard. A committed layer
    /// directory is never removed here; another build may be using it.
    async fn commit(
        &self,
        layer: &SourceLayer,
        staging: &Path,
        final_dir: &Path,
    ) -> StrataResult<bool> {
        let meta_path = final_dir.join(LAYER_META);
        if meta_path.exists() {
            self.refresh(&meta_path).await?;
            return Ok(false);
        }

        let meta = serde_json::to_string_pretty(layer)?;
        tokio::fs::write(staging.join(LAYER_META), meta)
            .await
            .map_err(|e| StrataError::io("writing source layer metadata", e))?;

        // A committed directory always holds its metadata, since it is
        // renamed into place whole. Without it this is a crash leftover.
        if final_dir.exists() && !meta_path.exists() {
            warn!("Replacing incomplete source layer {}", final_dir.display());
            remove_leftover(final_dir).await?;
        }

        match tokio::fs::rename(staging, final_dir).await {
            Ok(()) => Ok(true),
            // Another process committed the same digest first
            Err(_) if meta_path.exists() => Ok(false),
            Err(e) => Err(StrataError::io(
                format!("committing source layer {}", layer.digest),
                e,
            )),
        }
    }

    /// Stamp a reused layer as just copied so `cache gc` leaves it alone
    /// until the build that reused it has recorded its image
    async fn refresh(&self, meta_path: &Path) -> StrataResult<()> {
        let content = tokio::fs::read_to_string(meta_path)
            .await
            .map_err(|e| StrataError::io("reading source layer metadata", e))?;
        let mut stored: SourceLayer =
            serde_json::from_str(&content).map_err(|e| StrataError::StoreCorrupt {
                path: meta_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        stored.created_at = Utc::now();

        let tmp = self.tmp_dir.join(format!("{}.json", Uuid::new_v4()));
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&stored)?)
            .await
            .map_err(|e| StrataError::io("writing source layer metadata", e))?;
        if let Err(e) = tokio::fs::rename(&tmp, meta_path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StrataError::io("refreshing source layer metadata", e));
        }
        Ok(())
    }

    /// Load a stored source layer by digest
    pub async fn get(&self, digest: &str) -> StrataResult<Option<SourceLayer>> {
        let hex = digest.trim_start_matches("sha256:");
        let dir = self.layers_dir.join(hex);
        let content = match tokio::fs::read_to_string(dir.join(LAYER_META)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StrataError::io(format!("reading source layer {}", hex), e)),
        };

        let mut layer: SourceLayer =
            serde_json::from_str(&content).map_err(|e| StrataError::StoreCorrupt {
                path: dir.join(LAYER_META),
                reason: e.to_string(),
            })?;
        layer.rootfs = dir.join(ROOTFS_DIR);
        Ok(Some(layer))
    }

    /// List stored source layers, newest first
    pub async fn list(&self) -> StrataResult<Vec<SourceLayer>> {
        let mut layers = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.layers_dir)
            .await
            .map_err(|e| StrataError::io("reading source layer directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StrataError::io("reading source layer entry", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get(&name).await {
                Ok(Some(layer)) => layers.push(layer),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable source layer {}: {}", name, e),
            }
        }

        layers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(layers)
    }

    /// Remove a source layer by digest
    pub async fn remove(&self, digest: &str) -> StrataResult<()> {
        let dir = self.layers_dir.join(digest.trim_start_matches("sha256:"));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(format!("removing {}", dir.display()), e)),
        }
    }
}

/// First 12 hex characters, or all of a shorter string
fn short_hex(hex: &str) -> &str {
    hex.get(..12).unwrap_or(hex)
}

async fn remove_leftover(dir: &Path) -> StrataResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StrataError::io(format!("removing {}", dir.display()), e)),
    }
}

struct Snapshot {
    hex: String,
    file_count: usize,
    size_bytes: u64,
}

/// Copy the tree into `dest`, hashing paths, modes and contents in sorted order
fn copy_tree(tree: &SourceTree, dest: &Path) -> StrataResult<Snapshot> {
    let root = tree.root();
    let meta = fs::metadata(root).map_err(|e| StrataError::source_copy(root, e))?;
    if !meta.is_dir() {
        return Err(StrataError::source_copy(
            root,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "source root is not a directory"),
        ));
    }

    fs::create_dir_all(dest).map_err(|e| StrataError::io("creating source staging", e))?;

    let mut hasher = Sha256::new();
    let mut file_count = 0;
    let mut size_bytes = 0;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(root)
                .map(|rel| !tree.is_excluded(rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            StrataError::source_copy(path, e.into())
        })?;

        let src = entry.path();
        let rel = src
            .strip_prefix(root)
            .map_err(|e| StrataError::Internal(format!("walk escaped source root: {}", e)))?;
        let target = dest.join(rel);
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| StrataError::source_copy(src, e))?;
            hasher.update(b"d\0");
            hasher.update(rel_str.as_bytes());
            hasher.update(b"\0");
        } else if file_type.is_symlink() {
            let link = fs::read_link(src).map_err(|e| StrataError::source_copy(src, e))?;
            copy_symlink(&link, &target).map_err(|e| StrataError::source_copy(src, e))?;
            hasher.update(b"l\0");
            hasher.update(rel_str.as_bytes());
            hasher.update(b"\0");
            hasher.update(link.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        } else {
            let content = fs::read(src).map_err(|e| StrataError::source_copy(src, e))?;
            fs::write(&target, &content).map_err(|e| StrataError::source_copy(src, e))?;
            let perms = entry
                .metadata()
                .map_err(|e| StrataError::source_copy(src, e.into()))?
                .permissions();
            let executable = is_executable(&perms);
            fs::set_permissions(&target, perms).map_err(|e| StrataError::source_copy(src, e))?;

            hasher.update(if executable { b"x\0" } else { b"f\0" });
            hasher.update(rel_str.as_bytes());
            hasher.update(b"\0");
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);

            file_count += 1;
            size_bytes += content.len() as u64;
        }
    }

    Ok(Snapshot {
        hex: hex::encode(hasher.finalize()),
        file_count,
        size_bytes,
    })
}

#[cfg(unix)]
pub(crate) fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
pub(crate) fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    warn!("Skipping symlink {} -> {}", target.display(), link.display());
    Ok(())
}

#[cfg(unix)]
fn is_executable(perms: &fs::Permissions) -> bool {
    use std::os::unix::fs::PermissionsExt;
    perms.mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_perms: &fs::Permissions) -> bool {
    false
}
