//! Dependency layer cache
//!
//! Content-addressed store of installed dependency layers, keyed by
//! manifest hash. Lookups of committed layers go through a shared index;
//! populating a missing key is single-flight per key.
//!
//! # On-disk layout
//!
//! ```text
//! {root}/layers/deps/{key}/rootfs/     installed files
//! {root}/layers/deps/{key}/layer.json  metadata, state = complete
//! {root}/tmp/{uuid}/                   staging for in-flight installs
//! ```
//!
//! A layer is committed by renaming its fully populated staging directory
//! into place, so a key directory either holds a complete layer or is a
//! leftover from a crash (no `layer.json`), which is treated as a miss.

use crate::cache::locks::KeyedLocks;
use crate::cache::manifest::ManifestKey;
use crate::error::{StrataError, StrataResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LAYER_META: &str = "layer.json";
const ROOTFS_DIR: &str = "rootfs";

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Total size of regular files below `path`
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// State of a dependency layer in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// No layer exists for the key
    Miss,
    /// Key directory exists without a committed marker (crash leftover)
    Building,
    /// Layer is committed and immutable
    Complete,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A committed dependency layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyLayer {
    /// Manifest key the layer was installed for
    pub key: ManifestKey,
    /// Base image the installer ran in
    pub base: String,
    /// Layer state (always `Complete` once returned from the cache)
    pub state: CacheState,
    /// When the layer was committed
    pub created_at: DateTime<Utc>,
    /// Size of the installed files
    pub size_bytes: u64,
    /// Directory holding the layer files
    #[serde(skip)]
    pub rootfs: PathBuf,
}

impl DependencyLayer {
    /// Content digest of the layer, as recorded in images
    pub fn digest(&self) -> String {
        self.key.to_string()
    }

    /// Check if this layer is older than the given number of days
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.created_at < cutoff
    }
}

/// Shared, content-addressed dependency layer cache
pub struct LayerCache {
    layers_dir: PathBuf,
    tmp_dir: PathBuf,
    index: RwLock<HashMap<ManifestKey, DependencyLayer>>,
    inflight: KeyedLocks<ManifestKey>,
}

impl LayerCache {
    /// Open (and create) the cache below a store root
    pub async fn open(root: &Path) -> StrataResult<Self> {
        let layers_dir = root.join("layers").join("deps");
        let tmp_dir = root.join("tmp");

        for dir in [&layers_dir, &tmp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StrataError::io(format!("creating {}", dir.display()), e))?;
        }

        Ok(Self {
            layers_dir,
            tmp_dir,
            index: RwLock::new(HashMap::new()),
            inflight: KeyedLocks::new(),
        })
    }

    fn key_dir(&self, key: &ManifestKey) -> PathBuf {
        self.layers_dir.join(key.as_str())
    }

    /// Current state of a key without populating it
    pub async fn state(&self, key: &ManifestKey) -> StrataResult<CacheState> {
        if self.lookup(key).await?.is_some() {
            return Ok(CacheState::Complete);
        }
        if self.key_dir(key).exists() {
            return Ok(CacheState::Building);
        }
        Ok(CacheState::Miss)
    }

    /// Return the committed layer for `key`, if any
    pub async fn lookup(&self, key: &ManifestKey) -> StrataResult<Option<DependencyLayer>> {
        let indexed = self.read_index().get(key).cloned();
        if indexed.is_some() {
            return Ok(indexed);
        }

        let Some(layer) = read_layer_meta(&self.key_dir(key)).await? else {
            return Ok(None);
        };

        self.write_index().insert(key.clone(), layer.clone());
        Ok(Some(layer))
    }

    /// Return the layer for `key`, running `populate` only on a miss.
    ///
    /// `populate` receives an empty staging directory to install into.
    /// Concurrent callers for the same key are serialized; callers that
    /// waited see the committed layer as a hit. On error the staging
    /// output is discarded and nothing is committed. The returned flag is
    /// `true` for a cache hit.
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: &ManifestKey,
        base: &str,
        populate: F,
    ) -> StrataResult<(DependencyLayer, bool)>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StrataResult<()>>,
    {
        self.get_or_populate_until(key, base, std::future::pending(), populate)
            .await
    }

    /// [`get_or_populate`](Self::get_or_populate) that stops waiting for
    /// another caller's install of the same key once `cancelled` resolves.
    ///
    /// Cancelling `populate` itself is up to the closure.
    pub async fn get_or_populate_until<C, F, Fut>(
        &self,
        key: &ManifestKey,
        base: &str,
        cancelled: C,
        populate: F,
    ) -> StrataResult<(DependencyLayer, bool)>
    where
        C: Future<Output = ()>,
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StrataResult<()>>,
    {
        if let Some(layer) = self.lookup(key).await? {
            debug!("Dependency layer cache hit: {}", key.short());
            return Ok((layer, true));
        }

        tokio::select! {
            guard = self.inflight.lock(key) => {
                let _guard = guard;

                // Another caller may have committed while we waited
                match self.lookup(key).await? {
                    Some(layer) => {
                        debug!("Dependency layer committed by concurrent build: {}", key.short());
                        Ok((layer, true))
                    }
                    None => self.populate(key, base, populate).await.map(|l| (l, false)),
                }
            }
            _ = cancelled => {
                debug!("Stopped waiting for dependency layer {}", key.short());
                Err(StrataError::Cancelled(format!(
                    "waiting for dependency layer {}",
                    key.short()
                )))
            }
        }
    }

    async fn populate<F, Fut>(
        &self,
        key: &ManifestKey,
        base: &str,
        populate: F,
    ) -> StrataResult<DependencyLayer>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StrataResult<()>>,
    {
        let staging = self.tmp_dir.join(Uuid::new_v4().to_string());
        let rootfs = staging.join(ROOTFS_DIR);
        tokio::fs::create_dir_all(&rootfs)
            .await
            .map_err(|e| StrataError::io("creating staging directory", e))?;

        info!("Installing dependency layer {}", key.short());

        if let Err(e) = populate(rootfs.clone()).await {
            remove_dir_best_effort(&staging).await;
            return Err(e);
        }

        match self.commit(key, base, &staging).await {
            Ok(layer) => {
                self.write_index().insert(key.clone(), layer.clone());
                Ok(layer)
            }
            Err(e) => {
                remove_dir_best_effort(&staging).await;
                Err(e)
            }
        }
    }

    async fn commit(
        &self,
        key: &ManifestKey,
        base: &str,
        staging: &Path,
    ) -> StrataResult<DependencyLayer> {
        let rootfs = staging.join(ROOTFS_DIR);
        let size_bytes = tokio::task::spawn_blocking(move || dir_size(&rootfs))
            .await
            .map_err(|e| StrataError::Internal(format!("sizing layer: {}", e)))?;

        let mut layer = DependencyLayer {
            key: key.clone(),
            base: base.to_string(),
            state: CacheState::Complete,
            created_at: Utc::now(),
            size_bytes,
            rootfs: PathBuf::new(),
        };

        let meta = serde_json::to_string_pretty(&layer)?;
        tokio::fs::write(staging.join(LAYER_META), meta)
            .await
            .map_err(|e| StrataError::io("writing layer metadata", e))?;

        let final_dir = self.key_dir(key);
        if final_dir.exists() {
            warn!("Replacing incomplete layer directory {}", final_dir.display());
            tokio::fs::remove_dir_all(&final_dir)
                .await
                .map_err(|e| StrataError::io(format!("removing {}", final_dir.display()), e))?;
        }

        tokio::fs::rename(staging, &final_dir)
            .await
            .map_err(|e| StrataError::io(format!("committing layer {}", key.short()), e))?;

        layer.rootfs = final_dir.join(ROOTFS_DIR);
        info!(
            "Committed dependency layer {} ({})",
            key.short(),
            format_bytes(size_bytes)
        );
        Ok(layer)
    }

    /// List committed layers, newest first
    pub async fn list(&self) -> StrataResult<Vec<DependencyLayer>> {
        let mut layers = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.layers_dir)
            .await
            .map_err(|e| StrataError::io("reading layer directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StrataError::io("reading layer entry", e))?
        {
            match read_layer_meta(&entry.path()).await {
                Ok(Some(layer)) => layers.push(layer),
                Ok(None) => debug!("Skipping incomplete layer {}", entry.path().display()),
                Err(e) => warn!("Skipping unreadable layer {}: {}", entry.path().display(), e),
            }
        }

        layers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(layers)
    }

    /// Remove a layer (complete or leftover) from disk and index
    pub async fn remove(&self, key: &ManifestKey) -> StrataResult<()> {
        let _guard = self.inflight.lock(key).await;
        self.write_index().remove(key);

        let dir = self.key_dir(key);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| StrataError::io(format!("removing {}", dir.display()), e))
        } else {
            Ok(())
        }
    }

    /// Remove staging directories left behind by interrupted builds.
    ///
    /// Entries modified within `min_age` may belong to a build in progress
    /// and are kept.
    pub async fn clean_staging(&self, min_age: Duration) -> StrataResult<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.tmp_dir)
            .await
            .map_err(|e| StrataError::io("reading staging directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StrataError::io("reading staging entry", e))?
        {
            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok())
                .unwrap_or(Duration::MAX);
            if age < min_age {
                debug!("Keeping recent staging entry {}", entry.path().display());
                continue;
            }
            remove_dir_best_effort(&entry.path()).await;
            removed += 1;
        }

        Ok(removed)
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ManifestKey, DependencyLayer>> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ManifestKey, DependencyLayer>> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read `layer.json` from a key directory; `None` if not committed
async fn read_layer_meta(dir: &Path) -> StrataResult<Option<DependencyLayer>> {
    let meta_path = dir.join(LAYER_META);
    let content = match tokio::fs::read_to_string(&meta_path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StrataError::io(
                format!("reading {}", meta_path.display()),
                e,
            ))
        }
    };

    let mut layer: DependencyLayer =
        serde_json::from_str(&content).map_err(|e| StrataError::StoreCorrupt {
            path: meta_path.clone(),
            reason: e.to_string(),
        })?;

    if layer.state != CacheState::Complete {
        return Ok(None);
    }

    layer.rootfs = dir.join(ROOTFS_DIR);
    Ok(Some(layer))
}

async fn remove_dir_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
