//! Finalized images and their on-disk records
//!
//! An image is an immutable record of the base reference, the two layer
//! digests on top of it and the run configuration. Its id is derived from
//! exactly those inputs, so rebuilding unchanged inputs yields the same id.

use crate::cache::ManifestKey;
use crate::error::{StrataError, StrataResult};
use crate::layer::ImageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Prefix for runtime tags of materialized images
pub const TAG_PREFIX: &str = "strata-";

/// Command and arguments the container starts with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryCommand(Vec<String>);

impl EntryCommand {
    /// Build from an argv; the first element is the program
    pub fn from_argv<I, S>(argv: I) -> StrataResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        match argv.first() {
            Some(program) if !program.trim().is_empty() => Ok(Self(argv)),
            _ => Err(StrataError::User(
                "Entry command must name a program".to_string(),
            )),
        }
    }

    /// Program to execute
    pub fn program(&self) -> &str {
        &self.0[0]
    }

    /// Arguments after the program
    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    /// Full argv
    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for EntryCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Run configuration recorded in an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Command the container starts with
    pub entry_command: EntryCommand,
    /// Directory the source layer lives in and the command runs from
    pub workdir: String,
}

/// A finalized, runnable image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Content id (hex sha256)
    pub id: String,
    /// Base image reference
    pub base: ImageRef,
    /// Digest of the dependency layer
    pub dependency_layer: ManifestKey,
    /// Digest of the source layer (`sha256:...`)
    pub source_layer: String,
    /// Run configuration
    pub config: ImageConfig,
    /// When the image was finalized
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// Assemble an image record, deriving its id from its contents
    pub fn new(
        base: ImageRef,
        dependency_layer: ManifestKey,
        source_layer: String,
        config: ImageConfig,
    ) -> Self {
        let id = compute_image_id(&base, &dependency_layer, &source_layer, &config);
        Self {
            id,
            base,
            dependency_layer,
            source_layer,
            config,
            created_at: Utc::now(),
        }
    }

    /// First 12 characters of the id
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }

    /// Runtime tag the image is materialized under
    pub fn tag(&self) -> String {
        format!("{}{}", TAG_PREFIX, self.short_id())
    }

    /// Layer digests from bottom to top, base first
    pub fn layers(&self) -> Vec<String> {
        vec![
            self.base.to_string(),
            self.dependency_layer.to_string(),
            self.source_layer.clone(),
        ]
    }
}

fn compute_image_id(
    base: &ImageRef,
    dependency_layer: &ManifestKey,
    source_layer: &str,
    config: &ImageConfig,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        base.to_string().as_str(),
        dependency_layer.as_str(),
        source_layer,
        config.workdir.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    for arg in config.entry_command.argv() {
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Image records stored as `{root}/images/{id}.json`
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Open (and create) the image store
    pub async fn open(root: &Path) -> StrataResult<Self> {
        let dir = root.join("images");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StrataError::io(format!("creating {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist an image record
    pub async fn save(&self, image: &Image) -> StrataResult<()> {
        let content = serde_json::to_string_pretty(image)?;
        let path = self.record_path(&image.id);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StrataError::io(format!("writing {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StrataError::io(format!("saving image {}", image.short_id()), e))?;

        debug!("Saved image record {}", image.short_id());
        Ok(())
    }

    /// Load an image by full id
    pub async fn load(&self, id: &str) -> StrataResult<Option<Image>> {
        let path = self.record_path(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StrataError::io(format!("reading {}", path.display()), e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StrataError::StoreCorrupt {
                path,
                reason: e.to_string(),
            })
    }

    /// List images, newest first
    pub async fn list(&self) -> StrataResult<Vec<Image>> {
        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StrataError::io("reading image directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StrataError::io("reading image entry", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            match self.load(id).await {
                Ok(Some(image)) => images.push(image),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable image record {}: {}", name, e),
            }
        }

        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images)
    }

    /// Find an image by full id, unique id prefix or runtime tag
    pub async fn resolve(&self, reference: &str) -> StrataResult<Image> {
        let reference = reference.trim();
        let wanted = reference
            .strip_prefix(TAG_PREFIX)
            .or_else(|| reference.strip_prefix("sha256:"))
            .unwrap_or(reference);

        if wanted.is_empty() {
            return Err(StrataError::ImageNotFound(reference.to_string()));
        }

        if let Some(image) = self.load(wanted).await? {
            return Ok(image);
        }

        let mut matches: Vec<Image> = self
            .list()
            .await?
            .into_iter()
            .filter(|image| image.id.starts_with(wanted))
            .collect();

        match matches.len() {
            0 => Err(StrataError::ImageNotFound(reference.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(StrataError::ImageAmbiguous {
                prefix: reference.to_string(),
                count,
            }),
        }
    }

    /// Delete an image record
    pub async fn remove(&self, id: &str) -> StrataResult<()> {
        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StrataError::ImageNotFound(id.to_string()))
            }
            Err(e) => Err(StrataError::io(format!("removing {}", path.display()), e)),
        }
    }
}
