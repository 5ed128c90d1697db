//! Dependency manifest parsing and hashing for content-addressed caching
//!
//! The manifest is treated as an opaque content blob for caching: the
//! SHA256 of its raw bytes is the dependency layer key. Same manifest
//! bytes = same layer.

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Content-addressed key of a dependency manifest (full SHA256 hex)
///
/// Always 64 lowercase hex characters; stored keys are checked on load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManifestKey(String);

impl ManifestKey {
    /// Compute the key for raw manifest content
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an existing hex digest (e.g. a store directory name)
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| Self(hex.to_ascii_lowercase()))
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display and tags
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for ManifestKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
            .ok_or_else(|| format!("invalid manifest key '{}': expected 64 hex characters", value))
    }
}

impl From<ManifestKey> for String {
    fn from(key: ManifestKey) -> Self {
        key.0
    }
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// One dependency specifier from the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Package name, e.g. `requests`
    pub name: String,
    /// Version constraint and markers, e.g. `>=2.31,<3`; empty if unpinned
    pub constraint: String,
}

/// A dependency manifest read from disk or memory
#[derive(Debug, Clone)]
pub struct DependencyManifest {
    path: Option<PathBuf>,
    content: Vec<u8>,
    key: ManifestKey,
}

impl DependencyManifest {
    /// Build a manifest from in-memory content
    pub fn from_bytes(content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let key = ManifestKey::from_content(&content);
        Self {
            path: None,
            content,
            key,
        }
    }

    /// Read a manifest file
    pub async fn from_file(path: &Path) -> StrataResult<Self> {
        let content = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StrataError::ManifestNotFound(path.to_path_buf()),
            _ => StrataError::io(format!("reading manifest {}", path.display()), e),
        })?;

        let mut manifest = Self::from_bytes(content);
        debug!("Manifest {} has key {}", path.display(), manifest.key.short());
        manifest.path = Some(path.to_path_buf());
        Ok(manifest)
    }

    /// The content-addressed cache key
    pub fn key(&self) -> &ManifestKey {
        &self.key
    }

    /// Raw manifest bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Where the manifest was read from, if it came from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// File name used when the manifest is handed to the installer
    pub fn file_name(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "requirements.txt".to_string())
    }

    /// Parse dependency specifiers, one per line.
    ///
    /// Blank lines, `#` comments and installer options (lines starting
    /// with `-`) are skipped. Parsing never affects the cache key.
    pub fn requirements(&self) -> Vec<Requirement> {
        String::from_utf8_lossy(&self.content)
            .lines()
            .filter_map(parse_requirement)
            .collect()
    }
}

fn parse_requirement(line: &str) -> Option<Requirement> {
    let line = match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    };
    let line = line.trim();

    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return None;
    }

    let split = line
        .find(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~' | ';' | '[' | '@' | ' '))
        .unwrap_or(line.len());

    let name = line[..split].trim();
    if name.is_empty() {
        return None;
    }

    Some(Requirement {
        name: name.to_string(),
        constraint: line[split..].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_deterministic() {
        let a = DependencyManifest::from_bytes("requests==2.31.0\n");
        let b = DependencyManifest::from_bytes("requests==2.31.0\n");

        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().as_str().len(), 64);
        assert_eq!(a.key().short().len(), 12);
    }

    #[test]
    fn key_changes_with_any_byte() {
        let a = DependencyManifest::from_bytes("requests==2.31.0\n");
        let b = DependencyManifest::from_bytes("requests==2.31.0");
        let c = DependencyManifest::from_bytes("requests==2.32.0\n");

        assert_ne!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn key_display_has_algorithm() {
        let key = ManifestKey::from_content(b"");
        assert!(key.to_string().starts_with("sha256:"));
    }

    #[test]
    fn key_from_hex_validates() {
        let key = ManifestKey::from_content(b"flask");
        assert_eq!(ManifestKey::from_hex(key.as_str()), Some(key));
        assert!(ManifestKey::from_hex("not-a-digest").is_none());
        assert!(ManifestKey::from_hex("abc123").is_none());
    }

    #[test]
    fn stored_key_is_validated() {
        let key = ManifestKey::from_content(b"flask\n");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.as_str()));
        assert_eq!(serde_json::from_str::<ManifestKey>(&json).unwrap(), key);

        let err = serde_json::from_str::<ManifestKey>("\"abc\"").unwrap_err();
        assert!(err.to_string().contains("invalid manifest key"));
    }

    #[test]
    fn parse_requirements() {
        let manifest = DependencyManifest::from_bytes(
            "# web\nflask>=2.0,<3\nrequests == 2.31.0  # pinned\n\nnumpy\n-r extra.txt\nuvicorn[standard]>=0.20 ; python_version >= \"3.8\"\n",
        );

        let reqs = manifest.requirements();
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[0].name, "flask");
        assert_eq!(reqs[0].constraint, ">=2.0,<3");
        assert_eq!(reqs[1].name, "requests");
        assert_eq!(reqs[1].constraint, "== 2.31.0");
        assert_eq!(reqs[2].name, "numpy");
        assert!(reqs[2].constraint.is_empty());
        assert_eq!(reqs[3].name, "uvicorn");
    }

    #[tokio::test]
    async fn from_file_reads_and_hashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "requests==2.31.0\n").unwrap();

        let manifest = DependencyManifest::from_file(&path).await.unwrap();
        assert_eq!(manifest.path(), Some(path.as_path()));
        assert_eq!(manifest.file_name(), "requirements.txt");
        assert_eq!(
            manifest.key(),
            DependencyManifest::from_bytes("requests==2.31.0\n").key()
        );
    }

    #[tokio::test]
    async fn from_file_missing_errors() {
        let dir = TempDir::new().unwrap();
        let err = DependencyManifest::from_file(&dir.path().join("requirements.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::ManifestNotFound(_)));
    }
}
