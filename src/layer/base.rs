//! Base image references and resolution

use crate::error::{StrataError, StrataResult};
use crate::orchestration::ContainerRuntime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// A parsed `[registry/]name[:tag][@digest]` image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository, including any registry host (e.g. `python`)
    pub name: String,
    /// Version tag, `latest` when omitted
    pub tag: String,
    /// Pinned content digest (`sha256:...`), if given
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse an image reference
    pub fn parse(identifier: &str) -> StrataResult<Self> {
        let invalid = |reason: &str| StrataError::BaseNotFound {
            image: identifier.to_string(),
            reason: reason.to_string(),
        };

        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(invalid("empty image reference"));
        }
        if identifier.chars().any(char::is_whitespace) {
            return Err(invalid("image reference must not contain whitespace"));
        }

        let (rest, digest) = match identifier.split_once('@') {
            Some((rest, digest)) => {
                let valid = digest
                    .strip_prefix("sha256:")
                    .is_some_and(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()));
                if !valid {
                    return Err(invalid("digest must be sha256:<64 hex chars>"));
                }
                (rest, Some(digest.to_string()))
            }
            None => (identifier, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are registry ports
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (&rest[..last_slash + i], &rest[last_slash + i + 1..]),
            None => (rest, "latest"),
        };

        if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
            return Err(invalid("missing repository name"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':'))
        {
            return Err(invalid("repository name has invalid characters"));
        }
        if tag.is_empty()
            || tag.len() > 128
            || !tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("invalid tag"));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)?;
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// A base image known to be present in the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    /// The resolved reference
    pub reference: ImageRef,
    /// Whether resolution had to pull the image
    #[serde(skip)]
    pub pulled: bool,
}

impl BaseImage {
    /// Reference string as passed to the runtime
    pub fn image(&self) -> String {
        self.reference.to_string()
    }
}

/// Resolve a base image identifier, pulling it if it is not local.
///
/// Any failure (bad reference, failed pull) is reported as `BaseNotFound`.
pub async fn resolve_base(
    runtime: &dyn ContainerRuntime,
    identifier: &str,
) -> StrataResult<BaseImage> {
    let reference = ImageRef::parse(identifier)?;
    let image = reference.to_string();

    let not_found = |reason: String| StrataError::BaseNotFound {
        image: image.clone(),
        reason,
    };

    if runtime
        .image_exists(&image)
        .await
        .map_err(|e| not_found(e.to_string()))?
    {
        debug!("Base image present locally: {}", image);
        return Ok(BaseImage {
            reference,
            pulled: false,
        });
    }

    info!("Base image {} not present, pulling", image);
    runtime
        .pull(&image)
        .await
        .map_err(|e| not_found(e.to_string()))?;

    Ok(BaseImage {
        reference,
        pulled: true,
    })
}
