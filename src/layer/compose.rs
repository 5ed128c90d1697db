//! Image materialization
//!
//! Turns a finalized image record into a runtime image. The dependency and
//! source layers are staged into a build context next to a generated
//! Dockerfile, which is built under the image's content-addressed tag. If
//! the tag already exists locally, the build is skipped.

use crate::builder::Image;
use crate::error::{StrataError, StrataResult};
use crate::orchestration::ContainerRuntime;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Result of materializing an image
#[derive(Debug)]
pub struct MaterializedImage {
    /// Runtime tag (e.g., "strata-a1b2c3d4e5f6")
    pub tag: String,
    /// Whether the runtime already had the image (no build needed)
    pub was_cached: bool,
}

/// Layer contents to stage into a build context
#[derive(Debug, Clone)]
pub struct LayerDirs {
    /// Installed dependency files, copied onto `/`
    pub dependencies: PathBuf,
    /// Source files, copied into the working directory
    pub source: PathBuf,
}

/// Build `image` in the runtime unless it is already present.
///
/// The build context lives under `{contexts_dir}/{uuid}` and is removed
/// afterwards whether or not the build succeeded.
pub async fn materialize(
    runtime: &dyn ContainerRuntime,
    image: &Image,
    layers: &LayerDirs,
    contexts_dir: &Path,
) -> StrataResult<MaterializedImage> {
    let tag = image.tag();
    debug!("Materializing image {} as {}", image.short_id(), tag);

    if runtime.image_exists(&tag).await.unwrap_or(false) {
        debug!("Image already present in runtime: {}", tag);
        return Ok(MaterializedImage {
            tag,
            was_cached: true,
        });
    }

    let context = prepare_context(image, layers, contexts_dir).await?;

    info!("Building runtime image {}", tag);
    let result = runtime.build_image(&context, &tag).await;

    // Clean up build context (best-effort)
    let _ = tokio::fs::remove_dir_all(&context).await;

    result?;

    Ok(MaterializedImage {
        tag,
        was_cached: false,
    })
}

/// Stage layer directories and the Dockerfile into a fresh context
async fn prepare_context(
    image: &Image,
    layers: &LayerDirs,
    contexts_dir: &Path,
) -> StrataResult<PathBuf> {
    let context = contexts_dir.join(uuid::Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&context)
        .await
        .map_err(|e| StrataError::io("creating build context", e))?;

    let staged = {
        let layers = layers.clone();
        let context = context.clone();
        tokio::task::spawn_blocking(move || {
            copy_dir(&layers.dependencies, &context.join("deps"))?;
            copy_dir(&layers.source, &context.join("source"))
        })
        .await
        .map_err(|e| StrataError::Internal(format!("staging build context: {}", e)))?
    };

    let written = match staged {
        Ok(()) => tokio::fs::write(context.join("Dockerfile"), generate_dockerfile(image))
            .await
            .map_err(|e| StrataError::io("writing Dockerfile", e)),
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        let _ = tokio::fs::remove_dir_all(&context).await;
        return Err(e);
    }

    Ok(context)
}

/// Generate the Dockerfile stacking both layers on the base image.
///
/// Each layer is one COPY instruction, so the runtime's own layer cache
/// reuses the dependency layer across images that share it.
fn generate_dockerfile(image: &Image) -> String {
    let workdir = image.config.workdir.trim_end_matches('/');
    let workdir = if workdir.is_empty() { "/" } else { workdir };

    let mut lines = vec![
        format!("FROM {}", image.base),
        String::new(),
        format!("LABEL io.strata.image={}", dockerfile_quote(&image.id)),
        String::new(),
        format!("# Layer: dependencies {}", image.dependency_layer),
        "COPY deps/ /".to_string(),
        String::new(),
        format!("WORKDIR {}", workdir),
        format!("# Layer: source {}", image.source_layer),
        format!("COPY source/ {}/", workdir.trim_end_matches('/')),
        String::new(),
    ];

    lines.push(format!("CMD {}", exec_form(image.config.entry_command.argv())));
    lines.join("\n")
}

/// JSON-array (exec form) rendering of an argv
fn exec_form(argv: &[String]) -> String {
    let quoted: Vec<String> = argv.iter().map(|a| json_quote(a)).collect();
    format!("[{}]", quoted.join(", "))
}

fn json_quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

/// Quote a value for a Dockerfile LABEL or ENV instruction.
/// Embedded double quotes and backslashes are escaped.
fn dockerfile_quote(value: &str) -> String {
    if value.contains('$') || value.contains(' ') || value.contains('"') || value.contains('\\') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}

/// Recursively copy `src` into `dest`, keeping symlinks and permissions
fn copy_dir(src: &Path, dest: &Path) -> StrataResult<()> {
    fs::create_dir_all(dest).map_err(|e| StrataError::io(format!("creating {}", dest.display()), e))?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            StrataError::io(format!("reading {}", path.display()), e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StrataError::Internal(format!("walk escaped layer root: {}", e)))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        let copied = if file_type.is_dir() {
            fs::create_dir_all(&target)
        } else if file_type.is_symlink() {
            fs::read_link(entry.path())
                .and_then(|link| crate::layer::source::copy_symlink(&link, &target))
        } else {
            fs::copy(entry.path(), &target).map(|_| ())
        };
        copied.map_err(|e| StrataError::io(format!("staging {}", entry.path().display()), e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EntryCommand, ImageConfig};
    use crate::cache::ManifestKey;
    use crate::layer::ImageRef;
    use tempfile::TempDir;

    fn python_image(entry: &[&str], workdir: &str) -> Image {
        Image::new(
            ImageRef::parse("python:3.11-slim").unwrap(),
            ManifestKey::from_content(b"flask==3.0.0\n"),
            format!("sha256:{}", "b".repeat(64)),
            ImageConfig {
                entry_command: EntryCommand::from_argv(entry.iter().copied()).unwrap(),
                workdir: workdir.to_string(),
            },
        )
    }

    #[test]
    fn dockerfile_layers_in_order() {
        let image = python_image(&["python", "main.py"], "/app");
        let dockerfile = generate_dockerfile(&image);

        let from = dockerfile.find("FROM python:3.11-slim").unwrap();
        let deps = dockerfile.find("COPY deps/ /").unwrap();
        let workdir = dockerfile.find("WORKDIR /app").unwrap();
        let source = dockerfile.find("COPY source/ /app/").unwrap();
        let cmd = dockerfile.find("CMD [\"python\", \"main.py\"]").unwrap();

        assert!(from < deps && deps < workdir && workdir < source && source < cmd);
        assert!(dockerfile.contains(&format!("LABEL io.strata.image={}", image.id)));
    }

    #[test]
    fn dockerfile_normalizes_workdir() {
        let dockerfile = generate_dockerfile(&python_image(&["python", "main.py"], "/srv/app/"));
        assert!(dockerfile.contains("WORKDIR /srv/app\n"));
        assert!(dockerfile.contains("COPY source/ /srv/app/"));
    }

    #[test]
    fn exec_form_escapes_arguments() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo \"hi\"".to_string()];
        assert_eq!(exec_form(&argv), r#"["sh", "-c", "echo \"hi\""]"#);
    }

    #[test]
    fn dockerfile_quote_plain_and_special() {
        assert_eq!(dockerfile_quote("abc"), "abc");
        assert_eq!(dockerfile_quote("a b"), "\"a b\"");
        assert_eq!(dockerfile_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[tokio::test]
    async fn prepare_context_stages_layers() {
        let temp = TempDir::new().unwrap();
        let deps = temp.path().join("deps");
        let source = temp.path().join("source");
        std::fs::create_dir_all(deps.join("usr/local/lib")).unwrap();
        std::fs::write(deps.join("usr/local/lib/flask.py"), "flask").unwrap();
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("main.py"), "print('hi')").unwrap();

        let image = python_image(&["python", "main.py"], "/app");
        let layers = LayerDirs {
            dependencies: deps,
            source,
        };
        let context = prepare_context(&image, &layers, &temp.path().join("contexts"))
            .await
            .unwrap();

        assert!(context.join("Dockerfile").is_file());
        assert!(context.join("deps/usr/local/lib/flask.py").is_file());
        assert_eq!(
            std::fs::read_to_string(context.join("source/main.py")).unwrap(),
            "print('hi')"
        );
    }
}
