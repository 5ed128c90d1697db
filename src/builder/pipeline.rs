//! The build pipeline
//!
//! A build is four steps run in order, each consuming the previous step's
//! artifact: resolve the base image, install dependencies (cached by
//! manifest hash), copy the source tree, and finalize the image record.
//! A failed step ends the build; later steps never run.

use crate::build_log::{events, BuildLog};
use crate::builder::cancel::CancelToken;
use crate::builder::image::{EntryCommand, Image, ImageConfig, ImageStore};
use crate::builder::installer::DependencyInstaller;
use crate::cache::{DependencyLayer, DependencyManifest, LayerCache};
use crate::error::{StrataError, StrataResult};
use crate::layer::{
    self, BaseImage, LayerDirs, MaterializedImage, SourceLayer, SourceLayers, SourceTree,
};
use crate::orchestration::{ContainerConfig, ContainerRuntime};
use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Working directory used when none is configured
pub const DEFAULT_WORKDIR: &str = "/app";

/// A pipeline step, reported to progress observers as it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    ResolveBase,
    InstallDependencies,
    CopySource,
    Finalize,
}

impl BuildStep {
    /// Human-readable step label
    pub fn label(&self) -> &'static str {
        match self {
            Self::ResolveBase => "Resolving base image",
            Self::InstallDependencies => "Installing dependencies",
            Self::CopySource => "Copying source",
            Self::Finalize => "Finalizing image",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of `install_dependencies`
#[derive(Debug, Clone)]
pub struct DependencyLayerHandle {
    /// Base image the build runs on
    pub base: BaseImage,
    /// The committed dependency layer
    pub layer: DependencyLayer,
    /// Whether the layer came from the cache
    pub cache_hit: bool,
}

/// Output of `copy_source`
#[derive(Debug, Clone)]
pub struct SourceLayerHandle {
    pub base: BaseImage,
    pub dependencies: DependencyLayer,
    pub layer: SourceLayer,
}

/// Inputs of a full build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Base image identifier, e.g. `python:3.11-slim`
    pub base: String,
    pub manifest: DependencyManifest,
    pub source: SourceTree,
    pub entry_command: EntryCommand,
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub image: Image,
    /// Whether the dependency layer was reused without installing
    pub dependency_cache_hit: bool,
    /// Whether the base image had to be pulled
    pub base_pulled: bool,
    pub dependency_layer: DependencyLayer,
    pub source_layer: SourceLayer,
}

type StepObserver = Arc<dyn Fn(BuildStep) + Send + Sync>;

/// Builds and runs layered images over a shared store
pub struct ImageBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    installer: Arc<dyn DependencyInstaller>,
    cache: LayerCache,
    sources: SourceLayers,
    images: ImageStore,
    contexts_dir: PathBuf,
    workdir: String,
    build_log: BuildLog,
    on_step: Option<StepObserver>,
}

impl ImageBuilder {
    /// Open the stores below `root`
    pub async fn open(
        root: &Path,
        runtime: Arc<dyn ContainerRuntime>,
        installer: Arc<dyn DependencyInstaller>,
    ) -> StrataResult<Self> {
        Ok(Self {
            runtime,
            installer,
            cache: LayerCache::open(root).await?,
            sources: SourceLayers::open(root).await?,
            images: ImageStore::open(root).await?,
            contexts_dir: root.join("contexts"),
            workdir: DEFAULT_WORKDIR.to_string(),
            build_log: BuildLog::disabled(),
            on_step: None,
        })
    }

    /// Set the working directory recorded in finalized images
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Record build events to `log`
    pub fn with_build_log(mut self, log: BuildLog) -> Self {
        self.build_log = log;
        self
    }

    /// Call `observer` as each step of `build` starts
    pub fn on_step(mut self, observer: impl Fn(BuildStep) + Send + Sync + 'static) -> Self {
        self.on_step = Some(Arc::new(observer));
        self
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    pub fn sources(&self) -> &SourceLayers {
        &self.sources
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Resolve a base image identifier, pulling it if needed
    pub async fn resolve_base(&self, identifier: &str) -> StrataResult<BaseImage> {
        layer::resolve_base(self.runtime.as_ref(), identifier).await
    }

    /// Produce the dependency layer for `manifest`.
    ///
    /// Returns the cached layer when one is committed under the manifest's
    /// key; otherwise runs the installer and commits its output. Nothing
    /// is committed if the install fails or is cancelled.
    pub async fn install_dependencies(
        &self,
        base: &BaseImage,
        manifest: &DependencyManifest,
        cancel: &CancelToken,
    ) -> StrataResult<DependencyLayerHandle> {
        if cancel.is_cancelled() {
            return Err(StrataError::Cancelled("build cancelled".to_string()));
        }

        let key = manifest.key();
        let installer = self.installer.as_ref();
        debug!(
            "Dependency layer {} via {} installer",
            key.short(),
            installer.name()
        );

        let (layer, cache_hit) = self
            .cache
            .get_or_populate_until(key, &base.image(), cancel.cancelled(), |target| async move {
                installer.install(base, manifest, &target, cancel).await
            })
            .await?;

        if cache_hit && layer.base != base.image() {
            warn!(
                "Reusing dependency layer {} installed on {} for base {}",
                key.short(),
                layer.base,
                base.image()
            );
        }

        Ok(DependencyLayerHandle {
            base: base.clone(),
            layer,
            cache_hit,
        })
    }

    /// Copy the full source tree into a new layer above the dependencies
    pub async fn copy_source(
        &self,
        dependencies: &DependencyLayerHandle,
        tree: &SourceTree,
    ) -> StrataResult<SourceLayerHandle> {
        let layer = self.sources.copy(&dependencies.layer, tree).await?;
        debug!(
            "Source layer {} ({} files)",
            layer.short(),
            layer.file_count
        );

        Ok(SourceLayerHandle {
            base: dependencies.base.clone(),
            dependencies: dependencies.layer.clone(),
            layer,
        })
    }

    /// Record the entry command and persist the image. Runs nothing.
    pub async fn finalize(
        &self,
        source: &SourceLayerHandle,
        entry_command: EntryCommand,
    ) -> StrataResult<Image> {
        let image = Image::new(
            source.base.reference.clone(),
            source.dependencies.key.clone(),
            source.layer.digest.clone(),
            ImageConfig {
                entry_command,
                workdir: self.workdir.clone(),
            },
        );

        self.images.save(&image).await?;
        info!("Finalized image {}", image.short_id());
        Ok(image)
    }

    /// Run all four steps
    pub async fn build(
        &self,
        request: &BuildRequest,
        cancel: &CancelToken,
    ) -> StrataResult<BuildOutcome> {
        let started = Instant::now();
        self.build_log
            .record(
                events::BUILD_STARTED,
                &serde_json::json!({
                    "base": request.base,
                    "manifest_key": request.manifest.key().to_string(),
                    "context": request.source.root().display().to_string(),
                }),
            )
            .await;

        let result = self.run_steps(request, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                info!(
                    "Built image {} (dependencies {})",
                    outcome.image.short_id(),
                    if outcome.dependency_cache_hit { "cached" } else { "installed" }
                );
                self.build_log
                    .record(
                        events::BUILD_COMPLETED,
                        &serde_json::json!({
                            "image": outcome.image.id,
                            "dependency_cache_hit": outcome.dependency_cache_hit,
                            "elapsed_ms": elapsed_ms,
                        }),
                    )
                    .await;
            }
            Err(e) => {
                self.build_log
                    .record(
                        events::BUILD_FAILED,
                        &serde_json::json!({
                            "step": e.failed_step(),
                            "error": e.to_string(),
                            "elapsed_ms": elapsed_ms,
                        }),
                    )
                    .await;
            }
        }

        result
    }

    async fn run_steps(
        &self,
        request: &BuildRequest,
        cancel: &CancelToken,
    ) -> StrataResult<BuildOutcome> {
        self.step(BuildStep::ResolveBase);
        let base = self.resolve_base(&request.base).await?;

        self.step(BuildStep::InstallDependencies);
        let dependencies = self
            .install_dependencies(&base, &request.manifest, cancel)
            .await?;

        self.step(BuildStep::CopySource);
        let source = self.copy_source(&dependencies, &request.source).await?;

        self.step(BuildStep::Finalize);
        let image = self
            .finalize(&source, request.entry_command.clone())
            .await?;

        Ok(BuildOutcome {
            image,
            dependency_cache_hit: dependencies.cache_hit,
            base_pulled: base.pulled,
            dependency_layer: dependencies.layer,
            source_layer: source.layer,
        })
    }

    fn step(&self, step: BuildStep) {
        debug!("Build step: {}", step);
        if let Some(ref observer) = self.on_step {
            observer(step);
        }
    }

    /// Make the image available in the container runtime under its tag
    pub async fn materialize(&self, image: &Image) -> StrataResult<MaterializedImage> {
        let dependencies = self
            .cache
            .lookup(&image.dependency_layer)
            .await?
            .ok_or_else(|| self.missing_layer(image, &image.dependency_layer.to_string()))?;
        let source = self
            .sources
            .get(&image.source_layer)
            .await?
            .ok_or_else(|| self.missing_layer(image, &image.source_layer))?;

        layer::materialize(
            self.runtime.as_ref(),
            image,
            &LayerDirs {
                dependencies: dependencies.rootfs,
                source: source.rootfs,
            },
            &self.contexts_dir,
        )
        .await
    }

    /// Run an image's entry command in the container runtime.
    ///
    /// Returns the process exit code unchanged.
    pub async fn run(&self, image: &Image) -> StrataResult<i32> {
        let materialized = self.materialize(image).await?;

        let attach = std::io::stdin().is_terminal();
        let mut config = ContainerConfig::new(&materialized.tag);
        config.remove = true;
        config.interactive = attach;
        config.tty = attach && std::io::stdout().is_terminal();

        info!(
            "Running {} ({})",
            materialized.tag, image.config.entry_command
        );
        self.runtime.run_attached(&config, &[]).await
    }

    fn missing_layer(&self, image: &Image, digest: &str) -> StrataError {
        StrataError::StoreCorrupt {
            path: self.contexts_dir.with_file_name("layers"),
            reason: format!(
                "layer {} of image {} is missing; rebuild the image",
                digest,
                image.short_id()
            ),
        }
    }
}
