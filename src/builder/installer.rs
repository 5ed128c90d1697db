//! Dependency installers
//!
//! An installer turns a dependency manifest into files under a target
//! directory. The default installer runs the configured package manager
//! inside the base image with the target bind-mounted, so the layer holds
//! exactly what the install wrote.

use crate::builder::cancel::CancelToken;
use crate::cache::DependencyManifest;
use crate::config::schema::InstallerConfig;
use crate::error::{StrataError, StrataResult};
use crate::layer::BaseImage;
use crate::orchestration::{build_error_output, ContainerConfig, ContainerRuntime};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mount point of the layer target inside the install container
const TARGET_MOUNT: &str = "/layer";
/// Mount point of the manifest directory inside the install container
const MANIFEST_MOUNT: &str = "/manifest";

/// Installs a manifest's dependencies into a directory
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Install everything `manifest` lists into `target`.
    ///
    /// Must return `Err(Cancelled)` promptly once `cancel` fires.
    async fn install(
        &self,
        base: &BaseImage,
        manifest: &DependencyManifest,
        target: &Path,
        cancel: &CancelToken,
    ) -> StrataResult<()>;

    /// Installer name for diagnostics
    fn name(&self) -> &str;
}

/// Runs the package manager in a throwaway container from the base image
pub struct ContainerInstaller {
    runtime: Arc<dyn ContainerRuntime>,
    command: Vec<String>,
    network: Option<String>,
}

impl ContainerInstaller {
    /// Create an installer from config
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &InstallerConfig) -> Self {
        let network = Some(config.network.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Self {
            runtime,
            command: config.command.clone(),
            network,
        }
    }

    /// Expand `{target}` and `{manifest}` placeholders in the install command
    fn expand_command(&self, manifest_file: &str) -> Vec<String> {
        let manifest_path = format!("{}/{}", MANIFEST_MOUNT, manifest_file);
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{target}", TARGET_MOUNT)
                    .replace("{manifest}", &manifest_path)
            })
            .collect()
    }

    fn container_config(
        &self,
        base: &BaseImage,
        manifest: &DependencyManifest,
        target: &Path,
        manifest_dir: &Path,
    ) -> ContainerConfig {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let mut config = ContainerConfig::new(base.image());
        config.name = Some(format!(
            "strata-install-{}-{}",
            manifest.key().short(),
            &suffix[..8]
        ));
        config.remove = true;
        config.network = self.network.clone();
        config.volumes = vec![
            format!("{}:{}", target.display(), TARGET_MOUNT),
            format!("{}:{}:ro", manifest_dir.display(), MANIFEST_MOUNT),
        ];
        config
    }
}

#[async_trait]
impl DependencyInstaller for ContainerInstaller {
    async fn install(
        &self,
        base: &BaseImage,
        manifest: &DependencyManifest,
        target: &Path,
        cancel: &CancelToken,
    ) -> StrataResult<()> {
        if cancel.is_cancelled() {
            return Err(StrataError::Cancelled(
                "dependency install not started".to_string(),
            ));
        }

        if self.command.is_empty() {
            return Err(StrataError::ConfigInvalid {
                path: "installer.command".into(),
                reason: "install command is empty".to_string(),
            });
        }

        // The manifest sits next to the target so it is discarded with it
        let manifest_dir = target.parent().unwrap_or(target).join("manifest");
        let manifest_file = manifest.file_name();
        tokio::fs::create_dir_all(&manifest_dir)
            .await
            .map_err(|e| StrataError::io("creating manifest directory", e))?;
        tokio::fs::write(manifest_dir.join(&manifest_file), manifest.content())
            .await
            .map_err(|e| StrataError::io("staging manifest", e))?;

        let config = self.container_config(base, manifest, target, &manifest_dir);
        let command = self.expand_command(&manifest_file);
        let container = config.name.clone().unwrap_or_default();

        info!(
            "Installing {} dependencies in {}",
            manifest.requirements().len(),
            base.image()
        );
        debug!("Install command: {:?}", command);

        let on_output = |line: String| debug!(target: "strata::install", "{}", line);

        let output = tokio::select! {
            output = self.runtime.run_captured(&config, &command, &on_output) => output?,
            _ = cancel.cancelled() => {
                warn!("Install cancelled, removing container {}", container);
                if let Err(e) = self.runtime.remove_container(&container).await {
                    warn!("Failed to remove install container {}: {}", container, e);
                }
                return Err(StrataError::Cancelled(format!(
                    "dependency install for {}",
                    manifest.key().short()
                )));
            }
        };

        if !output.success() {
            return Err(StrataError::DependencyInstall {
                key: manifest.key().to_string(),
                output: build_error_output(&output.output.join("\n"), ""),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "container"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::cancel::cancel_pair;
    use crate::layer::ImageRef;
    use crate::orchestration::RunOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records run configs and replays a fixed exit code
    struct ScriptedRuntime {
        exit_code: i32,
        hang: bool,
        runs: Mutex<Vec<(ContainerConfig, Vec<String>)>>,
        removed: Mutex<Vec<String>>,
    }

    impl ScriptedRuntime {
        fn new(exit_code: i32) -> Self {
            Self {
                exit_code,
                hang: false,
                runs: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn is_available(&self) -> StrataResult<bool> {
            Ok(true)
        }
        async fn image_exists(&self, _image: &str) -> StrataResult<bool> {
            Ok(true)
        }
        async fn pull(&self, _image: &str) -> StrataResult<()> {
            Ok(())
        }
        async fn run_captured(
            &self,
            config: &ContainerConfig,
            command: &[String],
            on_output: &(dyn Fn(String) + Send + Sync),
        ) -> StrataResult<RunOutput> {
            self.runs
                .lock()
                .unwrap()
                .push((config.clone(), command.to_vec()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            on_output("ERROR: No matching distribution found for nope".to_string());
            Ok(RunOutput {
                exit_code: self.exit_code,
                output: vec!["ERROR: No matching distribution found for nope".to_string()],
            })
        }
        async fn run_attached(
            &self,
            _config: &ContainerConfig,
            _command: &[String],
        ) -> StrataResult<i32> {
            Ok(0)
        }
        async fn remove_container(&self, name: &str) -> StrataResult<()> {
            self.removed.lock().unwrap().push(name.to_string());
            Ok(())
        }
        async fn build_image(&self, _context_dir: &Path, _tag: &str) -> StrataResult<()> {
            Ok(())
        }
        async fn remove_image(&self, _image: &str) -> StrataResult<()> {
            Ok(())
        }
        fn runtime_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn base() -> BaseImage {
        BaseImage {
            reference: ImageRef::parse("python:3.11-slim").unwrap(),
            pulled: false,
        }
    }

    fn target(temp: &TempDir) -> std::path::PathBuf {
        let target = temp.path().join("staging/rootfs");
        std::fs::create_dir_all(&target).unwrap();
        target
    }

    #[tokio::test]
    async fn runs_installer_with_mounts() {
        let temp = TempDir::new().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(0));
        let installer = ContainerInstaller::new(runtime.clone(), &InstallerConfig::default());
        let manifest = DependencyManifest::from_bytes("flask==3.0.0\n");
        let target = target(&temp);

        installer
            .install(&base(), &manifest, &target, &CancelToken::never())
            .await
            .unwrap();

        let runs = runtime.runs.lock().unwrap();
        let (config, command) = &runs[0];
        assert_eq!(config.image, "python:3.11-slim");
        assert!(config.remove);
        assert_eq!(config.network.as_deref(), Some("host"));
        assert_eq!(config.volumes[0], format!("{}:/layer", target.display()));
        assert!(config.volumes[1].ends_with(":/manifest:ro"));
        assert!(command.contains(&"/layer/usr/local".to_string()));
        assert!(command.contains(&"/manifest/requirements.txt".to_string()));

        let staged = temp.path().join("staging/manifest/requirements.txt");
        assert_eq!(std::fs::read_to_string(staged).unwrap(), "flask==3.0.0\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_install_failure() {
        let temp = TempDir::new().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(1));
        let installer = ContainerInstaller::new(runtime, &InstallerConfig::default());
        let manifest = DependencyManifest::from_bytes("nope==0.0.0\n");

        let err = installer
            .install(&base(), &manifest, &target(&temp), &CancelToken::never())
            .await
            .unwrap_err();

        match err {
            StrataError::DependencyInstall { key, output } => {
                assert_eq!(key, manifest.key().to_string());
                assert!(output.contains("No matching distribution"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_removes_container() {
        let temp = TempDir::new().unwrap();
        let mut scripted = ScriptedRuntime::new(0);
        scripted.hang = true;
        let runtime = Arc::new(scripted);
        let installer = ContainerInstaller::new(runtime.clone(), &InstallerConfig::default());
        let manifest = DependencyManifest::from_bytes("flask==3.0.0\n");
        let (handle, token) = cancel_pair();

        let base = base();
        let target = target(&temp);
        let install = installer.install(&base, &manifest, &target, &token);
        let (result, ()) = tokio::join!(install, async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            handle.cancel();
        });

        assert!(matches!(result, Err(StrataError::Cancelled(_))));
        let removed = runtime.removed.lock().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].starts_with("strata-install-"));
    }

    #[tokio::test]
    async fn already_cancelled_does_not_run() {
        let temp = TempDir::new().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new(0));
        let installer = ContainerInstaller::new(runtime.clone(), &InstallerConfig::default());
        let (handle, token) = cancel_pair();
        handle.cancel();

        let result = installer
            .install(
                &base(),
                &DependencyManifest::from_bytes("flask\n"),
                &target(&temp),
                &token,
            )
            .await;

        assert!(matches!(result, Err(StrataError::Cancelled(_))));
        assert!(runtime.runs.lock().unwrap().is_empty());
    }

    #[test]
    fn expand_command_placeholders() {
        let runtime = Arc::new(ScriptedRuntime::new(0));
        let config = InstallerConfig {
            command: ["uv", "pip", "install", "--target={target}", "-r", "{manifest}"]
                .map(String::from)
                .to_vec(),
            network: String::new(),
        };
        let installer = ContainerInstaller::new(runtime, &config);

        assert_eq!(
            installer.expand_command("reqs.txt"),
            ["uv", "pip", "install", "--target=/layer", "-r", "/manifest/reqs.txt"]
        );
        assert!(installer.network.is_none());
    }
}
