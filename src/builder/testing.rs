//! In-memory runtime and installer doubles for builder tests

use crate::builder::cancel::CancelToken;
use crate::builder::installer::DependencyInstaller;
use crate::cache::DependencyManifest;
use crate::error::{StrataError, StrataResult};
use crate::layer::BaseImage;
use crate::orchestration::{ContainerConfig, ContainerRuntime, RunOutput};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Runtime that knows a fixed set of pullable images
pub struct FakeRuntime {
    registry: HashSet<String>,
    local: Mutex<HashSet<String>>,
    pub pulls: AtomicUsize,
    pub builds: Mutex<Vec<String>>,
    pub runs: Mutex<Vec<ContainerConfig>>,
    pub exit_code: i32,
}

impl FakeRuntime {
    /// A runtime whose registry holds `python:3.11-slim`
    pub fn new() -> Self {
        Self::with_registry(&["python:3.11-slim"])
    }

    pub fn with_registry(images: &[&str]) -> Self {
        Self {
            registry: images.iter().map(|s| s.to_string()).collect(),
            local: Mutex::new(HashSet::new()),
            pulls: AtomicUsize::new(0),
            builds: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            exit_code: 0,
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_available(&self) -> StrataResult<bool> {
        Ok(true)
    }

    async fn image_exists(&self, image: &str) -> StrataResult<bool> {
        Ok(self.local.lock().unwrap().contains(image))
    }

    async fn pull(&self, image: &str) -> StrataResult<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if !self.registry.contains(image) {
            return Err(StrataError::command_exec(
                format!("fake pull {}", image),
                "manifest unknown",
            ));
        }
        self.local.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn run_captured(
        &self,
        config: &ContainerConfig,
        _command: &[String],
        _on_output: &(dyn Fn(String) + Send + Sync),
    ) -> StrataResult<RunOutput> {
        self.runs.lock().unwrap().push(config.clone());
        Ok(RunOutput {
            exit_code: self.exit_code,
            output: Vec::new(),
        })
    }

    async fn run_attached(&self, config: &ContainerConfig, _command: &[String]) -> StrataResult<i32> {
        self.runs.lock().unwrap().push(config.clone());
        Ok(self.exit_code)
    }

    async fn remove_container(&self, _name: &str) -> StrataResult<()> {
        Ok(())
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> StrataResult<()> {
        assert!(context_dir.join("Dockerfile").is_file());
        self.builds.lock().unwrap().push(tag.to_string());
        self.local.lock().unwrap().insert(tag.to_string());
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> StrataResult<()> {
        self.local.lock().unwrap().remove(image);
        Ok(())
    }

    fn runtime_name(&self) -> &'static str {
        "fake"
    }
}

/// Installer that writes one file per requirement and counts invocations
pub struct FakeInstaller {
    pub installs: AtomicUsize,
    fail_next: AtomicBool,
    delay: Duration,
    hang: bool,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self {
            installs: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            delay: Duration::ZERO,
            hang: false,
        }
    }

    /// Slow installs down so concurrent callers overlap
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Never finish unless cancelled
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    /// Make the next install fail after writing partial output
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DependencyInstaller for FakeInstaller {
    async fn install(
        &self,
        _base: &BaseImage,
        manifest: &DependencyManifest,
        target: &Path,
        cancel: &CancelToken,
    ) -> StrataResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);

        let site = target.join("usr/local/lib/python3.11/site-packages");
        tokio::fs::create_dir_all(&site).await.unwrap();
        tokio::fs::write(site.join("partial"), "").await.unwrap();

        if self.hang {
            cancel.cancelled().await;
            return Err(StrataError::Cancelled("fake install".to_string()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StrataError::DependencyInstall {
                key: manifest.key().to_string(),
                output: "ERROR: No matching distribution found".to_string(),
            });
        }

        tokio::fs::remove_file(site.join("partial")).await.unwrap();
        for req in manifest.requirements() {
            tokio::fs::write(site.join(&req.name), &req.constraint)
                .await
                .unwrap();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
