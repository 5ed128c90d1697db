//! Container runtime driving the podman or docker CLI
//!
//! Both CLIs accept the same subset of commands used here, so one
//! implementation covers either engine.

use crate::error::{StrataError, StrataResult};
use crate::orchestration::container::{ContainerConfig, RunOutput};
use crate::orchestration::factory::Engine;
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Container runtime backed by an engine CLI binary
pub struct CliRuntime {
    engine: Engine,
}

impl CliRuntime {
    /// Create a runtime for an engine
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Check if the engine binary is installed
    pub async fn installed(engine: Engine) -> bool {
        Command::new(engine.binary())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.engine.binary(), args.join(" "))
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> StrataResult<std::process::Output> {
        debug!("Executing: {}", self.describe(args));

        Command::new(self.engine.binary())
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StrataError::command_failed(self.describe(args), e))
    }

    /// Execute an engine command attached to the terminal
    async fn exec_interactive(&self, args: &[&str]) -> StrataResult<i32> {
        debug!("Executing interactively: {}", self.describe(args));

        let status = Command::new(self.engine.binary())
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| StrataError::command_failed(self.describe(args), e))?;

        Ok(status.code().unwrap_or(-1))
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn is_available(&self) -> StrataResult<bool> {
        if !Self::installed(self.engine).await {
            return Ok(false);
        }
        let output = self.exec(&["info"]).await?;
        Ok(output.status.success())
    }

    async fn image_exists(&self, image: &str) -> StrataResult<bool> {
        let output = self.exec(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    async fn pull(&self, image: &str) -> StrataResult<()> {
        info!("Pulling image: {}", image);

        let output = self.exec(&["pull", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(StrataError::command_exec(
                self.describe(&["pull", image]),
                stderr.trim(),
            ))
        }
    }

    async fn run_captured(
        &self,
        config: &ContainerConfig,
        command: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> StrataResult<RunOutput> {
        let args = config.run_args(command);
        debug!("Running container: {} {:?}", self.engine.binary(), args);

        let mut child = Command::new(self.engine.binary())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StrataError::command_failed(format!("{} run", self.engine.binary()), e))?;

        let output = super::stream_child_output(&mut child, on_output).await;

        let status = child
            .wait()
            .await
            .map_err(|e| StrataError::command_failed(format!("{} run", self.engine.binary()), e))?;

        Ok(RunOutput {
            exit_code: status.code().unwrap_or(-1),
            output,
        })
    }

    async fn run_attached(
        &self,
        config: &ContainerConfig,
        command: &[String],
    ) -> StrataResult<i32> {
        let args = config.run_args(command);
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec_interactive(&args_refs).await
    }

    async fn remove_container(&self, name: &str) -> StrataResult<()> {
        debug!("Removing container: {}", name);

        let output = self.exec(&["rm", "-f", name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("no such container") {
                Ok(())
            } else {
                Err(StrataError::command_exec(
                    self.describe(&["rm", "-f", name]),
                    stderr,
                ))
            }
        }
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> StrataResult<()> {
        let context_str = context_dir.display().to_string();
        let output = self.exec(&["build", "-t", tag, &context_str]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(StrataError::ImageBuild {
                tag: tag.to_string(),
                output: super::build_error_output(&stdout, &stderr),
            });
        }

        Ok(())
    }

    async fn remove_image(&self, image: &str) -> StrataResult<()> {
        let output = self.exec(&["rmi", image]).await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lower = stderr.to_lowercase();
        if lower.contains("no such image") || lower.contains("image not known") {
            Ok(())
        } else {
            Err(StrataError::command_exec(self.describe(&["rmi", image]), stderr))
        }
    }

    fn runtime_name(&self) -> &'static str {
        self.engine.display_name()
    }
}
