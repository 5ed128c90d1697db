//! Container invocation types shared by runtime implementations

use std::collections::BTreeMap;

/// Configuration for starting a container
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Image to run
    pub image: String,
    /// Container name (runtime generates one if unset)
    pub name: Option<String>,
    /// Working directory override
    pub workdir: Option<String>,
    /// Volume mounts (host:container[:opts] format)
    pub volumes: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Network mode (runtime default if unset)
    pub network: Option<String>,
    /// Remove the container when it exits
    pub remove: bool,
    /// Keep stdin open
    pub interactive: bool,
    /// Allocate a TTY
    pub tty: bool,
}

impl ContainerConfig {
    /// Create a config for an image with runtime defaults
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Build the `run` argument list for a podman/docker style CLI.
    ///
    /// An empty `command` keeps the image's recorded entry command.
    pub fn run_args(&self, command: &[String]) -> Vec<String> {
        let mut args = vec!["run".to_string()];

        if self.remove {
            args.push("--rm".to_string());
        }
        if self.interactive {
            args.push("-i".to_string());
        }
        if self.tty {
            args.push("-t".to_string());
        }

        if let Some(ref name) = self.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }

        if let Some(ref workdir) = self.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }

        if let Some(ref network) = self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        for v in &self.volumes {
            args.push("-v".to_string());
            args.push(v.clone());
        }

        for (k, v) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(self.image.clone());
        args.extend(command.iter().cloned());
        args
    }
}

/// Captured result of a container that ran to completion
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Process exit code (-1 if terminated by a signal)
    pub exit_code: i32,
    /// Combined stdout and stderr lines
    pub output: Vec<String>,
}

impl RunOutput {
    /// Whether the process exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
