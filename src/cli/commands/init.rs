//! Init command - create project-local strata.toml

use crate::cli::args::InitArgs;
use crate::config::LOCAL_CONFIG_FILE;
use crate::error::{StrataError, StrataResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Template for project-local config
const INIT_TEMPLATE: &str = r#"# Strata project configuration
# Settings here override your global config (~/.config/strata/config.toml)

[build]
# base_image = "python:3.11-slim"
# manifest = "requirements.txt"
# workdir = "/app"
# entry_command = ["python", "main.py"]
# exclude = [".git", "__pycache__", ".venv", "strata.toml"]

[installer]
# command = ["pip", "install", "--no-cache-dir", "--prefix", "{target}/usr/local", "-r", "{manifest}"]
# network = "host"

# [runtime]
# engine = "auto"                    # auto, podman, docker
"#;

/// Execute the init command
pub async fn execute(args: InitArgs) -> StrataResult<()> {
    let ctx = UiContext::detect();

    let target_dir = match args.path {
        Some(ref p) => p.clone(),
        None => {
            std::env::current_dir().map_err(|e| StrataError::io("getting current directory", e))?
        }
    };

    let config_path = target_dir.join(LOCAL_CONFIG_FILE);

    if config_path.exists() && !args.force {
        return Err(StrataError::User(format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }

    ensure_dir(&target_dir).await?;

    fs::write(&config_path, INIT_TEMPLATE)
        .await
        .map_err(|e| StrataError::io(format!("writing {}", config_path.display()), e))?;

    ui::step_ok_detail(
        &ctx,
        "Created project config",
        &config_path.display().to_string(),
    );
    if !target_dir.join("requirements.txt").exists() {
        ui::remark(&ctx, "No requirements.txt here yet; set build.manifest if it lives elsewhere");
    }

    Ok(())
}

async fn ensure_dir(dir: &Path) -> StrataResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| StrataError::io(format!("creating directory {}", dir.display()), e))?;
    }
    Ok(())
}
