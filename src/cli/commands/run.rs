//! Run command - start a container from a built image

use crate::builder::{ContainerInstaller, ImageBuilder};
use crate::cli::args::RunArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{StrataError, StrataResult};
use crate::orchestration::create_runtime;
use crate::ui::{TaskSpinner, UiContext};
use std::sync::Arc;
use tracing::debug;

/// Execute the run command, returning the container's exit code
pub async fn execute(args: RunArgs, config: &Config) -> StrataResult<i32> {
    let ctx = UiContext::detect();
    let runtime = create_runtime(config).await?;
    if !runtime.is_available().await? {
        return Err(StrataError::RuntimeUnavailable(
            runtime.runtime_name().to_string(),
        ));
    }

    let installer = Arc::new(ContainerInstaller::new(runtime.clone(), &config.installer));
    let builder =
        ImageBuilder::open(&ConfigManager::store_root(config), runtime, installer).await?;

    let image = builder.images().resolve(&args.image).await?;
    debug!("Resolved {} to image {}", args.image, image.id);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Preparing {}...", image.tag()));
    match builder.materialize(&image).await {
        Ok(m) if m.was_cached => spinner.clear(),
        Ok(m) => spinner.stop(&format!("Built {}", m.tag)),
        Err(e) => {
            spinner.stop_error("Failed to prepare image");
            return Err(e);
        }
    }

    builder.run(&image).await
}
