//! Images command - list, inspect and remove built images

use crate::build_log::{events, BuildLog};
use crate::builder::{Image, ImageStore};
use crate::cli::args::{ImagesAction, ImagesArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::StrataResult;
use crate::orchestration::create_runtime;
use crate::ui::{self, UiContext};
use console::style;
use tracing::debug;

/// Execute the images command
pub async fn execute(args: ImagesArgs, config: &Config) -> StrataResult<()> {
    let store = ImageStore::open(&ConfigManager::store_root(config)).await?;

    match args.action {
        ImagesAction::List { format } => list_images(&store, format).await,
        ImagesAction::Inspect { image } => inspect_image(&store, &image).await,
        ImagesAction::Rm { image } => remove_image(&store, &image, config).await,
    }
}

async fn list_images(store: &ImageStore, format: OutputFormat) -> StrataResult<()> {
    let images = store.list().await?;

    if images.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No images built yet");
            }
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&images),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&images)?),
        OutputFormat::Plain => {
            for image in &images {
                println!("{}", image.id);
            }
        }
    }

    Ok(())
}

fn print_table(images: &[Image]) {
    println!(
        "{:<14} {:<24} {:<14} {:<18} {:<24}",
        style("IMAGE").bold(),
        style("BASE").bold(),
        style("DEPS").bold(),
        style("CREATED").bold(),
        style("COMMAND").bold()
    );
    println!("{}", "-".repeat(96));

    for image in images {
        println!(
            "{:<14} {:<24} {:<14} {:<18} {:<24}",
            image.short_id(),
            image.base.to_string(),
            image.dependency_layer.short(),
            image.created_at.format("%Y-%m-%d %H:%M"),
            image.config.entry_command.to_string()
        );
    }

    println!();
    println!("{} image(s)", images.len());
}

async fn inspect_image(store: &ImageStore, reference: &str) -> StrataResult<()> {
    let image = store.resolve(reference).await?;

    #[derive(serde::Serialize)]
    struct Inspect<'a> {
        #[serde(flatten)]
        image: &'a Image,
        tag: String,
        layers: Vec<String>,
    }

    let view = Inspect {
        image: &image,
        tag: image.tag(),
        layers: image.layers(),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn remove_image(store: &ImageStore, reference: &str, config: &Config) -> StrataResult<()> {
    let ctx = UiContext::detect();
    let image = store.resolve(reference).await?;

    store.remove(&image.id).await?;

    // The runtime copy is derived and can be rebuilt; drop it if we can
    match create_runtime(config).await {
        Ok(runtime) => {
            if let Err(e) = runtime.remove_image(&image.tag()).await {
                ui::step_warn_hint(
                    &ctx,
                    &format!("Could not remove runtime image {}", image.tag()),
                    &e.to_string(),
                );
            }
        }
        Err(e) => debug!("Skipping runtime image removal: {}", e),
    }

    BuildLog::new(config)
        .record(
            events::IMAGE_REMOVED,
            &serde_json::json!({ "image": image.id }),
        )
        .await;

    ui::step_ok_detail(&ctx, "Removed image", image.short_id());
    Ok(())
}
