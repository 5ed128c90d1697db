//! Build command - build an image from a context directory

use crate::build_log::BuildLog;
use crate::builder::{
    cancel_pair, BuildOutcome, BuildRequest, ContainerInstaller, EntryCommand, ImageBuilder,
};
use crate::cache::{format_bytes, DependencyManifest};
use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{StrataError, StrataResult};
use crate::layer::SourceTree;
use crate::orchestration::create_runtime;
use crate::ui::{self, BuildProgress, UiContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> StrataResult<()> {
    let ctx = UiContext::detect();
    let request = build_request(&args, config).await?;
    let workdir = args
        .workdir
        .clone()
        .unwrap_or_else(|| config.build.workdir.clone());

    let runtime = create_runtime(config).await?;
    if !runtime.is_available().await? {
        return Err(StrataError::RuntimeUnavailable(
            runtime.runtime_name().to_string(),
        ));
    }
    let installer = Arc::new(ContainerInstaller::new(runtime.clone(), &config.installer));

    let progress = (!args.quiet).then(|| BuildProgress::new(&ctx, &request.base));
    let mut builder = ImageBuilder::open(&ConfigManager::store_root(config), runtime, installer)
        .await?
        .with_workdir(workdir)
        .with_build_log(BuildLog::new(config));
    if let Some(ref progress) = progress {
        let progress = progress.clone();
        builder = builder.on_step(move |step| progress.on_step(step));
    }

    let (cancel, token) = cancel_pair();
    let build = builder.build(&request, &token);
    tokio::pin!(build);
    let outcome = tokio::select! {
        result = &mut build => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling build");
            cancel.cancel();
            // The running step observes the cancellation and cleans up
            build.await
        }
    };

    if let Some(ref progress) = progress {
        progress.finish();
    }
    let outcome = outcome?;

    if args.quiet {
        println!("{}", outcome.image.id);
    } else {
        print_summary(&ctx, &outcome);
    }

    Ok(())
}

/// Resolve CLI flags against config into a build request
async fn build_request(args: &BuildArgs, config: &Config) -> StrataResult<BuildRequest> {
    let context = match args.context {
        Some(ref p) => p.clone(),
        None => {
            std::env::current_dir().map_err(|e| StrataError::io("getting current directory", e))?
        }
    };
    if !context.is_dir() {
        return Err(StrataError::User(format!(
            "Build context {} is not a directory",
            context.display()
        )));
    }

    let manifest_rel = args
        .manifest
        .clone()
        .unwrap_or_else(|| config.build.manifest.clone());
    let manifest_path: PathBuf = context.join(manifest_rel);
    let manifest = DependencyManifest::from_file(&manifest_path).await?;
    debug!(
        "Manifest {} lists {} requirement(s)",
        manifest_path.display(),
        manifest.requirements().len()
    );

    let mut exclude = config.build.exclude.clone();
    exclude.extend(args.exclude.iter().cloned());

    let entry_command = if args.command.is_empty() {
        EntryCommand::from_argv(config.build.entry_command.clone())?
    } else {
        EntryCommand::from_argv(args.command.clone())?
    };

    Ok(BuildRequest {
        base: args
            .base
            .clone()
            .unwrap_or_else(|| config.build.base_image.clone()),
        manifest,
        source: SourceTree::new(context).with_exclude(&exclude),
        entry_command,
    })
}

fn print_summary(ctx: &UiContext, outcome: &BuildOutcome) {
    let image = &outcome.image;
    let deps = &outcome.dependency_layer;

    if outcome.dependency_cache_hit {
        ui::step_ok_detail(ctx, "Dependency layer reused", deps.key.short());
    } else {
        ui::step_ok_detail(
            ctx,
            "Dependency layer installed",
            &format!("{} ({})", deps.key.short(), format_bytes(deps.size_bytes)),
        );
    }
    ui::step_ok_detail(
        ctx,
        "Source layer copied",
        &format!(
            "{} files, {}",
            outcome.source_layer.file_count,
            format_bytes(outcome.source_layer.size_bytes)
        ),
    );

    ui::key_value(ctx, "Image", &image.id);
    ui::key_value(ctx, "Base", &image.base.to_string());
    ui::key_value(ctx, "Command", &image.config.entry_command.to_string());
    ui::key_value(ctx, "Workdir", &image.config.workdir);
    ui::outro_success(ctx, &format!("Run it with: strata run {}", image.short_id()));
}
