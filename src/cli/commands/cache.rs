//! Cache command - manage the dependency layer cache

use crate::build_log::{events, BuildLog};
use crate::builder::ImageStore;
use crate::cache::{format_bytes, CacheState, DependencyLayer, DependencyManifest, LayerCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::{StrataError, StrataResult};
use crate::layer::SourceLayers;
use crate::ui::{self, TaskSpinner, UiContext};
use chrono::{DateTime, Utc};
use console::style;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Staging entries and unreferenced source layers younger than this may
/// belong to a running build
const BUILD_GRACE: Duration = Duration::from_secs(60 * 60);

/// Layer stores below the configured root
struct Stores {
    layers: LayerCache,
    sources: SourceLayers,
    images: ImageStore,
}

impl Stores {
    async fn open(root: &Path) -> StrataResult<Self> {
        Ok(Self {
            layers: LayerCache::open(root).await?,
            sources: SourceLayers::open(root).await?,
            images: ImageStore::open(root).await?,
        })
    }
}

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> StrataResult<()> {
    let stores = Stores::open(&ConfigManager::store_root(config)).await?;

    match args.action {
        CacheAction::List { format } => list_layers(&stores.layers, format).await,
        CacheAction::Info { context, manifest } => {
            show_context_info(&stores.layers, context, manifest, config).await
        }
        CacheAction::Gc { days, dry_run } => gc_layers(&stores, config, days, dry_run).await,
        CacheAction::Clear { yes } => clear_all(&stores, config, yes).await,
    }
}

/// List all committed dependency layers
async fn list_layers(cache: &LayerCache, format: OutputFormat) -> StrataResult<()> {
    let layers = cache.list().await?;

    if layers.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No dependency layers cached."),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_layer_table(&layers),
        OutputFormat::Json => print_layer_json(&layers)?,
        OutputFormat::Plain => {
            for layer in &layers {
                println!("{}", layer.key.as_str());
            }
        }
    }

    Ok(())
}

fn print_layer_table(layers: &[DependencyLayer]) {
    println!(
        "{:<14} {:<10} {:<10} {:<24} {:<20}",
        "KEY", "STATE", "SIZE", "BASE", "CREATED"
    );
    println!("{}", "-".repeat(80));

    for layer in layers {
        let state_display = match layer.state {
            CacheState::Complete => style("complete").green().to_string(),
            CacheState::Building => style("building").yellow().to_string(),
            CacheState::Miss => style("miss").dim().to_string(),
        };

        println!(
            "{:<14} {:<10} {:<10} {:<24} {:<20}",
            layer.key.short(),
            state_display,
            format_bytes(layer.size_bytes),
            layer.base,
            layer.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = layers.iter().map(|l| l.size_bytes).sum();
    println!();
    println!("Total: {} layer(s), {}", layers.len(), format_bytes(total));
}

fn print_layer_json(layers: &[DependencyLayer]) -> StrataResult<()> {
    #[derive(serde::Serialize)]
    struct LayerJson<'a> {
        key: String,
        digest: String,
        state: String,
        base: &'a str,
        size_bytes: u64,
        created_at: String,
        path: String,
    }

    let json_layers: Vec<LayerJson> = layers
        .iter()
        .map(|l| LayerJson {
            key: l.key.as_str().to_string(),
            digest: l.digest(),
            state: l.state.to_string(),
            base: &l.base,
            size_bytes: l.size_bytes,
            created_at: l.created_at.to_rfc3339(),
            path: l.rootfs.display().to_string(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_layers)?);
    Ok(())
}

/// Show whether a context's manifest already has a dependency layer
async fn show_context_info(
    cache: &LayerCache,
    context: Option<PathBuf>,
    manifest: Option<PathBuf>,
    config: &Config,
) -> StrataResult<()> {
    let context_dir = match context {
        Some(p) => p.canonicalize().unwrap_or(p),
        None => {
            std::env::current_dir().map_err(|e| StrataError::io("getting current directory", e))?
        }
    };
    let manifest_path =
        context_dir.join(manifest.unwrap_or_else(|| config.build.manifest.clone()));
    let manifest = DependencyManifest::from_file(&manifest_path).await?;

    println!("Context:  {}", context_dir.display());
    println!("Manifest: {}", manifest_path.display());
    println!("Key:      {}", manifest.key());
    println!();

    let requirements = manifest.requirements();
    println!("Requirements ({}):", requirements.len());
    for req in &requirements {
        if req.constraint.is_empty() {
            println!("  {} {}", style("•").cyan(), req.name);
        } else {
            println!("  {} {} {}", style("•").cyan(), req.name, style(&req.constraint).dim());
        }
    }
    println!();

    let (marker, state) = match cache.state(manifest.key()).await? {
        CacheState::Complete => (style("✓").green(), "complete (next build reuses it)"),
        CacheState::Building => (style("~").yellow(), "incomplete (will be reinstalled)"),
        CacheState::Miss => (style("○").dim(), "miss (next build installs)"),
    };
    println!("Cache status: {} {}", marker, state);

    Ok(())
}

/// A source layer is only recorded by an image once its build finishes
fn past_grace(created_at: DateTime<Utc>) -> bool {
    Utc::now()
        .signed_duration_since(created_at)
        .to_std()
        .is_ok_and(|age| age > BUILD_GRACE)
}

/// Remove old unreferenced layers and abandoned staging directories
async fn gc_layers(
    stores: &Stores,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) -> StrataResult<()> {
    let gc_days = days_override.unwrap_or(config.cache.gc_days);

    if gc_days == 0 {
        println!("Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }

    let images = stores.images.list().await?;
    let used_deps: HashSet<String> = images
        .iter()
        .map(|i| i.dependency_layer.as_str().to_string())
        .collect();
    let used_sources: HashSet<&str> = images.iter().map(|i| i.source_layer.as_str()).collect();

    let stale_deps: Vec<DependencyLayer> = stores
        .layers
        .list()
        .await?
        .into_iter()
        .filter(|l| l.is_older_than_days(gc_days) && !used_deps.contains(l.key.as_str()))
        .collect();
    let stale_sources: Vec<_> = stores
        .sources
        .list()
        .await?
        .into_iter()
        .filter(|l| !used_sources.contains(l.digest.as_str()) && past_grace(l.created_at))
        .collect();

    if stale_deps.is_empty() && stale_sources.is_empty() {
        println!("No unused layers older than {} days.", gc_days);
    } else {
        println!(
            "Found {} dependency layer(s) older than {} days and {} unused source layer(s):",
            stale_deps.len(),
            gc_days,
            stale_sources.len()
        );
        for layer in &stale_deps {
            let age_days = (Utc::now() - layer.created_at).num_days();
            println!(
                "  {} deps {} ({}, {} days old)",
                style("•").red(),
                layer.key.short(),
                format_bytes(layer.size_bytes),
                age_days
            );
        }
        for layer in &stale_sources {
            println!(
                "  {} source {} ({})",
                style("•").red(),
                layer.short(),
                format_bytes(layer.size_bytes)
            );
        }
    }

    if dry_run {
        println!();
        println!("Dry run - no layers removed.");
        return Ok(());
    }

    for layer in &stale_deps {
        debug!("Removing dependency layer: {}", layer.key.short());
        stores.layers.remove(&layer.key).await?;
    }
    for layer in &stale_sources {
        debug!("Removing source layer: {}", layer.digest);
        stores.sources.remove(&layer.digest).await?;
    }
    let staging = stores.layers.clean_staging(BUILD_GRACE).await?;

    BuildLog::new(config)
        .record(
            events::CACHE_PRUNED,
            &serde_json::json!({
                "dependency_layers": stale_deps.len(),
                "source_layers": stale_sources.len(),
                "staging": staging,
            }),
        )
        .await;

    let ctx = UiContext::detect();
    ui::step_ok(
        &ctx,
        &format!(
            "Removed {} layer(s) and {} staging dir(s)",
            stale_deps.len() + stale_sources.len(),
            staging
        ),
    );

    Ok(())
}

/// Remove every layer and the image records built from them
async fn clear_all(stores: &Stores, config: &Config, skip_confirm: bool) -> StrataResult<()> {
    let ctx = UiContext::detect().with_auto_yes(skip_confirm);
    let layers = stores.layers.list().await?;
    let sources = stores.sources.list().await?;
    let images = stores.images.list().await?;

    if layers.is_empty() && sources.is_empty() && images.is_empty() {
        println!("Nothing to clear.");
        return Ok(());
    }

    let total: u64 = layers.iter().map(|l| l.size_bytes).sum::<u64>()
        + sources.iter().map(|l| l.size_bytes).sum::<u64>();
    ui::note(
        &ctx,
        "Cache clear",
        &format!(
            "{} dependency layer(s), {} source layer(s) and {} image(s), {} total",
            layers.len(),
            sources.len(),
            images.len(),
            format_bytes(total)
        ),
    );

    if !ui::confirm(&ctx, "Remove all layers and images?", false).await? {
        println!("Aborted.");
        return Ok(());
    }

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Clearing cache...");

    for image in &images {
        stores.images.remove(&image.id).await?;
    }
    for layer in &layers {
        stores.layers.remove(&layer.key).await?;
    }
    for layer in &sources {
        stores.sources.remove(&layer.digest).await?;
    }
    stores.layers.clean_staging(BUILD_GRACE).await?;

    BuildLog::new(config)
        .record(
            events::CACHE_PRUNED,
            &serde_json::json!({
                "dependency_layers": layers.len(),
                "source_layers": sources.len(),
                "images": images.len(),
            }),
        )
        .await;

    spinner.stop(&format!(
        "Cleared {} layer(s) and {} image(s)",
        layers.len() + sources.len(),
        images.len()
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EntryCommand, Image, ImageConfig};
    use crate::cache::ManifestKey;
    use crate::layer::{ImageRef, SourceTree};
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.cache.dir = Some(root.to_path_buf());
        config.general.build_log = false;
        config
    }

    #[tokio::test]
    async fn gc_keeps_layers_used_by_images() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        let stores = Stores::open(temp.path()).await.unwrap();

        let used = ManifestKey::from_content(b"flask\n");
        let unused = ManifestKey::from_content(b"django\n");
        for key in [&used, &unused] {
            stores
                .layers
                .get_or_populate(key, "python:3.11-slim", |_| async { Ok(()) })
                .await
                .unwrap();
        }
        stores
            .images
            .save(&Image::new(
                ImageRef::parse("python:3.11-slim").unwrap(),
                used.clone(),
                "sha256:0".to_string(),
                ImageConfig {
                    entry_command: EntryCommand::from_argv(["python", "main.py"]).unwrap(),
                    workdir: "/app".to_string(),
                },
            ))
            .await
            .unwrap();

        // Layers are fresh, so a 1 day cutoff keeps everything
        gc_layers(&stores, &config, Some(1), false).await.unwrap();
        assert_eq!(stores.layers.list().await.unwrap().len(), 2);

        // Backdate both layers past the cutoff
        for key in [&used, &unused] {
            let meta = temp.path().join("layers/deps").join(key.as_str()).join("layer.json");
            let mut value: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&meta).unwrap()).unwrap();
            value["created_at"] = serde_json::json!("2020-01-01T00:00:00Z");
            std::fs::write(&meta, value.to_string()).unwrap();
        }
        let stores = Stores::open(temp.path()).await.unwrap();

        gc_layers(&stores, &config, Some(1), true).await.unwrap();
        assert_eq!(stores.layers.list().await.unwrap().len(), 2);

        gc_layers(&stores, &config, Some(1), false).await.unwrap();
        let left = stores.layers.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, used);
    }

    #[tokio::test]
    async fn gc_keeps_fresh_unreferenced_source_layers() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        let stores = Stores::open(temp.path()).await.unwrap();
        let key = ManifestKey::from_content(b"flask\n");
        let (dep, _) = stores
            .layers
            .get_or_populate(&key, "python:3.11-slim", |_| async { Ok(()) })
            .await
            .unwrap();

        let app = TempDir::new().unwrap();
        std::fs::write(app.path().join("main.py"), "print('old')\n").unwrap();
        let old = stores.sources.copy(&dep, &SourceTree::new(app.path())).await.unwrap();
        std::fs::write(app.path().join("main.py"), "print('new')\n").unwrap();
        let fresh = stores.sources.copy(&dep, &SourceTree::new(app.path())).await.unwrap();

        // A build that just copied its source has not saved its image yet
        gc_layers(&stores, &config, Some(1), false).await.unwrap();
        assert_eq!(stores.sources.list().await.unwrap().len(), 2);

        let meta = old.rootfs.parent().unwrap().join("layer.json");
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&meta).unwrap()).unwrap();
        value["created_at"] = serde_json::json!("2020-01-01T00:00:00Z");
        std::fs::write(&meta, value.to_string()).unwrap();

        gc_layers(&stores, &config, Some(1), false).await.unwrap();
        let left = stores.sources.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].digest, fresh.digest);
    }

    #[test]
    fn grace_covers_recent_and_future_timestamps() {
        assert!(!past_grace(Utc::now()));
        assert!(!past_grace(Utc::now() + chrono::Duration::hours(2)));
        assert!(past_grace(Utc::now() - chrono::Duration::hours(2)));
    }

    #[tokio::test]
    async fn clear_with_yes_removes_everything() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        let stores = Stores::open(temp.path()).await.unwrap();
        let key = ManifestKey::from_content(b"flask\n");
        stores
            .layers
            .get_or_populate(&key, "python:3.11-slim", |_| async { Ok(()) })
            .await
            .unwrap();

        clear_all(&stores, &config, true).await.unwrap();

        assert!(stores.layers.list().await.unwrap().is_empty());
        assert_eq!(stores.layers.state(&key).await.unwrap(), CacheState::Miss);
    }
}
