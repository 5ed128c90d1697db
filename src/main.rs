//! Strata - cache-aware layered image builder
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use strata::cli::{Cli, Commands};
use strata::config::{Config, ConfigManager};
use strata::error::{StrataError, StrataResult};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(step) = e.failed_step() {
                eprintln!("{} {}", style("Failed step:").dim(), step);
            }
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Map a process exit code onto the range the OS accepts
fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

fn init_logging(verbose: u8, config: &Config) {
    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match verbose {
        0 => EnvFilter::new("strata=warn"),
        1 => EnvFilter::new("strata=info"),
        _ => EnvFilter::new("strata=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.with_target(false).without_time().init();
    }
}

async fn run() -> StrataResult<i32> {
    let cli = Cli::parse();

    // Init command doesn't need config loading
    if let Commands::Init(args) = cli.command {
        init_logging(cli.verbose, &Config::default());
        return strata::cli::commands::init(args).await.map(|()| 0);
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config in the build context (or cwd) unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let dir = match cli.command.context_dir() {
            Some(context) => context.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|e| StrataError::io("getting current directory", e))?,
        };
        ConfigManager::find_local_config(&dir)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    match local_config_path {
        Some(ref path) => debug!("Merged local config: {}", path.display()),
        None if cli.no_local => debug!("Local config discovery disabled (--no-local)"),
        None => {}
    }

    use strata::cli::commands;
    match cli.command {
        Commands::Init(_) => unreachable!("Init handled above"),
        Commands::Build(args) => commands::build(args, &config).await.map(|()| 0),
        Commands::Run(args) => commands::run(args, &config).await,
        Commands::Images(args) => commands::images(args, &config).await.map(|()| 0),
        Commands::Cache(args) => commands::cache(args, &config).await.map(|()| 0),
        Commands::Config(args) => commands::config(args, &config, &config_manager)
            .await
            .map(|()| 0),
    }
}
