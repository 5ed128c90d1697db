//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Strata - cache-aware layered container image builder
///
/// Builds container images as base + dependency layer + source layer,
/// reinstalling dependencies only when the manifest changes.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local strata.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an image from a context directory
    Build(BuildArgs),

    /// Run a built image
    Run(RunArgs),

    /// List, inspect and remove built images
    Images(ImagesArgs),

    /// Manage the dependency layer cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Initialize a project-local strata.toml
    Init(InitArgs),
}

impl Commands {
    /// Build context named on the command line, if the command takes one
    pub fn context_dir(&self) -> Option<&Path> {
        match self {
            Commands::Build(args) => args.context.as_deref(),
            Commands::Cache(CacheArgs {
                action: CacheAction::Info { context, .. },
            }) => context.as_deref(),
            _ => None,
        }
    }
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Context directory holding the manifest and sources (defaults to current directory)
    pub context: Option<PathBuf>,

    /// Base image (e.g. python:3.11-slim)
    #[arg(short, long)]
    pub base: Option<String>,

    /// Dependency manifest, relative to the context
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Working directory inside the image
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Extra paths to leave out of the source layer (repeatable)
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Print only the image id
    #[arg(short, long)]
    pub quiet: bool,

    /// Entry command and arguments (defaults to config)
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Image id, unique id prefix or strata-<id> tag
    pub image: String,
}

/// Arguments for the images command
#[derive(Parser, Debug)]
pub struct ImagesArgs {
    /// Subcommand for images
    #[command(subcommand)]
    pub action: ImagesAction,
}

/// Images subcommands
#[derive(Subcommand, Debug)]
pub enum ImagesAction {
    /// List built images
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show an image record as JSON
    Inspect {
        /// Image id, unique id prefix or tag
        image: String,
    },

    /// Remove an image record and its runtime image
    Rm {
        /// Image id, unique id prefix or tag
        image: String,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing strata.toml
    #[arg(short, long)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List dependency layers
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show whether a context's manifest is cached
    Info {
        /// Context directory (defaults to current directory)
        context: Option<PathBuf>,

        /// Dependency manifest, relative to the context
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Remove old layers and abandoned staging directories
    Gc {
        /// Remove layers older than N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every dependency and source layer
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
