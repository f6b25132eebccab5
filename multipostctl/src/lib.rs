use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use multipost_core::config::{load_multipost_config, load_platforms_config, PlatformsConfig};
use multipost_core::registry::PlatformRegistry;
use multipost_core::MultipostConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

mod commands;

pub use commands::platforms::{PlatformCommands, PlatformListArgs, PlatformListing};
pub use commands::publish::PublishArgs;
pub use commands::request::{RequestCheck, RequestCheckArgs, RequestCommands};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] multipost_core::ConfigError),
    #[error("registry error: {0}")]
    Registry(#[from] multipost_core::RegistryError),
    #[error("browser error: {0}")]
    Browser(#[from] multipost_core::BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid publish request: {0}")]
    InvalidRequest(String),
    #[error("tabs still pending after {0}s")]
    Timeout(u64),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish one piece of content to many platforms", long_about = None)]
pub struct Cli {
    /// Path to the main multipost.toml
    #[arg(long, default_value = "configs/multipost.toml")]
    pub config: PathBuf,
    /// Alternative path to platforms.toml (defaults to the one next to --config)
    #[arg(long)]
    pub platforms_config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Platform registry
    #[command(subcommand)]
    Platforms(PlatformCommands),
    /// Publish request files
    #[command(subcommand)]
    Request(RequestCommands),
    /// Open one tab per platform and fill every composer
    Publish(PublishArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Platforms(PlatformCommands::List(args)) => {
            let listing = commands::platforms::list(&context.registry, args);
            render(&listing, cli.format)?;
        }
        Commands::Request(RequestCommands::Check(args)) => {
            let request = commands::request::read_request(&args.request)?;
            let check = commands::request::check(&context.registry, &request);
            render(&check, cli.format)?;
        }
        Commands::Publish(args) => {
            let request = commands::request::read_request(&args.request)?;
            let request = commands::publish::prepare(request, args);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(commands::publish::publish(
                context.config,
                context.registry,
                request,
                args,
            ))?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: MultipostConfig,
    registry: PlatformRegistry,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_multipost_config(&cli.config)?;
        let platforms_path = cli
            .platforms_config
            .clone()
            .unwrap_or_else(|| sibling(&cli.config, "platforms.toml"));
        let platforms = if cli.platforms_config.is_some() || platforms_path.exists() {
            load_platforms_config(&platforms_path)?
        } else {
            debug!(path = %platforms_path.display(), "no platforms.toml, using built-in platforms only");
            PlatformsConfig::default()
        };
        let registry = PlatformRegistry::with_custom(&platforms)?;
        Ok(Self { config, registry })
    }
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.parent()
        .map(|dir| dir.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}
