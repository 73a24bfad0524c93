use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use guardrail::config::Config;
use guardrail::phase::Intent;

mod cmd;

#[derive(Parser)]
#[command(name = "guardrail")]
#[command(version, about = "Phase-gated guardrails for coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Index the repository into the Forest
    Sync,
    /// Query the Map and the Forest
    Search {
        query: String,
        /// Print the raw JSON outcome
        #[arg(long)]
        json: bool,
    },
    /// Show index, archive and isolation state
    Status,
    /// Remove overlays, branches and locks left by crashed sessions
    Cleanup {
        /// List what would be removed without touching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Run a session: JSON tool calls on stdin, JSON responses on stdout
    Session(SessionArgs),
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default guardrail.toml
    Init,
}

#[derive(clap::Args, Clone)]
pub struct SessionArgs {
    /// implement, modify, investigate or question
    #[arg(long)]
    pub intent: Intent,

    /// The raw user request
    #[arg(long)]
    pub request: String,

    /// Query frame slot as name=quote (repeatable)
    #[arg(long = "slot", value_name = "NAME=QUOTE")]
    pub slots: Vec<String>,

    /// Skip the impact analysis phase
    #[arg(long)]
    pub no_impact: bool,

    /// Forbid creating files that do not exist yet
    #[arg(long)]
    pub no_new_files: bool,

    /// Do not sync a stale index before starting
    #[arg(long)]
    pub no_sync: bool,
}

fn init_logging(cli: &Cli, config: &Config) -> Option<WorkerGuard> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("GUARDRAIL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("guardrail={}", default_level)));
    let json = cli.log_json || config.settings.logging.json;

    let (file_writer, guard) = if config.settings.logging.file {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "guardrail.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(writer), Some(guard))
    } else {
        (None, None)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = match (json, file_writer) {
        (true, Some(file)) => builder
            .json()
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (true, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, Some(file)) => builder
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (false, None) => builder.with_writer(std::io::stderr).try_init(),
    };
    if let Err(e) = result {
        eprintln!("failed to initialise logging: {}", e);
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose)?;
    let _log_guard = init_logging(&cli, &config);

    match &cli.command {
        Commands::Sync => cmd::cmd_sync(config).await?,
        Commands::Search { query, json } => cmd::cmd_search(config, query, *json).await?,
        Commands::Status => cmd::cmd_status(config)?,
        Commands::Cleanup { dry_run } => cmd::cmd_cleanup(config, *dry_run)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Session(args) => cmd::cmd_session(config, args.clone()).await?,
    }

    Ok(())
}
