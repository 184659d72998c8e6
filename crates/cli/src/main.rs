use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use codefam_ingest::ServiceConfig;
use std::path::PathBuf;

mod commands;
mod flags;
mod input;

use flags::FamilyScope;

#[derive(Parser)]
#[command(name = "codefam")]
#[command(about = "Incremental code-family clustering for smart-contract sources", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Checkpoint directory (overrides config and CODEFAM_CHECKPOINT_DIR)
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    /// Similarity threshold in (0, 100] (overrides config and CODEFAM_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Ingestion workers (overrides config and CODEFAM_WORKERS)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Print compact single-line JSON
    #[arg(long, global = true)]
    compact: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion service over a spool directory
    Run(RunArgs),

    /// Ingest JSON-lines items (`{"raw_text": ..., "metadata": ...}`) once
    Ingest(IngestArgs),

    /// List families from the latest checkpoint
    Families(FamiliesArgs),

    /// Family similarity graph from the latest checkpoint
    Graph(GraphArgs),

    /// Registry statistics from the latest checkpoint
    Stats,

    /// Similarity of two source files
    Compare(CompareArgs),

    /// Evict stale singleton families from the checkpoint
    Purge(PurgeArgs),
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Spool directory holding one `*.json` item per artifact
    #[arg(long)]
    pub(crate) spool: PathBuf,

    /// Exit once the spool is empty instead of waiting for more items
    #[arg(long)]
    pub(crate) drain: bool,

    /// Rescan interval of an empty spool in milliseconds
    #[arg(long, default_value_t = 500)]
    pub(crate) poll_ms: u64,
}

#[derive(Args)]
pub(crate) struct IngestArgs {
    /// JSON-lines file, or `-` for stdin
    pub(crate) input: PathBuf,
}

#[derive(Args)]
pub(crate) struct FamiliesArgs {
    /// Include singleton families
    #[arg(long)]
    pub(crate) all: bool,

    /// Maximum families to print
    #[arg(long)]
    pub(crate) limit: Option<usize>,
}

#[derive(Args)]
pub(crate) struct GraphArgs {
    /// Minimum representative similarity for an edge
    #[arg(long, default_value_t = 50.0)]
    pub(crate) min_score: f64,

    /// Which families become nodes
    #[arg(long, value_enum, default_value_t = FamilyScope::Recurring)]
    pub(crate) scope: FamilyScope,
}

#[derive(Args)]
pub(crate) struct CompareArgs {
    pub(crate) a: PathBuf,
    pub(crate) b: PathBuf,
}

#[derive(Args)]
pub(crate) struct PurgeArgs {
    /// Retention window; defaults to the configured `purge.retention_secs`
    #[arg(long)]
    pub(crate) retention_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = resolve_config(&cli)?;
    let output = commands::Output {
        compact: cli.compact,
    };

    match cli.command {
        Commands::Run(args) => commands::run(args, config, output).await?,
        Commands::Ingest(args) => commands::ingest(args, config, output).await?,
        Commands::Families(args) => commands::families(args, &config, output).await?,
        Commands::Graph(args) => commands::graph(args, &config, output).await?,
        Commands::Stats => commands::stats(&config, output).await?,
        Commands::Compare(args) => commands::compare(args, &config, output)?,
        Commands::Purge(args) => commands::purge(args, &config, output).await?,
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config {}", path.display()),
        None => "Failed to load config".to_string(),
    })?;

    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoint.dir = dir.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.registry.threshold = threshold;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
