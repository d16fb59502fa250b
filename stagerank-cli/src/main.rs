//! stagerank CLI: run retrieval queries against a JSON corpus and inspect configuration.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// stagerank: multi-stage document retrieval from the command line
#[derive(Parser, Debug)]
#[command(name = "stagerank", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit stderr logs as JSON instead of human-readable lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Load a corpus and run one or more queries through the pipeline
    Query(QueryArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// JSON file holding an array of documents (`id`, `content`, optional `metadata`)
    #[arg(long)]
    corpus: PathBuf,

    /// Query text; repeat to run several queries against the same retriever
    #[arg(short = 'q', long = "query", required = true)]
    queries: Vec<String>,

    /// Number of documents to return
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Metadata filter as key=value (value parsed as JSON, falling back to a string)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Skip cache lookups and writes
    #[arg(long)]
    no_cache: bool,

    /// Disable a stage for this request
    #[arg(long = "disable", value_enum)]
    disabled: Vec<StageArg>,

    /// Print retriever statistics after the queries
    #[arg(long)]
    stats: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StageArg {
    Recall,
    PreRank,
    ReRank,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to a file
    Init {
        /// Destination path
        #[arg(default_value = "stagerank.toml")]
        path: PathBuf,
    },
    /// Show the effective configuration as TOML
    Show,
    /// Load and validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = if cli.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::new(filter))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::new(filter))
            .boxed()
    };

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "stagerank", "stagerank")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stagerank.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, cli.config.as_deref()).await
}
