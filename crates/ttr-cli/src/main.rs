//! TTR CLI - Command-line interface for Transaction Trust Rank
//!
//! Ranks the transaction neighbourhood of seed addresses by crawling a
//! transaction history provider, and inspects stored results.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "ttr")]
#[command(author = "TTR Contributors")]
#[command(version)]
#[command(about = "Transaction Trust Rank over a ledger address neighbourhood", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Working directory holding .ttr/
    #[arg(short = 'C', long, global = true, default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Job parameters given on the command line.
#[derive(Args, Debug, Default)]
pub struct JobArgs {
    /// Seed address to rank around
    #[arg(short, long)]
    pub source: Option<String>,

    /// JSON file with one job or a list of jobs
    #[arg(short, long, conflicts_with = "source")]
    pub jobs: Option<PathBuf>,

    /// Strategy variant (base, weight, time, redirect, price, alpha)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Comma-separated transaction types (external, internal, erc20, erc721)
    #[arg(short, long)]
    pub types: Option<String>,

    #[arg(long)]
    pub alpha: Option<f64>,

    #[arg(long)]
    pub beta: Option<f64>,

    #[arg(long)]
    pub epsilon: Option<f64>,

    #[arg(long)]
    pub start_block: Option<u64>,

    #[arg(long)]
    pub end_block: Option<u64>,

    /// Follow full pages forward instead of accepting them as complete
    #[arg(long)]
    pub auto_page: bool,

    /// Counted retries per fetch before a node is given up
    #[arg(long)]
    pub max_retry: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize TTR in the working directory
    Init {
        /// Provider endpoint
        #[arg(long)]
        base_url: Option<String>,

        /// Provider API key (TTR_API_KEY overrides it at run time)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Crawl and rank the neighbourhood of one or more seed addresses
    Crawl {
        #[command(flatten)]
        job: JobArgs,

        /// Write records as JSON lines to a file, or "-" for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not keep results in the local store
        #[arg(long)]
        no_store: bool,
    },

    /// Show the stored ranking of a job
    Show {
        /// Job key or seed address
        target: String,

        /// Maximum addresses to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Export a stored job's confirmed subgraph and ranking to JSON
    Export {
        /// Job key or seed address
        target: String,

        /// Output file
        #[arg(short, long, default_value = "ttr-graph.json")]
        output: PathBuf,
    },

    /// Show configuration and stored jobs
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { base_url, api_key } => commands::init(&cli.path, base_url, api_key),
        Commands::Crawl {
            job,
            output,
            no_store,
        } => commands::crawl(&cli.path, &job, output.as_deref(), !no_store).await,
        Commands::Show { target, limit } => commands::show(&cli.path, &target, limit),
        Commands::Export { target, output } => commands::export(&cli.path, &target, &output),
        Commands::Status => commands::status(&cli.path),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
