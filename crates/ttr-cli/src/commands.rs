//! CLI command implementations.

use crate::JobArgs;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use ttr_core::{Address, JobSpec, TxTypeList};
use ttr_crawl::{
    CrawlConfig, Crawler, EtherscanFetcher, JsonLinesSink, Orchestrator, StoreSink, STATE_DIR,
};
use ttr_graph::{CachedPriceOracle, PriceOracle, ResultStore, StaticPriceTable, TxGraph};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const RESULTS_DIR: &str = "results";

fn results_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(RESULTS_DIR)
}

/// The user-wide config used when a directory has none of its own.
fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ttr").join("config.json"))
}

fn load_config(root: &Path) -> Result<CrawlConfig> {
    let local = CrawlConfig::path_in(root);
    if local.exists() {
        return Ok(CrawlConfig::load(&local)?);
    }
    if let Some(global) = global_config_path().filter(|path| path.exists()) {
        debug!("Using config from {}", global.display());
        return Ok(CrawlConfig::load(&global)?);
    }
    Ok(CrawlConfig::load_or_default(root)?)
}

/// Initialize TTR in a directory.
pub fn init(path: &Path, base_url: Option<String>, api_key: Option<String>) -> Result<()> {
    let config_path = CrawlConfig::path_in(path);

    if config_path.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    let mut config = CrawlConfig::default();
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    config.api_key = api_key;
    config.save(&config_path)?;

    println!("{} Initialized TTR in {}", "✓".green(), path.display());
    println!(
        "  Run {} to rank an address",
        "ttr crawl --source <address>".cyan()
    );

    Ok(())
}

/// Builds job specs from a job file or `--source`, with command-line
/// parameters applied to every job.
pub fn job_specs(args: &JobArgs) -> Result<Vec<JobSpec>> {
    let mut specs = match (&args.jobs, &args.source) {
        (Some(file), _) => JobSpec::parse_many(&fs::read_to_string(file)?)?,
        (None, Some(source)) => vec![JobSpec::for_source(source.as_str())],
        (None, None) => return Err("either --source or --jobs is required".into()),
    };

    for spec in &mut specs {
        if let Some(strategy) = &args.strategy {
            spec.strategy = Some(strategy.clone());
        }
        if let Some(types) = &args.types {
            spec.tx_types = Some(TxTypeList::Joined(types.clone()));
        }
        spec.alpha = args.alpha.or(spec.alpha);
        spec.beta = args.beta.or(spec.beta);
        spec.epsilon = args.epsilon.or(spec.epsilon);
        spec.start_block = args.start_block.or(spec.start_block);
        spec.end_block = args.end_block.or(spec.end_block);
        spec.max_retry = args.max_retry.or(spec.max_retry);
        if args.auto_page {
            spec.auto_paginate = Some(true);
        }
    }
    Ok(specs)
}

/// Crawl the jobs and rank their neighbourhoods.
pub async fn crawl(root: &Path, args: &JobArgs, output: Option<&Path>, keep: bool) -> Result<()> {
    let config = load_config(root)?;
    let specs = job_specs(args)?;

    let mut orchestrator = Orchestrator::new().with_rate_limit_delay(config.rate_limit_backoff());
    let mut oracle = None;
    if let Some(table) = &config.price_table {
        let table = if table.is_absolute() {
            table.clone()
        } else {
            root.join(table)
        };
        let prices = Arc::new(CachedPriceOracle::new(StaticPriceTable::load(&table)?));
        orchestrator = orchestrator.with_price_oracle(Arc::clone(&prices) as Arc<dyn PriceOracle>);
        oracle = Some(prices);
    }
    let tasks = orchestrator.accept(specs)?.len();
    println!("{} Accepted {} job(s)", "✓".green(), tasks.to_string().cyan());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Fetching seed transactions...");

    let progress = spinner.clone();
    let crawler = Crawler::new(EtherscanFetcher::new(&config)?, orchestrator)
        .with_max_concurrent_requests(config.max_concurrent_requests)
        .with_observer(move |summary| {
            progress.set_message(format!(
                "{} fetches, {} edges confirmed, {}/{} jobs done",
                summary.fetches, summary.confirmed_edges, summary.tasks_finished, tasks
            ));
        });

    let store = if keep {
        Some(ResultStore::open(results_path(root))?)
    } else {
        None
    };
    let lines: Option<JsonLinesSink<Box<dyn Write>>> = match output {
        None => None,
        Some(path) if path == Path::new("-") => Some(JsonLinesSink::new(Box::new(io::stdout()))),
        Some(path) => Some(JsonLinesSink::new(Box::new(BufWriter::new(File::create(path)?)))),
    };
    let mut sink = (store.as_ref().map(StoreSink::new), lines);

    let summary = crawler.run(&mut sink).await?;
    spinner.finish_and_clear();
    if let Some(oracle) = &oracle {
        debug!("{} distinct price lookups served", oracle.cached());
    }

    println!(
        "{} Ranked {} job(s): {} nodes resolved, {} fused, {} edges confirmed",
        "✓".green(),
        summary.tasks_finished.to_string().cyan(),
        summary.nodes_resolved.to_string().cyan(),
        summary.nodes_fused,
        summary.confirmed_edges.to_string().cyan()
    );
    if summary.failed_fetches > 0 {
        println!(
            "  {} {} fetches failed and were retried, split or given up",
            "⚠".yellow(),
            summary.failed_fetches
        );
    }
    if keep {
        println!("  Run {} to see the ranking", "ttr show <address>".cyan());
    }

    Ok(())
}

/// Resolves a job key or seed address to a stored job key.
fn find_job(store: &ResultStore, target: &str) -> Result<String> {
    let keys = store.job_keys()?;
    if keys.iter().any(|key| key == target) {
        return Ok(target.to_string());
    }

    let prefix = format!("{}/", Address::new(target));
    let matches: Vec<&String> = keys.iter().filter(|key| key.starts_with(&prefix)).collect();
    match matches.as_slice() {
        [] => Err(format!("no stored results for {}", target).into()),
        [key] => Ok((*key).clone()),
        many => {
            let listed: Vec<&str> = many.iter().map(|key| key.as_str()).collect();
            Err(format!(
                "{} matches several jobs, use one of: {}",
                target,
                listed.join(", ")
            )
            .into())
        }
    }
}

fn open_store(root: &Path) -> Result<ResultStore> {
    let path = results_path(root);
    if !path.exists() {
        return Err(format!("no results in {}; run `ttr crawl` first", root.display()).into());
    }
    Ok(ResultStore::open(path)?)
}

/// Print the stored ranking of a job.
pub fn show(root: &Path, target: &str, limit: usize) -> Result<()> {
    let store = open_store(root)?;
    let key = find_job(&store, target)?;
    let snapshot = store
        .load_snapshot(&key)?
        .ok_or_else(|| format!("job {} has no ranking yet", key))?;

    let graph = TxGraph::from_edges(&store.load_edges(&key)?);

    let job = &snapshot.job;
    println!(
        "{} {} ({}, blocks {}-{})",
        "Ranking for".cyan().bold(),
        job.source,
        job.strategy.as_str(),
        job.range.start,
        job.range.end
    );
    println!();

    for (rank, (address, score)) in snapshot.importance.iter().take(limit).enumerate() {
        let marker = if *address == job.source { "*" } else { " " };
        println!(
            "  {:>3}. {}{} {} {}",
            rank + 1,
            address,
            marker.yellow(),
            format!("{:.6}", score).as_str().dimmed(),
            format!("({} counterparties)", graph.counterparties(address).len())
                .as_str()
                .dimmed()
        );
    }
    if snapshot.importance.len() > limit {
        println!("  ... and {} more", snapshot.importance.len() - limit);
    }

    Ok(())
}

/// Export a job's confirmed subgraph and ranking to JSON.
pub fn export(root: &Path, target: &str, output: &Path) -> Result<()> {
    let store = open_store(root)?;
    let key = find_job(&store, target)?;
    let snapshot = store
        .load_snapshot(&key)?
        .ok_or_else(|| format!("job {} has no ranking yet", key))?;
    let edges = store.load_edges(&key)?;
    let graph = TxGraph::from_edges(&edges);

    let importance: Vec<_> = snapshot
        .importance
        .iter()
        .map(|(address, score)| {
            serde_json::json!({
                "address": address,
                "score": score,
                "counterparties": graph.counterparties(address),
            })
        })
        .collect();
    let export = serde_json::json!({
        "version": "1.0",
        "job": snapshot.job,
        "stats": graph.stats(),
        "importance": importance,
        "edges": graph.export_edges()
    });

    fs::write(output, serde_json::to_string_pretty(&export)?)?;
    println!("{} Exported to {}", "✓".green(), output.display());

    Ok(())
}

/// Show configuration and stored jobs.
pub fn status(root: &Path) -> Result<()> {
    let config_path = CrawlConfig::path_in(root);
    if !config_path.exists() {
        println!("{} TTR not initialized in this directory", "✗".red());
        println!("  Run {} to initialize", "ttr init".cyan());
        return Ok(());
    }
    let config = load_config(root)?;

    println!("{}", "TTR Status".cyan().bold());
    println!();
    println!("  {} {}", "Provider:".dimmed(), config.base_url);
    println!(
        "  {} {}",
        "API key:".dimmed(),
        if config.api_key.is_some() { "set" } else { "not set" }
    );
    println!(
        "  {} {}",
        "Concurrency:".dimmed(),
        config.max_concurrent_requests
    );

    let results = results_path(root);
    if !results.exists() {
        println!("  {} none", "Jobs:".dimmed());
        return Ok(());
    }
    let store = ResultStore::open(results)?;
    let keys = store.job_keys()?;
    println!("  {} {}", "Jobs:".dimmed(), keys.len());
    for key in keys {
        let ranked = store
            .load_snapshot(&key)?
            .map(|snapshot| snapshot.importance.len())
            .unwrap_or(0);
        let edges = store.load_edges(&key)?.len();
        println!("    {} ({} ranked, {} edges)", key, ranked, edges);
    }

    Ok(())
}
