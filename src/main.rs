//! Notice-Harvest main entry point
//!
//! This is the command-line interface for the Notice-Harvest crawler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use notice_harvest::config::{load_config_with_hash, Config};
use notice_harvest::crawler::{BatchCrawler, FetchExecutor, FetchOutcome, HttpRenderer};
use notice_harvest::dedup::connect_dedup;
use notice_harvest::queue::{
    batch_crawl_async, discover_targets, exit_code, run_job, JobMonitor, JobProducer,
    ProcessIsolation, RedisJobStore, Worker,
};
use notice_harvest::storage::open_sink;
use notice_harvest::time::SystemClock;
use notice_harvest::PolicyEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Extra time the worker grants a job process past its own timeout
const KILL_GRACE: Duration = Duration::from_secs(60);

/// Notice-Harvest: a polite notice and article harvester
///
/// Crawls list pages of configured sources, fetches every detail page
/// under allow-list, robots.txt and adaptive-delay rules, and stores the
/// extracted records in SQLite. Crawls run in-process or through a Redis
/// job queue served by isolated workers.
#[derive(Parser, Debug)]
#[command(name = "notice-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A polite notice and article harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a list page in this process
    Crawl {
        #[arg(value_name = "LIST_URL")]
        list_url: String,

        /// Source type name from the configuration
        #[arg(short, long)]
        source: String,
    },

    /// Crawl a list page through the job queue
    Enqueue {
        #[arg(value_name = "LIST_URL")]
        list_url: String,

        /// Source type name from the configuration
        #[arg(short, long)]
        source: String,

        /// Submit jobs and exit without waiting for results
        #[arg(long)]
        no_wait: bool,
    },

    /// Consume jobs from the queue
    Worker {
        /// Exit once the queue is empty
        #[arg(long)]
        burst: bool,
    },

    /// Run a single job (started by the worker)
    #[command(hide = true)]
    RunJob {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Validate the configuration and show what it sets up
    Check,

    /// Show statistics from the database
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::debug!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", config_hash);

    match cli.command {
        Command::Crawl { list_url, source } => handle_crawl(config, &list_url, &source).await,
        Command::Enqueue {
            list_url,
            source,
            no_wait,
        } => handle_enqueue(config, &list_url, &source, no_wait).await,
        Command::Worker { burst } => {
            handle_worker(&config, &cli.config, cli.verbose, cli.quiet, burst).await
        }
        Command::RunJob { id } => handle_run_job(&config, &id).await,
        Command::Check => handle_check(&config, &config_hash),
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("notice_harvest=info,warn"),
            1 => EnvFilter::new("notice_harvest=debug,info"),
            2 => EnvFilter::new("notice_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the crawl command: discover, fetch and store in-process
async fn handle_crawl(config: Config, list_url: &str, source: &str) -> anyhow::Result<()> {
    let dedup = connect_dedup(&config.dedup).await;
    let executor = FetchExecutor::from_config(Arc::new(config))?;
    let crawler = BatchCrawler::new(Arc::new(executor), dedup);

    let outcomes = crawler.run(list_url, source).await;
    print_outcomes(&outcomes);
    Ok(())
}

/// Handles the enqueue command: submit jobs and optionally wait for them
async fn handle_enqueue(
    config: Config,
    list_url: &str,
    source: &str,
    no_wait: bool,
) -> anyhow::Result<()> {
    let queue = config.queue.clone();
    let renderer = HttpRenderer::new(&config.crawler)?;
    let policy = Arc::new(PolicyEngine::new(Arc::new(config)));

    let store = match RedisJobStore::connect(&queue.redis_url, &queue.queue_name).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Job queue unavailable, cannot crawl asynchronously: {}", e);
            print_outcomes(&[]);
            return Ok(());
        }
    };
    let producer = JobProducer::new(policy, store.clone());

    if no_wait {
        let targets = discover_targets(producer.policy(), &renderer, list_url, source).await;
        let handles = producer.submit(&targets).await?;
        for handle in &handles {
            println!("{}  {}", handle.id, handle.target.url);
        }
        println!("\n✓ {} jobs enqueued on '{}'", handles.len(), queue.queue_name);
        return Ok(());
    }

    let monitor = JobMonitor::new(store, Duration::from_secs(queue.monitor_interval_secs));
    let outcomes = batch_crawl_async(
        &producer,
        &monitor,
        &renderer,
        list_url,
        source,
        Duration::from_secs(queue.monitor_timeout_secs),
    )
    .await;

    print_outcomes(&outcomes);
    Ok(())
}

/// Handles the worker command: poll the queue until interrupted
async fn handle_worker(
    config: &Config,
    config_path: &Path,
    verbose: u8,
    quiet: bool,
    burst: bool,
) -> anyhow::Result<()> {
    let queue = &config.queue;
    let store = RedisJobStore::connect(&queue.redis_url, &queue.queue_name).await?;

    let mut isolation = ProcessIsolation::current_exe()?
        .arg(config_path.as_os_str())
        .with_kill_after(Duration::from_secs(queue.job_timeout_secs) + KILL_GRACE);
    if quiet {
        isolation = isolation.arg("-q");
    } else if verbose > 0 {
        isolation = isolation.arg(format!("-{}", "v".repeat(verbose as usize)));
    }

    let worker = Worker::new(
        Arc::new(store),
        Arc::new(isolation),
        Duration::from_millis(queue.poll_interval_ms),
    );

    tracing::info!(queue = %queue.queue_name, burst, "Worker started");

    if burst {
        worker.run_burst().await?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping after the current job");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

/// Handles the hidden run-job command inside an isolated job process
///
/// Exits 0 whenever the job's state was written back, whatever that state.
async fn handle_run_job(config: &Config, id: &str) -> anyhow::Result<()> {
    let queue = &config.queue;

    let store = match RedisJobStore::connect(&queue.redis_url, &queue.queue_name).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(job = %id, "Job process cannot reach the queue: {}", e);
            std::process::exit(exit_code(&e));
        }
    };

    match run_job(&store, id, &SystemClock, FetchExecutor::from_config).await {
        Ok(status) => {
            tracing::debug!(job = %id, status = %status, "Job process done");
            Ok(())
        }
        Err(e) => {
            tracing::error!(job = %id, "Job could not be run: {}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// Handles the check command: validates config and shows what it sets up
fn handle_check(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    println!("=== Notice-Harvest Configuration ===\n");

    println!("Crawler:");
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Fetch retries: {}", config.crawler.max_retries);
    println!("  Retry pause: {}s", config.crawler.retry_pause_secs);
    println!(
        "  Timeouts: navigation {}s, robots.txt {}s, elements {}s",
        config.crawler.navigation_timeout_secs,
        config.crawler.robots_timeout_secs,
        config.crawler.element_timeout_secs
    );

    let delay = &config.delay;
    println!("\nDelay:");
    println!(
        "  Normal: {:.1}-{:.1}s, peak: {:.1}-{:.1}s, bounds: {:.1}-{:.1}s",
        delay.normal_range.0,
        delay.normal_range.1,
        delay.peak_range.0,
        delay.peak_range.1,
        delay.min_delay,
        delay.max_delay
    );
    for window in &delay.peak_hours {
        println!("  Peak window: {}-{}", window.start, window.end);
    }

    println!("\nDedup: {} (ttl {} days)", config.dedup.redis_url, config.dedup.url_expire_days);
    println!(
        "Queue: {} '{}' ({} retries every {}s, job timeout {}s)",
        config.queue.redis_url,
        config.queue.queue_name,
        config.queue.max_task_retries,
        config.queue.task_retry_interval_secs,
        config.queue.job_timeout_secs
    );
    println!("Database: {}", config.output.database_path);

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!("  - {}", source.name);
        for entry in &source.allowed_domains {
            println!("    * {}", entry);
        }
    }

    println!("\n✓ Configuration is valid (hash: {})", config_hash);
    Ok(())
}

/// Handles the stats command: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let sink = open_sink(Path::new(&config.output.database_path))?;
    let counts = sink.count_by_status()?;

    println!("Records: {}", counts.succeeded + counts.failed);
    println!("  Succeeded: {}", counts.succeeded);
    println!("  Failed: {}", counts.failed);

    println!("\nBy source:");
    for (source, count) in sink.count_by_source()? {
        println!("  {}: {}", source, count);
    }

    Ok(())
}

fn print_outcomes(outcomes: &[FetchOutcome]) {
    let succeeded = outcomes.iter().filter(|o| o.success).count();

    for outcome in outcomes {
        match (&outcome.payload, &outcome.error_message) {
            (Some(record), _) => println!("✓ {}  {}", record.publish_time, record.title),
            (None, Some(error)) => println!("✗ {}  {}", outcome.target.url, error),
            (None, None) => println!("✓ {}", outcome.target.url),
        }
    }

    println!(
        "\n{} outcomes, {} succeeded, {} failed",
        outcomes.len(),
        succeeded,
        outcomes.len() - succeeded
    );
}
