//! bid-crawler CLI
//!
//! `crawl` runs once, `schedule` keeps running on interval/cron, `status`
//! prints the checkpoint, `reset` clears it. Exit code 0 on success, 1 when
//! a crawl collected nothing, non-zero on infrastructural failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use bid_crawler::crawling::{CrawlOrchestrator, CrawlScheduler, generate_run_id, shutdown_signal};
use bid_crawler::domain::repositories::BidRepository;
use bid_crawler::infrastructure::browser::HttpBrowserSession;
use bid_crawler::infrastructure::config::{CrawlerConfig, OutputFormat, SchedulerMode, SelectorConfig};
use bid_crawler::infrastructure::csv_repository::{CompositeRepository, CsvRepository};
use bid_crawler::infrastructure::http_client::{HttpClient, HttpClientConfig};
use bid_crawler::infrastructure::json_repository::{JsonRepository, JsonRepositoryOptions};
use bid_crawler::infrastructure::logging::init_logging;
use bid_crawler::infrastructure::metrics::CrawlerMetrics;
use bid_crawler::infrastructure::robots::RobotsChecker;
use bid_crawler::infrastructure::state_manager::StateManager;
use bid_crawler::scrapers::{BidDetailScraper, BidListScraper};

#[derive(Parser)]
#[command(name = "bid-crawler", version, about = "나라장터 입찰공고 크롤러")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
    Both,
}

#[derive(Subcommand)]
enum Command {
    /// Run one crawl
    Crawl {
        /// Maximum list pages to scan
        #[arg(short = 'p', long)]
        max_pages: Option<u32>,
        /// Maximum items to collect
        #[arg(short = 'n', long)]
        max_items: Option<u64>,
        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,
        /// Run the browser headless
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        headless: bool,
        /// Resume from the previous checkpoint
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        resume: bool,
        /// Only collect notices whose title contains this keyword
        #[arg(short, long)]
        keyword: Option<String>,
    },
    /// Run crawls periodically
    Schedule {
        /// interval or cron
        #[arg(long)]
        mode: Option<String>,
        /// Interval in minutes (interval mode)
        #[arg(long)]
        interval: Option<u64>,
        /// Cron expression "min hour day month weekday" (cron mode)
        #[arg(long)]
        cron: Option<String>,
        /// Run once immediately before the first tick
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        immediate: bool,
    },
    /// Show the current checkpoint
    Status,
    /// Delete the checkpoint so the next crawl starts fresh
    Reset,
}

struct Components {
    orchestrator: Arc<CrawlOrchestrator>,
}

async fn build_components(config: CrawlerConfig) -> Result<Components> {
    config.validate().context("invalid configuration")?;
    config.ensure_directories()?;

    let selectors = match &config.selectors_file {
        Some(path) if path.exists() => SelectorConfig::load(path)?,
        _ => SelectorConfig::default(),
    };

    let repository: Arc<dyn BidRepository> = match config.storage.output_format {
        OutputFormat::Json => Arc::new(
            JsonRepository::open(&config.storage.data_dir, JsonRepositoryOptions::default()).await?,
        ),
        OutputFormat::Csv => {
            Arc::new(CsvRepository::open(config.storage.data_dir.join("bid_notices.csv"), false).await?)
        }
        OutputFormat::Both => {
            let json =
                JsonRepository::open(&config.storage.data_dir, JsonRepositoryOptions::default()).await?;
            let csv = CsvRepository::open(config.storage.data_dir.join("bid_notices.csv"), false).await?;
            Arc::new(CompositeRepository::new(vec![Box::new(json), Box::new(csv)]))
        }
    };

    let http_config = HttpClientConfig {
        user_agent: config.browser.user_agent.clone(),
        timeout: std::time::Duration::from_millis(config.browser.timeout_ms),
        ..HttpClientConfig::default()
    };

    let state = Arc::new(StateManager::new(&config.storage.state_file));
    let metrics = Arc::new(
        CrawlerMetrics::new(&config.monitoring.metrics_namespace).context("metric registration failed")?,
    );

    let list_scraper = Arc::new(
        BidListScraper::new(selectors.list.clone())
            .with_keyword(config.keyword.clone())
            .with_bid_type(config.bid_type.clone()),
    );
    let detail_scraper = Arc::new(BidDetailScraper::new(selectors.detail.clone()));

    let cancel = tokio_util::sync::CancellationToken::new();
    let browser = Arc::new(HttpBrowserSession::new(&http_config, cancel)?);

    let mut orchestrator = CrawlOrchestrator::new(
        config.clone(),
        browser,
        list_scraper,
        detail_scraper,
        repository,
        state,
        metrics,
    );
    if config.robots.enabled {
        let robots_client = Arc::new(HttpClient::new(&http_config)?);
        orchestrator = orchestrator.with_robots(Arc::new(RobotsChecker::new(
            robots_client,
            config.browser.user_agent.clone(),
        )));
    }

    Ok(Components {
        orchestrator: Arc::new(orchestrator),
    })
}

async fn cmd_crawl(config: CrawlerConfig, resume: bool) -> Result<ExitCode> {
    let components = build_components(config).await?;
    let orchestrator = components.orchestrator;

    {
        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("interrupt received, draining");
            cancel.cancel();
        });
    }

    let state = orchestrator.run(&generate_run_id(), resume).await?;
    let stats = &state.statistics;
    println!(
        "collected {} notices ({} details, {} errors, {} duplicates skipped, success rate {:.1}%)",
        stats.total_collected,
        stats.detail_collected,
        stats.errors,
        stats.skipped_duplicates,
        stats.success_rate()
    );

    if stats.total_collected == 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_schedule(config: CrawlerConfig, immediate: bool) -> Result<ExitCode> {
    let scheduler_config = config.scheduler.clone();
    let components = build_components(config).await?;
    let scheduler = CrawlScheduler::new(scheduler_config, components.orchestrator)?;
    scheduler.run_forever(immediate).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_status(config: CrawlerConfig) -> Result<ExitCode> {
    let state_manager = StateManager::new(&config.storage.state_file);
    match state_manager.load().await {
        Some(state) => {
            println!("run_id:         {}", state.run_id);
            println!("started_at:     {}", state.started_at.to_rfc3339());
            println!("last_updated:   {}", state.last_updated_at.to_rfc3339());
            println!("completed:      {}", state.is_completed);
            println!(
                "progress:       page {}/{} (index {}, last completed page {})",
                state.progress.current_page,
                state
                    .progress
                    .total_pages
                    .map_or_else(|| "?".to_string(), |v| v.to_string()),
                state.progress.current_index,
                state.progress.last_completed_page
            );
            println!(
                "statistics:     {} collected, {} errors, {} retries, {} duplicates skipped",
                state.statistics.total_collected,
                state.statistics.errors,
                state.statistics.retries,
                state.statistics.skipped_duplicates
            );
            if let Some(last_error) = &state.last_error {
                println!("last_error:     {last_error}");
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("no checkpoint at {:?}", config.storage.state_file);
            Ok(ExitCode::from(1))
        }
    }
}

async fn cmd_reset(config: CrawlerConfig) -> Result<ExitCode> {
    let state_manager = StateManager::new(&config.storage.state_file);
    state_manager.cleanup().await?;
    println!("checkpoint cleared");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = CrawlerConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Crawl {
            max_pages,
            max_items,
            output_dir,
            format,
            headless,
            resume,
            keyword,
        } => {
            if max_pages.is_some() {
                config.max_pages = max_pages;
            }
            if max_items.is_some() {
                config.max_items = max_items;
            }
            if let Some(dir) = output_dir {
                config.storage.state_file = dir.join("crawl_state.json");
                config.storage.data_dir = dir;
            }
            if let Some(format) = format {
                config.storage.output_format = match format {
                    FormatArg::Json => OutputFormat::Json,
                    FormatArg::Csv => OutputFormat::Csv,
                    FormatArg::Both => OutputFormat::Both,
                };
            }
            config.browser.headless = headless;
            if keyword.is_some() {
                config.keyword = keyword;
            }
            cmd_crawl(config, resume).await
        }
        Command::Schedule {
            mode,
            interval,
            cron,
            immediate,
        } => {
            config.scheduler.enabled = true;
            if let Some(mode) = mode {
                config.scheduler.mode = match mode.to_lowercase().as_str() {
                    "cron" => SchedulerMode::Cron,
                    _ => SchedulerMode::Interval,
                };
            }
            if let Some(interval) = interval {
                config.scheduler.interval_minutes = interval;
            }
            if let Some(cron) = cron {
                config.scheduler.cron_expression = cron;
            }
            cmd_schedule(config, immediate).await
        }
        Command::Status => cmd_status(config).await,
        Command::Reset => cmd_reset(config).await,
    }
}
