//! Crawl orchestrator
//!
//! Owns the lifecycle of one run: checkpoint initialization, browser
//! session, the bounded task queue, the producer and the consumer workers,
//! draining via shutdown sentinels, and the unconditional shutdown path
//! (repository flush, forced checkpoint save, browser close, summary).

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crawling::consumer::ItemProcessor;
use crate::crawling::producer::{NavigatorOptions, PageNavigator};
use crate::crawling::tasks::WorkItem;
use crate::domain::crawl_state::CrawlState;
use crate::domain::repositories::BidRepository;
use crate::errors::CrawlerError;
use crate::infrastructure::browser::BrowserSession;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::metrics::CrawlerMetrics;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::robots::RobotsChecker;
use crate::infrastructure::state_manager::StateManager;
use crate::scrapers::{DetailScraper, ListScraper};

/// Wall-clock grace given to in-flight tasks after draining starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Coordinates one crawl run end to end.
pub struct CrawlOrchestrator {
    config: CrawlerConfig,
    browser: Arc<dyn BrowserSession>,
    list_scraper: Arc<dyn ListScraper>,
    detail_scraper: Arc<dyn DetailScraper>,
    repository: Arc<dyn BidRepository>,
    state: Arc<StateManager>,
    metrics: Arc<CrawlerMetrics>,
    robots: Option<Arc<RobotsChecker>>,
    cancel: CancellationToken,
}

impl CrawlOrchestrator {
    pub fn new(
        config: CrawlerConfig,
        browser: Arc<dyn BrowserSession>,
        list_scraper: Arc<dyn ListScraper>,
        detail_scraper: Arc<dyn DetailScraper>,
        repository: Arc<dyn BidRepository>,
        state: Arc<StateManager>,
        metrics: Arc<CrawlerMetrics>,
    ) -> Self {
        Self {
            config,
            browser,
            list_scraper,
            detail_scraper,
            repository,
            state,
            metrics,
            robots: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Enables robots.txt consultation before the run starts.
    #[must_use]
    pub fn with_robots(mut self, robots: Arc<RobotsChecker>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Token that callers cancel to request draining.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one crawl. The shutdown path (flush, forced save, browser stop)
    /// executes regardless of how the run ends.
    pub async fn run(&self, run_id: &str, resume: bool) -> Result<CrawlState, CrawlerError> {
        info!(run_id, resume, config = %self.config.summary(), "crawl starting");
        let _ = self.state.initialize(run_id, resume).await;

        // zero caps mean "collect nothing": complete immediately
        if self.config.max_pages == Some(0) || self.config.max_items == Some(0) {
            info!("zero page/item cap, nothing to do");
            self.state.mark_completed().await?;
            return Ok(self.state.snapshot());
        }

        self.metrics.start_crawl();
        let outcome = self.run_inner().await;
        self.shutdown(&outcome).await;

        match outcome {
            Ok(()) => Ok(self.state.snapshot()),
            Err(err) => Err(err),
        }
    }

    async fn run_inner(&self) -> Result<(), CrawlerError> {
        let list_url = self.config.bid_list_url().to_string();

        if let Some(robots) = &self.robots {
            if !robots.can_fetch(&list_url).await? {
                return Err(CrawlerError::Configuration(format!(
                    "robots.txt disallows crawling {list_url}"
                )));
            }
            if self.config.robots.respect_crawl_delay {
                if let Some(delay) = robots.crawl_delay(&list_url).await {
                    debug!(?delay, "honoring robots.txt crawl-delay");
                }
            }
        }

        self.state
            .set_filters(self.config.keyword.clone(), self.config.bid_type.clone());

        self.browser.start().await?;
        let list_page = self.browser.new_page().await?;

        let retry = RetryPolicy::from_config(&self.config.retry);
        retry.execute("open_list_page", || list_page.goto(&list_url)).await?;

        // jump straight to the checkpointed page when resuming past page 1
        let (start_page, start_index) = self.state.get_resume_point();
        if start_page > 1 {
            info!(start_page, start_index, "jumping to resume point");
            self.list_scraper.go_to_page(list_page.as_ref(), start_page).await?;
        }

        let (tx, rx) = mpsc::channel::<WorkItem>(self.config.concurrency.queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let worker_count = self.config.concurrency.max_workers;
        self.metrics.set_workers(i64::from(worker_count));
        let saved_since_flush = Arc::new(AtomicU32::new(0));
        let current_page_seen = Arc::new(AtomicU32::new(start_page));

        let mut workers = Vec::with_capacity(worker_count as usize);
        for worker_id in 0..worker_count {
            let worker_page = self.browser.new_page().await?;
            let processor = ItemProcessor::new(
                self.detail_scraper.clone(),
                self.repository.clone(),
                self.state.clone(),
                retry.clone(),
                self.metrics.clone(),
                self.config.base_url().to_string(),
            );
            let rx = rx.clone();
            let repository = self.repository.clone();
            let state = self.state.clone();
            let metrics = self.metrics.clone();
            let saved_since_flush = saved_since_flush.clone();
            let current_page_seen = current_page_seen.clone();
            let save_interval = self.config.storage.save_interval;
            let batch_delay = Duration::from_millis(self.config.concurrency.batch_delay_ms);

            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let task = match item {
                        Some(WorkItem::Task(task)) => task,
                        Some(WorkItem::Shutdown) | None => {
                            debug!(worker_id, "worker exiting");
                            break;
                        }
                    };

                    // page-transition event: first task seen from a new page
                    let page_num = task.page_num;
                    let previous = current_page_seen.swap(page_num, Ordering::SeqCst);
                    if previous != page_num {
                        info!(page = page_num, "processing page");
                    }

                    match processor.process(worker_page.as_ref(), &task).await {
                        Ok(Some(_)) => {
                            let pending = saved_since_flush.fetch_add(1, Ordering::SeqCst) + 1;
                            if pending >= save_interval {
                                saved_since_flush.store(0, Ordering::SeqCst);
                                if let Err(err) = repository.flush().await {
                                    error!(%err, "periodic repository flush failed");
                                }
                                if let Err(err) = state.save(false).await {
                                    error!(%err, "periodic checkpoint save failed");
                                }
                            }
                        }
                        Ok(None) => {
                            metrics.record_item("duplicate");
                        }
                        Err(err) => {
                            // already recorded; the worker moves on
                            warn!(worker_id, %err, "task failed");
                        }
                    }

                    if !batch_delay.is_zero() {
                        tokio::time::sleep(batch_delay).await;
                    }
                }
            }));
        }

        let navigator = PageNavigator::new(
            self.list_scraper.clone(),
            self.state.clone(),
            retry.clone(),
            self.metrics.clone(),
            NavigatorOptions {
                max_pages: self.config.max_pages,
                max_items: self.config.max_items,
                page_delay: Duration::from_millis(self.config.concurrency.page_delay_ms),
            },
        );

        let enqueued = navigator
            .produce(list_page.as_ref(), start_page, start_index, &tx, &self.cancel)
            .await;
        info!(enqueued, "producer finished, draining workers");

        // one sentinel per worker flushes the queue
        for _ in 0..worker_count {
            if tx.send(WorkItem::Shutdown).await.is_err() {
                break;
            }
        }
        drop(tx);

        match tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        error!(%err, "worker panicked");
                    }
                }
            }
            Err(_) => warn!("workers did not drain within the grace period"),
        }

        let _ = list_page.close().await;

        if self.cancel.is_cancelled() {
            info!("run cancelled, checkpoint kept for resume");
            self.state.set_running(false);
        } else {
            self.state.mark_completed().await?;
        }
        Ok(())
    }

    /// Terminal path shared by success, failure and cancellation.
    async fn shutdown(&self, outcome: &Result<(), CrawlerError>) {
        if let Err(err) = self.repository.flush().await {
            error!(%err, "final repository flush failed");
        }
        if let Err(err) = self.state.save(true).await {
            error!(%err, "final checkpoint save failed");
        }
        if let Err(err) = self.browser.stop().await {
            warn!(%err, "browser stop failed");
        }
        self.metrics.end_crawl();

        let stats = self.state.statistics();
        match outcome {
            Ok(()) => info!(
                collected = stats.total_collected,
                details = stats.detail_collected,
                errors = stats.errors,
                retries = stats.retries,
                duplicates_skipped = stats.skipped_duplicates,
                success_rate = %format!("{:.1}%", stats.success_rate()),
                "crawl finished"
            ),
            Err(err) => error!(
                %err,
                collected = stats.total_collected,
                errors = stats.errors,
                "crawl aborted"
            ),
        }
    }
}
