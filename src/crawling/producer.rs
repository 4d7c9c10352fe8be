//! Page navigator (producer)
//!
//! Walks the paginated list view and feeds per-item tasks into the bounded
//! queue in strict page-then-index order. List scraping runs under the retry
//! policy; a page that keeps failing ends production gracefully after being
//! recorded, it never tears the run down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::tasks::{CrawlTask, WorkItem};
use crate::errors::CrawlerError;
use crate::infrastructure::browser::BrowserPage;
use crate::infrastructure::metrics::CrawlerMetrics;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::state_manager::StateManager;
use crate::scrapers::ListScraper;

/// Producer configuration distilled from the crawler config.
#[derive(Debug, Clone)]
pub struct NavigatorOptions {
    pub max_pages: Option<u32>,
    pub max_items: Option<u64>,
    pub page_delay: Duration,
}

/// Drives the list scraper across pages and emits [`CrawlTask`]s.
pub struct PageNavigator {
    list_scraper: Arc<dyn ListScraper>,
    state: Arc<StateManager>,
    retry: RetryPolicy,
    metrics: Arc<CrawlerMetrics>,
    options: NavigatorOptions,
}

fn queue_len(tx: &mpsc::Sender<WorkItem>) -> usize {
    tx.max_capacity().saturating_sub(tx.capacity())
}

impl PageNavigator {
    #[must_use]
    pub fn new(
        list_scraper: Arc<dyn ListScraper>,
        state: Arc<StateManager>,
        retry: RetryPolicy,
        metrics: Arc<CrawlerMetrics>,
        options: NavigatorOptions,
    ) -> Self {
        Self {
            list_scraper,
            state,
            retry,
            metrics,
            options,
        }
    }

    /// Scans from `(start_page, start_index)` until the site, a cap, a
    /// persistent failure or cancellation stops production. Returns the
    /// number of tasks enqueued.
    pub async fn produce(
        &self,
        page: &dyn BrowserPage,
        start_page: u32,
        start_index: u32,
        tx: &mpsc::Sender<WorkItem>,
        cancel: &CancellationToken,
    ) -> u64 {
        let mut page_num = start_page;
        let mut first_page = true;
        let mut enqueued: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                info!(page = page_num, "producer stopping: cancellation requested");
                break;
            }
            if self.options.max_pages.is_some_and(|max| page_num > max) {
                info!(page = page_num, "producer stopping: max_pages reached");
                break;
            }

            let list = match self.scrape_list(page, page_num).await {
                Ok(list) => list,
                Err(err) => {
                    warn!(page = page_num, %err, "list page failed permanently");
                    self.metrics.record_error(err.kind());
                    self.state
                        .record_error(&err.to_string(), Some(serde_json::json!({ "page": page_num })));
                    break;
                }
            };

            if list.items.is_empty() {
                info!(page = page_num, "producer stopping: empty list page");
                break;
            }

            let total_pages = (list.total_pages > 0).then_some(list.total_pages);
            self.state.update_progress(Some(page_num), None, total_pages);
            self.state.record_list_items(list.items.len() as u64);
            self.metrics.record_page(page_num, total_pages);

            let skip = if first_page { start_index as usize } else { 0 };
            let mut stop_for_max_items = false;
            for (index, notice) in list.items.into_iter().enumerate().skip(skip) {
                if cancel.is_cancelled() {
                    break;
                }
                if self
                    .options
                    .max_items
                    .is_some_and(|max| self.state.statistics().total_collected + 1 > max)
                {
                    info!("producer stopping: max_items reached");
                    stop_for_max_items = true;
                    break;
                }

                let task = CrawlTask::new(notice, page_num, index as u32);
                // suspends here when the queue is full: backpressure
                if tx.send(WorkItem::Task(task)).await.is_err() {
                    warn!("task queue closed, producer stopping");
                    return enqueued;
                }
                enqueued += 1;
                self.metrics.set_queue_size(queue_len(tx) as i64);
            }

            // last_completed_page means "fully scanned and enqueued"; a page
            // cut short by a cap or cancellation is rescanned on resume
            if stop_for_max_items || cancel.is_cancelled() {
                if let Err(err) = self.state.save(false).await {
                    warn!(page = page_num, %err, "checkpoint save failed");
                }
                break;
            }
            if let Err(err) = self.state.complete_page(page_num).await {
                warn!(page = page_num, %err, "checkpoint save failed after page completion");
            }
            debug!(page = page_num, enqueued, "page fully enqueued");

            if !list.has_next {
                break;
            }

            match self.advance(page, page_num).await {
                Ok(true) => {
                    page_num += 1;
                    first_page = false;
                }
                Ok(false) => {
                    info!(page = page_num, "producer stopping: no next page");
                    break;
                }
                Err(err) => {
                    warn!(page = page_num, %err, "pagination failed permanently");
                    self.metrics.record_error(err.kind());
                    self.state
                        .record_error(&err.to_string(), Some(serde_json::json!({ "page": page_num + 1 })));
                    break;
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.options.page_delay) => {}
                () = cancel.cancelled() => {}
            }
        }

        enqueued
    }

    async fn scrape_list(
        &self,
        page: &dyn BrowserPage,
        page_num: u32,
    ) -> Result<crate::domain::bid_notice::BidNoticeList, CrawlerError> {
        let state = &self.state;
        let metrics = &self.metrics;
        self.retry
            .execute_with(
                "list_scrape",
                || self.list_scraper.scrape(page),
                CrawlerError::is_retryable,
                |attempt, _err| {
                    state.record_retry();
                    metrics.record_retry("list_scrape");
                    debug!(page = page_num, attempt, "list scrape retry");
                },
            )
            .await
    }

    async fn advance(&self, page: &dyn BrowserPage, current_page: u32) -> Result<bool, CrawlerError> {
        let state = &self.state;
        let metrics = &self.metrics;
        self.retry
            .execute_with(
                "next_page",
                || self.list_scraper.next_page(page, current_page),
                CrawlerError::is_retryable,
                |_attempt, _err| {
                    state.record_retry();
                    metrics.record_retry("pagination");
                },
            )
            .await
    }
}
