//! Item processor (consumer)
//!
//! Handles one queued task end to end: dedup check, detail scrape under the
//! retry policy, repository write, checkpoint bookkeeping. A permanently
//! failing detail page still produces a partial record so the notice is
//! never silently lost.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::crawling::tasks::CrawlTask;
use crate::domain::bid_notice::BidNoticeDetail;
use crate::domain::repositories::BidRepository;
use crate::errors::CrawlerError;
use crate::infrastructure::browser::BrowserPage;
use crate::infrastructure::metrics::CrawlerMetrics;
use crate::infrastructure::parsing::normalize_url;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::state_manager::StateManager;
use crate::scrapers::DetailScraper;

/// Processes dequeued tasks against one page handle.
pub struct ItemProcessor {
    detail_scraper: Arc<dyn DetailScraper>,
    repository: Arc<dyn BidRepository>,
    state: Arc<StateManager>,
    retry: RetryPolicy,
    metrics: Arc<CrawlerMetrics>,
    base_url: String,
}

impl ItemProcessor {
    #[must_use]
    pub fn new(
        detail_scraper: Arc<dyn DetailScraper>,
        repository: Arc<dyn BidRepository>,
        state: Arc<StateManager>,
        retry: RetryPolicy,
        metrics: Arc<CrawlerMetrics>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            detail_scraper,
            repository,
            state,
            retry,
            metrics,
            base_url: base_url.into(),
        }
    }

    /// Processes one task. Returns `None` when the notice was already
    /// collected; repository failures surface to the caller, everything else
    /// is contained as a partial record.
    pub async fn process(
        &self,
        page: &dyn BrowserPage,
        task: &CrawlTask,
    ) -> Result<Option<BidNoticeDetail>, CrawlerError> {
        let bid_id = task.notice_id().to_string();
        if self.state.is_collected(&bid_id) {
            debug!(%bid_id, "already collected, skipping");
            self.state.mark_collected(&bid_id); // counts the duplicate
            return Ok(None);
        }

        self.state.update_progress(None, Some(task.index_in_page), None);
        let started = Instant::now();

        let detail = match task.notice.detail_url.as_deref() {
            None => {
                warn!(%bid_id, "notice has no detail url");
                BidNoticeDetail::failed(task.notice.clone(), "missing detail url")
            }
            Some(raw_url) => {
                let url = normalize_url(raw_url, &self.base_url);
                match self.scrape_detail(page, &url, task).await {
                    Ok(detail) => detail,
                    Err(err @ CrawlerError::RetryExhausted { .. }) => {
                        warn!(%bid_id, %err, "detail scrape failed permanently, saving partial record");
                        BidNoticeDetail::failed(task.notice.clone(), err.to_string())
                    }
                    Err(err) => {
                        // non-retryable scrape-side failure: same containment
                        warn!(%bid_id, %err, "detail scrape failed, saving partial record");
                        BidNoticeDetail::failed(task.notice.clone(), err.to_string())
                    }
                }
            }
        };

        let save_result = self.repository.save(&detail).await;
        // detail page leaves this handle off the list view, bring it back
        if let Err(err) = page.go_back().await {
            debug!(%bid_id, %err, "could not return to list view");
        }

        match save_result {
            Ok(saved) => {
                self.state.mark_collected(&bid_id);
                if detail.crawl_success {
                    self.state.record_detail_collected();
                    self.metrics.record_item("success");
                    info!(%bid_id, saved, page = task.page_num, "notice collected");
                } else {
                    let error = detail.crawl_error.clone().unwrap_or_else(|| "unknown".into());
                    self.state.record_error(
                        &error,
                        Some(serde_json::json!({
                            "bid_notice_id": bid_id,
                            "title": detail.notice.title,
                            "page": task.page_num,
                        })),
                    );
                    self.metrics.record_item("failed");
                    self.metrics.record_error("detail_scrape");
                }
                self.metrics.observe_item_processing(started.elapsed().as_secs_f64());
                Ok(Some(detail))
            }
            Err(err) => {
                // the item is lost but the run continues
                self.state.record_error(
                    &err.to_string(),
                    Some(serde_json::json!({ "bid_notice_id": bid_id })),
                );
                self.metrics.record_error(err.kind());
                Err(err)
            }
        }
    }

    async fn scrape_detail(
        &self,
        page: &dyn BrowserPage,
        url: &str,
        task: &CrawlTask,
    ) -> Result<BidNoticeDetail, CrawlerError> {
        let state = &self.state;
        let metrics = &self.metrics;
        let started = Instant::now();
        let result = self
            .retry
            .execute_with(
                "detail_scrape",
                || self.detail_scraper.scrape_from_url(page, url, &task.notice),
                CrawlerError::is_retryable,
                |attempt, _err| {
                    state.record_retry();
                    metrics.record_retry("detail_scrape");
                    debug!(bid_id = task.notice_id(), attempt, "detail scrape retry");
                },
            )
            .await;
        self.metrics
            .observe_request("detail_page", started.elapsed().as_secs_f64());
        result
    }
}
