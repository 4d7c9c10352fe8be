//! Scraper contracts and the selector-driven implementations
//!
//! The crawl engine only depends on the two traits here; which CSS selectors
//! find what lives entirely in the selector document.

pub mod detail_scraper;
pub mod list_scraper;

use async_trait::async_trait;

use crate::domain::bid_notice::{BidNotice, BidNoticeDetail, BidNoticeList};
use crate::errors::CrawlerError;
use crate::infrastructure::browser::BrowserPage;

/// Extracts notice summaries and pagination metadata from the list view.
#[async_trait]
pub trait ListScraper: Send + Sync {
    /// Scrapes the page handle's current document.
    async fn scrape(&self, page: &dyn BrowserPage) -> Result<BidNoticeList, CrawlerError>;

    /// Moves the page handle to the given list page. Returns `false` when the
    /// page does not exist.
    async fn go_to_page(&self, page: &dyn BrowserPage, page_num: u32) -> Result<bool, CrawlerError>;

    /// Moves to the page after `current_page`.
    async fn next_page(&self, page: &dyn BrowserPage, current_page: u32) -> Result<bool, CrawlerError> {
        self.go_to_page(page, current_page + 1).await
    }
}

/// Extracts one full notice record from its detail page.
///
/// Must be idempotent for the same `(url, notice)` input; the retry policy
/// may invoke it repeatedly.
#[async_trait]
pub trait DetailScraper: Send + Sync {
    async fn scrape_from_url(
        &self,
        page: &dyn BrowserPage,
        url: &str,
        notice: &BidNotice,
    ) -> Result<BidNoticeDetail, CrawlerError>;
}

pub use detail_scraper::BidDetailScraper;
pub use list_scraper::BidListScraper;
