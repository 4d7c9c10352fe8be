//! Dynamic crawler for Korean public-procurement bid notices.
//!
//! A producer/consumer pipeline walks paginated list pages, fetches per-item
//! detail pages through a worker pool, and persists results with
//! repository-backed deduplication. A durable checkpoint makes interrupted
//! runs resumable; a scheduler triggers runs on interval or cron.

pub mod crawling;
pub mod domain;
pub mod errors;
pub mod infrastructure;
pub mod scrapers;

pub use crawling::{CrawlOrchestrator, CrawlScheduler, CrawlTask, ItemProcessor, PageNavigator};
pub use domain::{BidNotice, BidNoticeDetail, BidNoticeList, BidRepository, BidStatus, BidType, CrawlState};
pub use errors::CrawlerError;
pub use infrastructure::{
    BrowserPage, BrowserSession, CrawlerConfig, CrawlerMetrics, HttpBrowserSession, JsonRepository, RetryPolicy,
    SelectorConfig, StateManager,
};
pub use scrapers::{BidDetailScraper, BidListScraper, DetailScraper, ListScraper};
