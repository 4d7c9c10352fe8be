//! Domain layer: bid-notice entities, crawl checkpoint model, repository
//! contract.

pub mod bid_notice;
pub mod crawl_state;
pub mod repositories;

pub use bid_notice::{BidNotice, BidNoticeDetail, BidNoticeList, BidStatus, BidType};
pub use crawl_state::{CrawlProgress, CrawlState, CrawlStatistics, FailedItem};
pub use repositories::{BidRepository, InMemoryRepository};
