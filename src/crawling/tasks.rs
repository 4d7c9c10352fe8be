//! Work units flowing through the bounded queue

use serde::{Deserialize, Serialize};

use crate::domain::bid_notice::BidNotice;

/// One notice to fetch in detail. Created by the producer, consumed exactly
/// once by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub notice: BidNotice,
    /// List page the notice came from (1-based).
    pub page_num: u32,
    /// Position within that page (0-based).
    pub index_in_page: u32,
}

impl CrawlTask {
    #[must_use]
    pub fn new(notice: BidNotice, page_num: u32, index_in_page: u32) -> Self {
        Self {
            notice,
            page_num,
            index_in_page,
        }
    }

    #[must_use]
    pub fn notice_id(&self) -> &str {
        &self.notice.bid_notice_id
    }
}

/// Queue message: a task, or the shutdown sentinel that tells one worker to
/// exit. The orchestrator enqueues one sentinel per worker at drain time.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Task(CrawlTask),
    Shutdown,
}
