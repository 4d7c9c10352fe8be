//! Repository abstraction for collected bid notices
//!
//! The crawl engine only talks to this trait; the JSON and CSV file stores in
//! the infrastructure layer are the shipped implementations and the in-memory
//! store backs tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::bid_notice::BidNoticeDetail;
use crate::errors::CrawlerError;

/// Durable store of collected notices with duplicate detection.
///
/// `save` is write-once per id within the process; `exists` must reflect both
/// buffered and durable state; duplicates are skipped silently unless an
/// implementation's strict mode is enabled. Implementations must be safe
/// under concurrent `save` calls from multiple workers.
#[async_trait]
pub trait BidRepository: Send + Sync {
    /// Persists one notice. Returns `false` iff the id already exists.
    async fn save(&self, detail: &BidNoticeDetail) -> Result<bool, CrawlerError>;

    /// Persists many notices, skipping duplicates. Returns the count written.
    async fn save_batch(&self, details: &[BidNoticeDetail]) -> Result<usize, CrawlerError> {
        let mut written = 0;
        for detail in details {
            match self.save(detail).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(CrawlerError::DuplicateBid { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    /// O(1) id lookup covering buffered and flushed items.
    async fn exists(&self, bid_id: &str) -> bool;

    async fn find_by_id(&self, bid_id: &str) -> Result<Option<BidNoticeDetail>, CrawlerError>;

    async fn find_all(&self, limit: Option<usize>) -> Result<Vec<BidNoticeDetail>, CrawlerError>;

    async fn count(&self) -> usize;

    /// Forces buffered writes to durable storage. Idempotent.
    async fn flush(&self) -> Result<(), CrawlerError>;

    /// Flushes and releases resources.
    async fn close(&self) -> Result<(), CrawlerError>;
}

/// In-memory repository used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryRepository {
    items: Mutex<HashMap<String, BidNoticeDetail>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BidRepository for InMemoryRepository {
    async fn save(&self, detail: &BidNoticeDetail) -> Result<bool, CrawlerError> {
        let mut items = self.items.lock().await;
        let id = detail.bid_notice_id().to_string();
        if items.contains_key(&id) {
            return Ok(false);
        }
        items.insert(id, detail.clone());
        Ok(true)
    }

    async fn exists(&self, bid_id: &str) -> bool {
        self.items.lock().await.contains_key(bid_id)
    }

    async fn find_by_id(&self, bid_id: &str) -> Result<Option<BidNoticeDetail>, CrawlerError> {
        Ok(self.items.lock().await.get(bid_id).cloned())
    }

    async fn find_all(&self, limit: Option<usize>) -> Result<Vec<BidNoticeDetail>, CrawlerError> {
        let items = self.items.lock().await;
        let mut all: Vec<BidNoticeDetail> = items.values().cloned().collect();
        all.sort_by(|a, b| a.bid_notice_id().cmp(b.bid_notice_id()));
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        Ok(all)
    }

    async fn count(&self) -> usize {
        self.items.lock().await.len()
    }

    async fn flush(&self) -> Result<(), CrawlerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bid_notice::BidNotice;

    fn detail(id: &str) -> BidNoticeDetail {
        BidNoticeDetail::from_notice(BidNotice::new(id, format!("공고 {id}")).unwrap())
    }

    #[tokio::test]
    async fn save_is_write_once_per_id() {
        let repo = InMemoryRepository::new();
        assert!(repo.save(&detail("A")).await.unwrap());
        assert!(repo.exists("A").await);
        assert!(!repo.save(&detail("A")).await.unwrap());
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn save_batch_skips_duplicates() {
        let repo = InMemoryRepository::new();
        repo.save(&detail("A")).await.unwrap();
        let written = repo
            .save_batch(&[detail("A"), detail("B"), detail("C")])
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(repo.count().await, 3);
    }

    #[tokio::test]
    async fn find_all_respects_limit() {
        let repo = InMemoryRepository::new();
        for id in ["C", "A", "B"] {
            repo.save(&detail(id)).await.unwrap();
        }
        let two = repo.find_all(Some(2)).await.unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].bid_notice_id(), "A");
    }
}
