//! CSV file repository
//!
//! Spreadsheet-friendly [`BidRepository`] variant. Rows append to a single
//! CSV file on flush; nested values flatten (attachments join with `;`) and
//! unknown extra fields are not carried, so JSON remains the lossless
//! format.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::bid_notice::{BidNotice, BidNoticeDetail, BidStatus, BidType};
use crate::domain::repositories::BidRepository;
use crate::errors::CrawlerError;

const HEADERS: [&str; 22] = [
    "bid_notice_id",
    "title",
    "bid_type",
    "status",
    "organization",
    "demand_organization",
    "announce_date",
    "deadline",
    "estimated_price",
    "base_price",
    "detail_url",
    "bid_method",
    "contract_method",
    "region",
    "contact_department",
    "contact_person",
    "contact_phone",
    "contact_email",
    "attachments",
    "crawled_at",
    "crawl_success",
    "crawl_error",
];

struct Inner {
    buffer: Vec<BidNoticeDetail>,
    id_cache: HashSet<String>,
}

/// CSV-backed repository appending one row per notice.
pub struct CsvRepository {
    output_file: PathBuf,
    raise_on_duplicate: bool,
    inner: Mutex<Inner>,
}

impl CsvRepository {
    /// Opens the repository and hydrates the id cache from an existing file.
    pub async fn open(output_file: impl Into<PathBuf>, raise_on_duplicate: bool) -> Result<Self, CrawlerError> {
        let output_file = output_file.into();
        if let Some(parent) = output_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let repo = Self {
            output_file,
            raise_on_duplicate,
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                id_cache: HashSet::new(),
            }),
        };
        let existing = repo.load_disk().await.unwrap_or_else(|err| {
            warn!(%err, "failed to read existing CSV, starting empty");
            Vec::new()
        });
        repo.inner.lock().await.id_cache = existing.iter().map(|d| d.bid_notice_id().to_string()).collect();
        Ok(repo)
    }

    fn enum_label<T: serde::Serialize>(value: &T) -> String {
        serde_json::to_value(value)
            .ok()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default()
    }

    fn datetime_field(value: Option<DateTime<Utc>>) -> String {
        value.map(|v| v.to_rfc3339()).unwrap_or_default()
    }

    fn to_row(detail: &BidNoticeDetail) -> Vec<String> {
        let n = &detail.notice;
        vec![
            n.bid_notice_id.clone(),
            n.title.clone(),
            Self::enum_label(&n.bid_type),
            Self::enum_label(&n.status),
            n.organization.clone().unwrap_or_default(),
            n.demand_organization.clone().unwrap_or_default(),
            Self::datetime_field(n.announce_date),
            Self::datetime_field(n.deadline),
            n.estimated_price.map(|p| p.to_string()).unwrap_or_default(),
            n.base_price.map(|p| p.to_string()).unwrap_or_default(),
            n.detail_url.clone().unwrap_or_default(),
            detail.bid_method.clone().unwrap_or_default(),
            detail.contract_method.clone().unwrap_or_default(),
            detail.region.clone().unwrap_or_default(),
            detail.contact_department.clone().unwrap_or_default(),
            detail.contact_person.clone().unwrap_or_default(),
            detail.contact_phone.clone().unwrap_or_default(),
            detail.contact_email.clone().unwrap_or_default(),
            detail.attachments.join(";"),
            n.crawled_at.to_rfc3339(),
            detail.crawl_success.to_string(),
            detail.crawl_error.clone().unwrap_or_default(),
        ]
    }

    fn from_record(record: &csv::StringRecord) -> Option<BidNoticeDetail> {
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let optional = |i: usize| {
            let value = field(i);
            (!value.is_empty()).then_some(value)
        };
        let datetime = |i: usize| {
            DateTime::parse_from_rfc3339(record.get(i).unwrap_or_default())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        };

        let mut notice = BidNotice::new(field(0), field(1)).ok()?;
        notice.bid_type = serde_json::from_value(serde_json::json!(field(2))).unwrap_or(BidType::Other);
        notice.status = serde_json::from_value(serde_json::json!(field(3))).unwrap_or(BidStatus::Unknown);
        notice.organization = optional(4);
        notice.demand_organization = optional(5);
        notice.announce_date = datetime(6);
        notice.deadline = datetime(7);
        notice.estimated_price = optional(8).and_then(|v| v.parse().ok());
        notice.base_price = optional(9).and_then(|v| v.parse().ok());
        notice.detail_url = optional(10);
        if let Some(crawled) = datetime(19) {
            notice.crawled_at = crawled;
        }

        let mut detail = BidNoticeDetail::from_notice(notice);
        detail.bid_method = optional(11);
        detail.contract_method = optional(12);
        detail.region = optional(13);
        detail.contact_department = optional(14);
        detail.contact_person = optional(15);
        detail.contact_phone = optional(16);
        detail.contact_email = optional(17);
        detail.attachments = optional(18)
            .map(|a| a.split(';').map(str::to_string).collect())
            .unwrap_or_default();
        detail.crawl_success = field(20).parse().unwrap_or(true);
        detail.crawl_error = optional(21);
        Some(detail)
    }

    async fn load_disk(&self) -> Result<Vec<BidNoticeDetail>, CrawlerError> {
        let raw = match tokio::fs::read_to_string(&self.output_file).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut reader = csv::Reader::from_reader(raw.as_bytes());
        let mut items = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CrawlerError::Repository(format!("CSV parse failed: {e}")))?;
            if let Some(detail) = Self::from_record(&record) {
                items.push(detail);
            }
        }
        Ok(items)
    }

    async fn flush_buffer(&self, inner: &mut Inner) -> Result<(), CrawlerError> {
        if inner.buffer.is_empty() {
            return Ok(());
        }

        let file_exists = tokio::fs::try_exists(&self.output_file).await.unwrap_or(false);
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        if !file_exists {
            writer
                .write_record(HEADERS)
                .map_err(|e| CrawlerError::Repository(format!("CSV write failed: {e}")))?;
        }
        let count = inner.buffer.len();
        for detail in inner.buffer.drain(..) {
            writer
                .write_record(Self::to_row(&detail))
                .map_err(|e| CrawlerError::Repository(format!("CSV write failed: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| CrawlerError::Repository(format!("CSV write failed: {e}")))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_file)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        info!(count, path = ?self.output_file, "notices flushed to CSV");
        Ok(())
    }
}

#[async_trait]
impl BidRepository for CsvRepository {
    async fn save(&self, detail: &BidNoticeDetail) -> Result<bool, CrawlerError> {
        let mut inner = self.inner.lock().await;
        let bid_id = detail.bid_notice_id().to_string();
        if inner.id_cache.contains(&bid_id) {
            if self.raise_on_duplicate {
                return Err(CrawlerError::DuplicateBid { bid_id });
            }
            debug!(%bid_id, "skipping duplicate");
            return Ok(false);
        }
        inner.buffer.push(detail.clone());
        inner.id_cache.insert(bid_id);
        Ok(true)
    }

    async fn exists(&self, bid_id: &str) -> bool {
        self.inner.lock().await.id_cache.contains(bid_id)
    }

    async fn find_by_id(&self, bid_id: &str) -> Result<Option<BidNoticeDetail>, CrawlerError> {
        {
            let inner = self.inner.lock().await;
            if let Some(found) = inner.buffer.iter().find(|d| d.bid_notice_id() == bid_id) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(self.load_disk().await?.into_iter().find(|d| d.bid_notice_id() == bid_id))
    }

    async fn find_all(&self, limit: Option<usize>) -> Result<Vec<BidNoticeDetail>, CrawlerError> {
        let mut items = self.load_disk().await?;
        {
            let inner = self.inner.lock().await;
            items.extend(inner.buffer.iter().cloned());
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn count(&self) -> usize {
        self.inner.lock().await.id_cache.len()
    }

    async fn flush(&self) -> Result<(), CrawlerError> {
        let mut inner = self.inner.lock().await;
        self.flush_buffer(&mut inner).await
    }

    async fn close(&self) -> Result<(), CrawlerError> {
        self.flush().await
    }
}

/// Fans writes out to several repositories; `--format both` uses this.
///
/// The first repository is authoritative for reads and the save result.
pub struct CompositeRepository {
    repositories: Vec<Box<dyn BidRepository>>,
}

impl CompositeRepository {
    #[must_use]
    pub fn new(repositories: Vec<Box<dyn BidRepository>>) -> Self {
        assert!(!repositories.is_empty(), "at least one repository required");
        Self { repositories }
    }
}

#[async_trait]
impl BidRepository for CompositeRepository {
    async fn save(&self, detail: &BidNoticeDetail) -> Result<bool, CrawlerError> {
        let mut saved = false;
        for (i, repo) in self.repositories.iter().enumerate() {
            let result = repo.save(detail).await?;
            if i == 0 {
                saved = result;
            }
        }
        Ok(saved)
    }

    async fn exists(&self, bid_id: &str) -> bool {
        self.repositories[0].exists(bid_id).await
    }

    async fn find_by_id(&self, bid_id: &str) -> Result<Option<BidNoticeDetail>, CrawlerError> {
        self.repositories[0].find_by_id(bid_id).await
    }

    async fn find_all(&self, limit: Option<usize>) -> Result<Vec<BidNoticeDetail>, CrawlerError> {
        self.repositories[0].find_all(limit).await
    }

    async fn count(&self) -> usize {
        self.repositories[0].count().await
    }

    async fn flush(&self) -> Result<(), CrawlerError> {
        for repo in &self.repositories {
            repo.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlerError> {
        for repo in &self.repositories {
            repo.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bid_notice::BidNotice;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn detail(id: &str) -> BidNoticeDetail {
        let notice = BidNotice::new(id, format!("공고 {id}"))
            .unwrap()
            .with_estimated_price(Decimal::from(250_000_000))
            .unwrap();
        let mut detail = BidNoticeDetail::from_notice(notice);
        detail.attachments = vec!["spec.hwp".to_string(), "drawing.pdf".to_string()];
        detail
    }

    #[tokio::test]
    async fn save_flush_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bids.csv");
        let repo = CsvRepository::open(&path, false).await.unwrap();
        repo.save(&detail("20240115-001")).await.unwrap();
        repo.flush().await.unwrap();

        let loaded = repo.find_by_id("20240115-001").await.unwrap().unwrap();
        assert_eq!(loaded.bid_notice_id(), "20240115-001");
        assert_eq!(loaded.notice.estimated_price, Some(Decimal::from(250_000_000)));
        assert_eq!(loaded.attachments, vec!["spec.hwp", "drawing.pdf"]);
    }

    #[tokio::test]
    async fn appends_without_duplicating_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bids.csv");
        let repo = CsvRepository::open(&path, false).await.unwrap();
        repo.save(&detail("A")).await.unwrap();
        repo.flush().await.unwrap();
        repo.save(&detail("B")).await.unwrap();
        repo.flush().await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw.lines().filter(|l| l.starts_with("bid_notice_id")).count(), 1);
        assert_eq!(repo.find_all(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reopen_detects_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bids.csv");
        {
            let repo = CsvRepository::open(&path, false).await.unwrap();
            repo.save(&detail("A")).await.unwrap();
            repo.close().await.unwrap();
        }
        let repo = CsvRepository::open(&path, false).await.unwrap();
        assert!(repo.exists("A").await);
        assert!(!repo.save(&detail("A")).await.unwrap());
    }

    #[tokio::test]
    async fn composite_fans_out() {
        let dir = TempDir::new().unwrap();
        let json = crate::infrastructure::json_repository::JsonRepository::open(
            dir.path(),
            crate::infrastructure::json_repository::JsonRepositoryOptions::default(),
        )
        .await
        .unwrap();
        let csv = CsvRepository::open(dir.path().join("bids.csv"), false).await.unwrap();
        let composite = CompositeRepository::new(vec![Box::new(json), Box::new(csv)]);

        assert!(composite.save(&detail("A")).await.unwrap());
        composite.flush().await.unwrap();
        assert!(composite.exists("A").await);
        assert!(dir.path().join("bids.csv").exists());
        assert!(dir.path().join("bid_notices.json").exists());
    }
}
