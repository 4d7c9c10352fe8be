//! JSON file repository
//!
//! Reference [`BidRepository`] implementation. Notices accumulate in a small
//! write buffer and flush into a single top-level JSON array; a variant
//! writes one file per notice id. An in-memory id cache, hydrated from disk
//! at open, answers `exists` in O(1) across buffered and durable items.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::bid_notice::BidNoticeDetail;
use crate::domain::repositories::BidRepository;
use crate::errors::CrawlerError;

/// Tuning knobs for [`JsonRepository`].
#[derive(Debug, Clone)]
pub struct JsonRepositoryOptions {
    pub filename: String,
    /// One file per notice id instead of a single array file.
    pub individual_files: bool,
    pub pretty: bool,
    /// Buffered saves before an automatic flush.
    pub flush_threshold: usize,
    /// Strict mode: duplicate ids raise instead of silently skipping.
    pub raise_on_duplicate: bool,
}

impl Default for JsonRepositoryOptions {
    fn default() -> Self {
        Self {
            filename: "bid_notices.json".to_string(),
            individual_files: false,
            pretty: true,
            flush_threshold: 10,
            raise_on_duplicate: false,
        }
    }
}

struct Inner {
    buffer: Vec<BidNoticeDetail>,
    id_cache: HashSet<String>,
}

/// File-backed repository persisting notices as JSON.
pub struct JsonRepository {
    output_dir: PathBuf,
    options: JsonRepositoryOptions,
    inner: Mutex<Inner>,
}

impl JsonRepository {
    /// Opens the repository, creating the directory and hydrating the id
    /// cache from any existing data.
    pub async fn open(output_dir: impl Into<PathBuf>, options: JsonRepositoryOptions) -> Result<Self, CrawlerError> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir).await?;

        let repo = Self {
            output_dir,
            options,
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                id_cache: HashSet::new(),
            }),
        };

        let existing = repo.load_disk().await.unwrap_or_else(|err| {
            warn!(%err, "failed to hydrate id cache, starting empty");
            Vec::new()
        });
        {
            let mut inner = repo.inner.lock().await;
            inner.id_cache = existing.iter().map(|d| d.bid_notice_id().to_string()).collect();
            debug!(cached = inner.id_cache.len(), "id cache hydrated");
        }
        Ok(repo)
    }

    fn output_file(&self) -> PathBuf {
        self.output_dir.join(&self.options.filename)
    }

    fn individual_file(&self, bid_id: &str) -> PathBuf {
        let safe: String = bid_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.output_dir.join(format!("{safe}.json"))
    }

    fn to_json(&self, value: &impl serde::Serialize) -> Result<String, CrawlerError> {
        if self.options.pretty {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(serde_json::to_string(value)?)
        }
    }

    async fn load_disk(&self) -> Result<Vec<BidNoticeDetail>, CrawlerError> {
        if self.options.individual_files {
            let mut items = Vec::new();
            let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(items),
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json")
                    && path.file_name().is_some_and(|name| name != self.options.filename.as_str())
                {
                    match tokio::fs::read_to_string(&path).await {
                        Ok(raw) => match serde_json::from_str(&raw) {
                            Ok(detail) => items.push(detail),
                            Err(err) => warn!(?path, %err, "skipping unreadable notice file"),
                        },
                        Err(err) => warn!(?path, %err, "skipping unreadable notice file"),
                    }
                }
            }
            return Ok(items);
        }

        match tokio::fs::read_to_string(self.output_file()).await {
            Ok(raw) => match serde_json::from_str::<Vec<BidNoticeDetail>>(&raw) {
                Ok(items) => Ok(items),
                Err(err) => {
                    warn!(%err, "output file is not a valid notice array");
                    Ok(Vec::new())
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Merges the buffer into the array file, deduplicating against on-disk
    /// ids. Safe to call repeatedly.
    async fn flush_buffer(&self, inner: &mut Inner) -> Result<(), CrawlerError> {
        if inner.buffer.is_empty() {
            return Ok(());
        }

        let mut on_disk = self.load_disk().await?;
        let disk_ids: HashSet<String> = on_disk.iter().map(|d| d.bid_notice_id().to_string()).collect();

        let fresh: Vec<BidNoticeDetail> = inner
            .buffer
            .drain(..)
            .filter(|d| !disk_ids.contains(d.bid_notice_id()))
            .collect();
        let added = fresh.len();
        on_disk.extend(fresh);

        let json = self.to_json(&on_disk)?;
        tokio::fs::write(self.output_file(), json).await?;
        info!(added, total = on_disk.len(), "notices flushed to JSON");
        Ok(())
    }
}

#[async_trait]
impl BidRepository for JsonRepository {
    async fn save(&self, detail: &BidNoticeDetail) -> Result<bool, CrawlerError> {
        let mut inner = self.inner.lock().await;
        let bid_id = detail.bid_notice_id().to_string();

        if inner.id_cache.contains(&bid_id) {
            if self.options.raise_on_duplicate {
                return Err(CrawlerError::DuplicateBid { bid_id });
            }
            debug!(%bid_id, "skipping duplicate");
            return Ok(false);
        }

        if self.options.individual_files {
            let json = self.to_json(detail)?;
            tokio::fs::write(self.individual_file(&bid_id), json).await?;
        } else {
            inner.buffer.push(detail.clone());
        }
        inner.id_cache.insert(bid_id);

        if !self.options.individual_files && inner.buffer.len() >= self.options.flush_threshold {
            self.flush_buffer(&mut inner).await?;
        }
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
            let disk_ids: HashSet<&str> = items.iter().map(BidNoticeDetail::bid_notice_id).collect();
            let buffered: Vec<BidNoticeDetail> = inner
                .buffer
                .iter()
                .filter(|d| !disk_ids.contains(d.bid_notice_id()))
                .cloned()
                .collect();
            items.extend(buffered);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bid_notice::BidNotice;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn detail(id: &str) -> BidNoticeDetail {
        let notice = BidNotice::new(id, format!("공고 {id}"))
            .unwrap()
            .with_estimated_price(Decimal::from(150_000_000))
            .unwrap();
        BidNoticeDetail::from_notice(notice)
    }

    async fn open(dir: &TempDir) -> JsonRepository {
        JsonRepository::open(dir.path(), JsonRepositoryOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn exists_reflects_buffer_before_flush() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir).await;
        assert!(repo.save(&detail("A")).await.unwrap());
        assert!(repo.exists("A").await);
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_save_returns_false() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir).await;
        assert!(repo.save(&detail("A")).await.unwrap());
        assert!(!repo.save(&detail("A")).await.unwrap());
    }

    #[tokio::test]
    async fn strict_mode_raises_on_duplicate() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRepository::open(
            dir.path(),
            JsonRepositoryOptions {
                raise_on_duplicate: true,
                ..JsonRepositoryOptions::default()
            },
        )
        .await
        .unwrap();
        repo.save(&detail("A")).await.unwrap();
        assert!(matches!(
            repo.save(&detail("A")).await,
            Err(CrawlerError::DuplicateBid { .. })
        ));
    }

    #[tokio::test]
    async fn flush_is_idempotent_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir).await;
        let original = detail("20240115-001");
        repo.save(&original).await.unwrap();
        repo.flush().await.unwrap();
        repo.flush().await.unwrap();

        let loaded = repo.find_by_id("20240115-001").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(repo.find_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reopen_hydrates_id_cache() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open(&dir).await;
            repo.save(&detail("A")).await.unwrap();
            repo.close().await.unwrap();
        }
        let repo = open(&dir).await;
        assert!(repo.exists("A").await);
        assert!(!repo.save(&detail("A")).await.unwrap());
    }

    #[tokio::test]
    async fn auto_flush_at_threshold() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRepository::open(
            dir.path(),
            JsonRepositoryOptions {
                flush_threshold: 2,
                ..JsonRepositoryOptions::default()
            },
        )
        .await
        .unwrap();
        repo.save(&detail("A")).await.unwrap();
        repo.save(&detail("B")).await.unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("bid_notices.json"))
            .await
            .unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        // prices stay strings on disk
        assert_eq!(parsed[0]["estimated_price"], serde_json::json!("150000000"));
    }

    #[tokio::test]
    async fn individual_files_mode() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRepository::open(
            dir.path(),
            JsonRepositoryOptions {
                individual_files: true,
                ..JsonRepositoryOptions::default()
            },
        )
        .await
        .unwrap();
        repo.save(&detail("20240115-001")).await.unwrap();
        assert!(dir.path().join("20240115-001.json").exists());

        let all = repo.find_all(None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn unknown_fields_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut original = detail("A");
        original
            .extra
            .insert("custom_field".to_string(), serde_json::json!("kept"));
        let repo = open(&dir).await;
        repo.save(&original).await.unwrap();
        repo.flush().await.unwrap();

        let loaded = repo.find_by_id("A").await.unwrap().unwrap();
        assert_eq!(loaded.extra["custom_field"], serde_json::json!("kept"));
    }
}
