//! Checkpoint persistence
//!
//! Owns the [`CrawlState`] document for a run. In-memory mutations are
//! synchronous and lock-protected so retry hooks and workers can record from
//! any context; disk writes serialize a snapshot taken under the lock.
//!
//! Persistence protocol: before writing, the current state file is copied to
//! a `.backup` sidecar; loading falls back to that sidecar when the primary
//! file is unreadable.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, error, info};

use crate::domain::crawl_state::{CrawlState, CrawlStatistics};
use crate::errors::CrawlerError;

/// Thread-safe manager of the persisted crawl checkpoint.
pub struct StateManager {
    state_file: PathBuf,
    backup_file: PathBuf,
    state: Mutex<Option<CrawlState>>,
}

impl StateManager {
    #[must_use]
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        let state_file = state_file.into();
        let backup_file = state_file.with_extension("backup");
        Self {
            state_file,
            backup_file,
            state: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Initializes the run state.
    ///
    /// With `resume=true` an existing, non-completed checkpoint is adopted:
    /// progress, collected ids and statistics survive while the new `run_id`
    /// takes over. Otherwise a fresh state is created.
    pub async fn initialize(&self, run_id: &str, resume: bool) -> CrawlState {
        if resume {
            if let Some(mut loaded) = self.load().await {
                if !loaded.is_completed {
                    info!(
                        page = loaded.progress.current_page,
                        collected = loaded.statistics.total_collected,
                        "resuming from previous checkpoint"
                    );
                    loaded.run_id = run_id.to_string();
                    loaded.is_running = true;
                    *self.state.lock().unwrap() = Some(loaded.clone());
                    return loaded;
                }
            }
        }

        info!(run_id, "starting fresh crawl state");
        let mut state = CrawlState::new(run_id);
        state.is_running = true;
        *self.state.lock().unwrap() = Some(state.clone());
        state
    }

    /// Loads the checkpoint from disk, falling back to the backup sidecar.
    pub async fn load(&self) -> Option<CrawlState> {
        for path in [&self.state_file, &self.backup_file] {
            match tokio::fs::read_to_string(path).await {
                Ok(raw) => match serde_json::from_str::<CrawlState>(&raw) {
                    Ok(state) => {
                        debug!(?path, "checkpoint loaded");
                        return Some(state);
                    }
                    Err(err) => error!(?path, %err, "checkpoint parse failed"),
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => error!(?path, %err, "checkpoint read failed"),
            }
        }
        None
    }

    /// Writes the checkpoint, keeping the previous file as `.backup`.
    ///
    /// Returns `false` when there is nothing to save yet.
    pub async fn save(&self, force: bool) -> Result<bool, CrawlerError> {
        let snapshot = {
            let guard = self.state.lock().unwrap();
            match guard.as_ref() {
                Some(state) => state.clone(),
                None => return Ok(false),
            }
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&self.state_file).await.unwrap_or(false) {
            tokio::fs::copy(&self.state_file, &self.backup_file).await?;
        }

        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.state_file, json).await?;
        debug!(path = ?self.state_file, forced = force, "checkpoint saved");
        Ok(true)
    }

    /// Marks an id collected; `false` and a counted duplicate when already
    /// present.
    pub fn mark_collected(&self, bid_id: &str) -> bool {
        self.with_state(|state| state.mark_collected(bid_id))
    }

    #[must_use]
    pub fn is_collected(&self, bid_id: &str) -> bool {
        self.with_state(|state| state.is_collected(bid_id))
    }

    pub fn record_error(&self, error: &str, item_info: Option<serde_json::Value>) {
        self.with_state(|state| state.record_error(error, item_info));
    }

    pub fn record_retry(&self) {
        self.with_state(CrawlState::record_retry);
    }

    pub fn record_list_items(&self, count: u64) {
        self.with_state(|state| state.statistics.list_collected += count);
    }

    pub fn record_detail_collected(&self) {
        self.with_state(|state| state.statistics.detail_collected += 1);
    }

    pub fn update_progress(&self, page: Option<u32>, index: Option<u32>, total_pages: Option<u32>) {
        self.with_state(|state| state.update_progress(page, index, total_pages));
    }

    /// Advances the completed-page frontier and autosaves.
    pub async fn complete_page(&self, page: u32) -> Result<(), CrawlerError> {
        self.with_state(|state| state.complete_page(page));
        self.save(false).await?;
        Ok(())
    }

    /// Marks the crawl finished and forces a save.
    pub async fn mark_completed(&self) -> Result<(), CrawlerError> {
        self.with_state(CrawlState::mark_completed);
        self.save(true).await?;
        Ok(())
    }

    /// `(page, index)` the next run should re-enter from.
    #[must_use]
    pub fn get_resume_point(&self) -> (u32, u32) {
        self.with_state(|state| (state.progress.current_page, state.progress.current_index))
    }

    #[must_use]
    pub fn statistics(&self) -> CrawlStatistics {
        self.with_state(|state| state.statistics)
    }

    /// Consistent copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CrawlState {
        self.with_state(|state| state.clone())
    }

    pub fn set_running(&self, running: bool) {
        self.with_state(|state| state.is_running = running);
    }

    /// Records the run's search filters so a resumed run can be checked
    /// against them.
    pub fn set_filters(&self, keyword: Option<String>, bid_type: Option<String>) {
        self.with_state(|state| {
            state.progress.keyword = keyword.clone();
            state.progress.bid_type = bid_type.clone();
        });
    }

    /// Removes the state file and its backup.
    pub async fn cleanup(&self) -> Result<(), CrawlerError> {
        for path in [&self.state_file, &self.backup_file] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => info!(?path, "checkpoint removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        *self.state.lock().unwrap() = None;
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CrawlState) -> T) -> T {
        let mut guard = self.state.lock().unwrap();
        let state = guard.get_or_insert_with(|| CrawlState::new(uuid::Uuid::new_v4().to_string()));
        f(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> StateManager {
        StateManager::new(dir.path().join("crawl_state.json"))
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let _ = mgr.initialize("run1", false).await;
        mgr.mark_collected("A");
        mgr.mark_collected("B");
        mgr.update_progress(Some(2), Some(5), Some(10));
        mgr.save(true).await.unwrap();

        let loaded = mgr.load().await.unwrap();
        let mut expected = mgr.snapshot();
        // last_updated_at moves on every mutation; ignore it for equality
        expected.last_updated_at = loaded.last_updated_at;
        assert_eq!(loaded, expected);
        assert_eq!(loaded.progress.current_page, 2);
        assert!(loaded.is_collected("A"));
    }

    #[tokio::test]
    async fn backup_restores_corrupted_primary() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let _ = mgr.initialize("run1", false).await;
        mgr.mark_collected("A");
        mgr.save(true).await.unwrap();
        // second save creates the sidecar from the first good copy
        mgr.mark_collected("B");
        mgr.save(true).await.unwrap();

        tokio::fs::write(mgr.state_file(), "{ not json").await.unwrap();
        let recovered = mgr.load().await.unwrap();
        assert!(recovered.is_collected("A"));
    }

    #[tokio::test]
    async fn load_returns_none_when_both_missing() {
        let dir = TempDir::new().unwrap();
        assert!(manager(&dir).load().await.is_none());
    }

    #[tokio::test]
    async fn resume_keeps_progress_and_adopts_run_id() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = manager(&dir);
            let _ = mgr.initialize("run1", false).await;
            mgr.mark_collected("A");
            mgr.update_progress(Some(3), Some(1), None);
            mgr.save(true).await.unwrap();
        }

        let mgr = manager(&dir);
        let state = mgr.initialize("run2", true).await;
        assert_eq!(state.run_id, "run2");
        assert!(state.is_running);
        assert_eq!(state.progress.current_page, 3);
        assert!(state.is_collected("A"));
        assert_eq!(mgr.get_resume_point(), (3, 1));
    }

    #[tokio::test]
    async fn completed_checkpoint_is_not_resumed() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = manager(&dir);
            let _ = mgr.initialize("run1", false).await;
            mgr.mark_collected("A");
            mgr.mark_completed().await.unwrap();
        }

        let mgr = manager(&dir);
        let state = mgr.initialize("run2", true).await;
        assert!(!state.is_collected("A"));
        assert_eq!(state.progress.current_page, 1);
    }

    #[tokio::test]
    async fn resume_false_starts_fresh() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = manager(&dir);
            let _ = mgr.initialize("run1", false).await;
            mgr.mark_collected("A");
            mgr.save(true).await.unwrap();
        }

        let mgr = manager(&dir);
        let state = mgr.initialize("run2", false).await;
        assert_eq!(state.statistics.total_collected, 0);
    }

    #[tokio::test]
    async fn cleanup_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let _ = mgr.initialize("run1", false).await;
        mgr.save(true).await.unwrap();
        mgr.save(true).await.unwrap();
        mgr.cleanup().await.unwrap();
        assert!(mgr.load().await.is_none());
    }
}
