//! Crawl checkpoint model
//!
//! Progress pointer, cumulative statistics and the collected-id set that
//! together allow an interrupted run to resume where it stopped.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of the crawl within the paginated list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlProgress {
    /// Page currently being scanned (1-based).
    pub current_page: u32,
    /// Index of the next item within the current page.
    pub current_index: u32,
    pub total_pages: Option<u32>,
    /// Highest page fully scanned and enqueued by the producer. This frontier
    /// may lead the durable-save frontier after a crash; the collected-id set
    /// makes the overlap safe on resume.
    pub last_completed_page: u32,

    /// Search filters active for this run; a resumed run must match them.
    pub keyword: Option<String>,
    pub bid_type: Option<String>,
}

impl Default for CrawlProgress {
    fn default() -> Self {
        Self {
            current_page: 1,
            current_index: 0,
            total_pages: None,
            last_completed_page: 0,
            keyword: None,
            bid_type: None,
        }
    }
}

impl CrawlProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cumulative run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStatistics {
    pub total_collected: u64,
    pub list_collected: u64,
    pub detail_collected: u64,
    pub errors: u64,
    pub retries: u64,
    pub skipped_duplicates: u64,
}

impl CrawlStatistics {
    /// `total / (total + errors)` as a percentage; 100 when both are zero.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_collected + self.errors;
        if total == 0 {
            return 100.0;
        }
        (self.total_collected as f64 / total as f64) * 100.0
    }
}

/// One permanently failed item, kept for post-run inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub info: serde_json::Value,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// The persisted checkpoint document.
///
/// Loaded at orchestrator start when resuming, written on every completed
/// page, every `save_interval` items and unconditionally at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlState {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub progress: CrawlProgress,
    #[serde(default)]
    pub statistics: CrawlStatistics,
    /// Dedup authority within a run and across resumed runs. Serialized as an
    /// ordered list.
    #[serde(default)]
    pub collected_ids: BTreeSet<String>,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
}

impl CrawlState {
    /// Fresh state for a new run.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            started_at: now,
            last_updated_at: now,
            is_running: false,
            is_completed: false,
            last_error: None,
            progress: CrawlProgress::new(),
            statistics: CrawlStatistics::default(),
            collected_ids: BTreeSet::new(),
            failed_items: Vec::new(),
        }
    }

    /// Marks an id as collected.
    ///
    /// Returns `false` (and counts a skipped duplicate) when the id was
    /// already present.
    pub fn mark_collected(&mut self, bid_id: &str) -> bool {
        if self.collected_ids.contains(bid_id) {
            self.statistics.skipped_duplicates += 1;
            return false;
        }
        self.collected_ids.insert(bid_id.to_string());
        self.statistics.total_collected += 1;
        self.touch();
        true
    }

    #[must_use]
    pub fn is_collected(&self, bid_id: &str) -> bool {
        self.collected_ids.contains(bid_id)
    }

    pub fn record_error(&mut self, error: &str, item_info: Option<serde_json::Value>) {
        self.statistics.errors += 1;
        self.last_error = Some(error.to_string());
        self.touch();
        if let Some(info) = item_info {
            self.failed_items.push(FailedItem {
                info,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    pub fn record_retry(&mut self) {
        self.statistics.retries += 1;
        self.touch();
    }

    pub fn update_progress(&mut self, page: Option<u32>, index: Option<u32>, total_pages: Option<u32>) {
        if let Some(page) = page {
            self.progress.current_page = page;
        }
        if let Some(index) = index {
            self.progress.current_index = index;
        }
        if let Some(total) = total_pages {
            self.progress.total_pages = Some(total);
        }
        self.touch();
    }

    /// Advances the completed-page frontier and resets the in-page index.
    pub fn complete_page(&mut self, page: u32) {
        self.progress.last_completed_page = self.progress.last_completed_page.max(page);
        self.progress.current_index = 0;
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.is_completed = true;
        self.is_running = false;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_collected_counts_once() {
        let mut state = CrawlState::new("run1");
        assert!(state.mark_collected("A"));
        assert!(!state.mark_collected("A"));
        assert!(state.mark_collected("B"));
        assert_eq!(state.statistics.total_collected, 2);
        assert_eq!(state.statistics.skipped_duplicates, 1);
        assert_eq!(state.statistics.total_collected, state.collected_ids.len() as u64);
    }

    #[test]
    fn success_rate_defaults_to_hundred() {
        let stats = CrawlStatistics::default();
        assert!((stats.success_rate() - 100.0).abs() < f64::EPSILON);

        let stats = CrawlStatistics {
            total_collected: 3,
            errors: 1,
            ..CrawlStatistics::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn complete_page_is_monotonic() {
        let mut state = CrawlState::new("run1");
        state.update_progress(Some(3), Some(7), None);
        state.complete_page(3);
        assert_eq!(state.progress.last_completed_page, 3);
        assert_eq!(state.progress.current_index, 0);

        // a lower page never regresses the frontier
        state.complete_page(2);
        assert_eq!(state.progress.last_completed_page, 3);
    }

    #[test]
    fn completed_implies_not_running() {
        let mut state = CrawlState::new("run1");
        state.is_running = true;
        state.mark_completed();
        assert!(state.is_completed);
        assert!(!state.is_running);
        assert!(state.started_at <= state.last_updated_at);
    }

    #[test]
    fn record_error_appends_failed_item() {
        let mut state = CrawlState::new("run1");
        state.record_error("timeout", None);
        state.record_error("selector missing", Some(serde_json::json!({"bid_notice_id": "X"})));
        assert_eq!(state.statistics.errors, 2);
        assert_eq!(state.failed_items.len(), 1);
        assert_eq!(state.last_error.as_deref(), Some("selector missing"));
    }

    #[test]
    fn serializes_ids_as_ordered_list() {
        let mut state = CrawlState::new("run1");
        state.mark_collected("B");
        state.mark_collected("A");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["collected_ids"], serde_json::json!(["A", "B"]));

        let back: CrawlState = serde_json::from_value(json).unwrap();
        assert_eq!(back.collected_ids, state.collected_ids);
    }
}
