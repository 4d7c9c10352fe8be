//! Crawl metrics
//!
//! Prometheus counters, gauges and histograms describing a crawl run.
//! Strictly observational: every recording method is infallible and the
//! engine never branches on metric state. `gather_text` renders the
//! exposition format for an HTTP endpoint or a final dump.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Registered metric family handles for one crawler process.
pub struct CrawlerMetrics {
    registry: Registry,

    items_total: IntCounterVec,
    pages_total: IntCounter,
    retries_total: IntCounterVec,
    errors_total: IntCounterVec,

    current_page: IntGauge,
    total_pages: IntGauge,
    items_collected: IntGauge,
    active_workers: IntGauge,
    queue_size: IntGauge,
    crawl_running: IntGauge,

    request_duration: HistogramVec,
    item_processing_duration: Histogram,
}

impl CrawlerMetrics {
    /// Creates and registers the metric families under the namespace prefix.
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let items_total = IntCounterVec::new(
            Opts::new("items_total", "Collected items by final status").namespace(namespace),
            &["status"],
        )?;
        let pages_total = IntCounter::with_opts(
            Opts::new("pages_total", "List pages scanned").namespace(namespace),
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Retry attempts by reason").namespace(namespace),
            &["reason"],
        )?;
        let errors_total = IntCounterVec::new(
            Opts::new("errors_total", "Errors by type").namespace(namespace),
            &["type"],
        )?;

        let current_page = IntGauge::with_opts(
            Opts::new("current_page", "Page currently being scanned").namespace(namespace),
        )?;
        let total_pages = IntGauge::with_opts(
            Opts::new("total_pages", "Total pages reported by the site").namespace(namespace),
        )?;
        let items_collected = IntGauge::with_opts(
            Opts::new("items_collected", "Items collected so far this run").namespace(namespace),
        )?;
        let active_workers = IntGauge::with_opts(
            Opts::new("active_workers", "Consumer workers currently running").namespace(namespace),
        )?;
        let queue_size = IntGauge::with_opts(
            Opts::new("queue_size", "Tasks waiting in the bounded queue").namespace(namespace),
        )?;
        let crawl_running = IntGauge::with_opts(
            Opts::new("crawl_running", "1 while a crawl run is active").namespace(namespace),
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Page fetch duration by request type")
                .namespace(namespace)
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["type"],
        )?;
        let item_processing_duration = Histogram::with_opts(
            HistogramOpts::new("item_processing_duration_seconds", "Per-item processing duration")
                .namespace(namespace)
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(items_total.clone()))?;
        registry.register(Box::new(pages_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(current_page.clone()))?;
        registry.register(Box::new(total_pages.clone()))?;
        registry.register(Box::new(items_collected.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;
        registry.register(Box::new(crawl_running.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(item_processing_duration.clone()))?;

        Ok(Self {
            registry,
            items_total,
            pages_total,
            retries_total,
            errors_total,
            current_page,
            total_pages,
            items_collected,
            active_workers,
            queue_size,
            crawl_running,
            request_duration,
            item_processing_duration,
        })
    }

    pub fn start_crawl(&self) {
        self.crawl_running.set(1);
    }

    pub fn end_crawl(&self) {
        self.crawl_running.set(0);
        self.active_workers.set(0);
        self.queue_size.set(0);
    }

    pub fn record_item(&self, status: &str) {
        self.items_total.with_label_values(&[status]).inc();
        self.items_collected.inc();
    }

    pub fn record_page(&self, page_num: u32, total_pages: Option<u32>) {
        self.pages_total.inc();
        self.current_page.set(i64::from(page_num));
        if let Some(total) = total_pages {
            self.total_pages.set(i64::from(total));
        }
    }

    pub fn record_retry(&self, reason: &str) {
        self.retries_total.with_label_values(&[reason]).inc();
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total.with_label_values(&[error_type]).inc();
    }

    pub fn set_workers(&self, count: i64) {
        self.active_workers.set(count);
    }

    pub fn set_queue_size(&self, size: i64) {
        self.queue_size.set(size);
    }

    pub fn observe_request(&self, request_type: &str, seconds: f64) {
        self.request_duration.with_label_values(&[request_type]).observe(seconds);
    }

    pub fn observe_item_processing(&self, seconds: f64) {
        self.item_processing_duration.observe(seconds);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&self.registry.gather()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exposes() {
        let metrics = CrawlerMetrics::new("test_ns").unwrap();
        metrics.start_crawl();
        metrics.record_item("success");
        metrics.record_item("failed");
        metrics.record_page(3, Some(12));
        metrics.record_retry("scrape");
        metrics.record_error("navigation");
        metrics.observe_request("detail_page", 0.42);

        let text = metrics.gather_text();
        assert!(text.contains("test_ns_items_total"));
        assert!(text.contains("status=\"success\""));
        assert!(text.contains("test_ns_current_page 3"));
        assert!(text.contains("test_ns_crawl_running 1"));

        metrics.end_crawl();
        assert!(metrics.gather_text().contains("test_ns_crawl_running 0"));
    }
}
