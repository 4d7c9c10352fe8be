//! Crawl engine: producer, consumer workers, orchestrator and scheduler.

pub mod consumer;
pub mod orchestrator;
pub mod producer;
pub mod scheduler;
pub mod tasks;

pub use consumer::ItemProcessor;
pub use orchestrator::CrawlOrchestrator;
pub use producer::{NavigatorOptions, PageNavigator};
pub use scheduler::{CrawlScheduler, generate_run_id, shutdown_signal};
pub use tasks::{CrawlTask, WorkItem};
