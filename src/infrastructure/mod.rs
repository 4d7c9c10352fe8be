//! Infrastructure layer: configuration, logging, HTTP/browser plumbing,
//! persistence and observability.

pub mod browser;
pub mod config;
pub mod csv_repository;
pub mod http_client;
pub mod json_repository;
pub mod logging;
pub mod metrics;
pub mod parsing;
pub mod retry;
pub mod robots;
pub mod state_manager;

pub use browser::{BrowserPage, BrowserSession, ElementHandle, HttpBrowserSession};
pub use config::{CrawlerConfig, SelectorConfig};
pub use csv_repository::{CompositeRepository, CsvRepository};
pub use http_client::{HttpClient, HttpClientConfig};
pub use json_repository::{JsonRepository, JsonRepositoryOptions};
pub use metrics::CrawlerMetrics;
pub use retry::RetryPolicy;
pub use robots::RobotsChecker;
pub use state_manager::StateManager;
