//! Logging initialization
//!
//! Console and optional daily-rolling file output with env-filter based
//! levels. `RUST_LOG` wins over the configured level when set.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::infrastructure::config::LoggingConfig;

/// Initializes the global subscriber.
///
/// Returns the file-writer guard which must be held for the lifetime of the
/// process when file output is enabled.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut directives = config.level.clone();
    for (module, level) in &config.module_filters {
        directives.push_str(&format!(",{module}={level}"));
    }
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.console_output) {
        (true, console) => {
            std::fs::create_dir_all(&config.log_dir)
                .with_context(|| format!("failed to create log directory {:?}", config.log_dir))?;
            let file_appender = rolling::daily(&config.log_dir, "bid-crawler.log");
            let (file_writer, guard) = non_blocking(file_appender);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true);
                if console {
                    let console_layer = fmt::Layer::new().with_writer(std::io::stdout).with_target(false);
                    registry.with(file_layer).with(console_layer).init();
                } else {
                    registry.with(file_layer).init();
                }
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true);
                if console {
                    let console_layer = fmt::Layer::new().with_writer(std::io::stdout).with_target(false);
                    registry.with(file_layer).with(console_layer).init();
                } else {
                    registry.with(file_layer).init();
                }
            }
            Ok(Some(guard))
        }
        (false, _) => {
            if config.json_format {
                registry
                    .with(fmt::Layer::new().json().with_writer(std::io::stdout).with_target(true))
                    .init();
            } else {
                registry
                    .with(fmt::Layer::new().with_writer(std::io::stdout).with_target(false))
                    .init();
            }
            Ok(None)
        }
    }
}
