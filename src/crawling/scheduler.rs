//! Crawl scheduler
//!
//! Triggers orchestrator runs on a fixed interval or a cron expression.
//! Runs are strictly serialized: a tick that fires while a run is still in
//! progress is dropped, never queued. Every tick resumes (`resume=true`) so
//! an interrupted run continues instead of restarting.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::crawling::orchestrator::CrawlOrchestrator;
use crate::errors::CrawlerError;
use crate::infrastructure::config::{SchedulerConfig, SchedulerMode};

/// Generates the timestamp-derived id for one scheduled run.
#[must_use]
pub fn generate_run_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Completes on SIGINT or, on unix, SIGTERM. A listener that cannot be
/// installed is logged and ignored.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "SIGINT listener failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(%err, "SIGTERM listener failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Periodic crawl trigger wrapping one orchestrator.
pub struct CrawlScheduler {
    config: SchedulerConfig,
    orchestrator: Arc<CrawlOrchestrator>,
}

impl CrawlScheduler {
    /// Validates the schedule up front; a bad cron expression fails here.
    pub fn new(config: SchedulerConfig, orchestrator: Arc<CrawlOrchestrator>) -> Result<Self, CrawlerError> {
        config.validate()?;
        if config.mode == SchedulerMode::Cron {
            // parse once at startup so the run loop cannot be surprised
            Self::parse_cron(&config.cron_expression)?;
        }
        Ok(Self { config, orchestrator })
    }

    /// The `cron` crate wants a seconds field; the configured expression is
    /// the classic five-field form.
    fn parse_cron(expression: &str) -> Result<Schedule, CrawlerError> {
        Schedule::from_str(&format!("0 {expression}"))
            .map_err(|e| CrawlerError::Configuration(format!("invalid cron expression '{expression}': {e}")))
    }

    async fn run_once(&self) {
        let run_id = generate_run_id();
        info!(%run_id, "scheduled crawl starting");
        match self.orchestrator.run(&run_id, true).await {
            Ok(state) => info!(
                %run_id,
                collected = state.statistics.total_collected,
                errors = state.statistics.errors,
                "scheduled crawl finished"
            ),
            Err(err) => error!(%run_id, %err, "scheduled crawl failed"),
        }
    }

    /// Runs until SIGINT/SIGTERM. The signal cancels the orchestrator token;
    /// the run in flight drains cooperatively and no further ticks fire.
    pub async fn run_forever(&self, run_immediately: bool) -> Result<(), CrawlerError> {
        info!(
            mode = ?self.config.mode,
            interval_minutes = self.config.interval_minutes,
            cron = %self.config.cron_expression,
            "scheduler started"
        );

        let cancel = self.orchestrator.cancellation_token();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown requested, draining current run");
                cancel.cancel();
            });
        }

        if run_immediately {
            self.run_once().await;
        }

        match self.config.mode {
            SchedulerMode::Interval => {
                let period = Duration::from_secs(self.config.interval_minutes * 60);
                let mut ticks = tokio::time::interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticks.tick().await; // the immediate first tick

                while !cancel.is_cancelled() {
                    tokio::select! {
                        _ = ticks.tick() => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            self.run_once().await;
                            // a tick that came due while the run was in
                            // flight would otherwise fire right now; consume
                            // it so the next run waits for the next period
                            // boundary instead of starting back-to-back
                            while ticks.tick().now_or_never().is_some() {}
                        }
                        () = cancel.cancelled() => break,
                    }
                }
            }
            SchedulerMode::Cron => {
                let schedule = Self::parse_cron(&self.config.cron_expression)?;
                while !cancel.is_cancelled() {
                    let Some(next) = schedule.upcoming(Utc).next() else {
                        warn!("cron schedule has no upcoming occurrence, stopping");
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    info!(next = %next, "next scheduled crawl");
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            self.run_once().await;
                        }
                        () = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!("scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_parses() {
        assert!(CrawlScheduler::parse_cron("0 */6 * * *").is_ok());
        assert!(CrawlScheduler::parse_cron("30 2 * * 1-5").is_ok());
        assert!(CrawlScheduler::parse_cron("not a cron").is_err());
    }

    #[test]
    fn run_id_is_timestamp_shaped() {
        let id = generate_run_id();
        assert_eq!(id.len(), 15);
        assert_eq!(&id[8..9], "_");
        assert!(id[..8].chars().all(|c| c.is_ascii_digit()));
    }
}
