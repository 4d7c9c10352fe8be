//! Crawler error taxonomy
//!
//! Layered error types for the whole pipeline. Per-item failures (scrape,
//! navigation, parse) are contained by the orchestrator; repository and
//! configuration failures escalate.

use thiserror::Error;

/// Unified error type for the crawling pipeline.
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Invalid item fields: missing id, negative price, illegal status transition.
    #[error("invalid bid data: {message}")]
    InvalidBidData {
        message: String,
        field: Option<String>,
    },

    /// Item id already stored. Benign unless strict mode is enabled.
    #[error("duplicate bid notice: {bid_id}")]
    DuplicateBid { bid_id: String },

    /// Page failed to produce the expected structure.
    #[error("scrape failed: {message}")]
    Scrape {
        message: String,
        selector: Option<String>,
        url: Option<String>,
    },

    /// Page-movement failure (goto, next page, go back).
    #[error("navigation failed: {message}")]
    Navigation {
        message: String,
        url: Option<String>,
    },

    /// Failure to coerce raw text into a typed value.
    #[error("parse failed: {message}")]
    Parse {
        message: String,
        raw: Option<String>,
    },

    /// Durable-store I/O failure.
    #[error("repository error: {0}")]
    Repository(String),

    /// Invalid or missing setting detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// All retries for a wrapped operation failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<CrawlerError>,
    },
}

impl CrawlerError {
    /// Shorthand for a scrape error without selector/url context.
    pub fn scrape(message: impl Into<String>) -> Self {
        Self::Scrape {
            message: message.into(),
            selector: None,
            url: None,
        }
    }

    /// Shorthand for a navigation error carrying the target url.
    pub fn navigation(message: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
            url: Some(url.into()),
        }
    }

    /// Shorthand for a parse error carrying the raw input.
    pub fn parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            raw: Some(raw.into()),
        }
    }

    /// Shorthand for an invalid-data error on a named field.
    pub fn invalid_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidBidData {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether the default retry predicate should retry this error.
    ///
    /// Transient page-level failures retry; data, duplicate, repository and
    /// configuration errors propagate immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Scrape { .. } | Self::Navigation { .. })
    }

    /// Coarse label used for metrics and the failed-item log.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBidData { .. } => "invalid_data",
            Self::DuplicateBid { .. } => "duplicate",
            Self::Scrape { .. } => "scrape",
            Self::Navigation { .. } => "navigation",
            Self::Parse { .. } => "parse",
            Self::Repository(_) => "repository",
            Self::Configuration(_) => "configuration",
            Self::RetryExhausted { .. } => "retry_exhausted",
        }
    }
}

impl From<reqwest::Error> for CrawlerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Navigation {
            message: err.to_string(),
            url: err.url().map(|u| u.to_string()),
        }
    }
}

impl From<std::io::Error> for CrawlerError {
    fn from(err: std::io::Error) -> Self {
        Self::Repository(err.to_string())
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Repository(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CrawlerError::scrape("timeout").is_retryable());
        assert!(CrawlerError::navigation("net down", "http://x").is_retryable());
        assert!(!CrawlerError::parse("bad price", "abc").is_retryable());
        assert!(!CrawlerError::Repository("disk full".into()).is_retryable());
        assert!(
            !CrawlerError::DuplicateBid {
                bid_id: "1".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn retry_exhausted_carries_source() {
        let err = CrawlerError::RetryExhausted {
            attempts: 4,
            last: Box::new(CrawlerError::scrape("selector missing")),
        };
        assert_eq!(err.kind(), "retry_exhausted");
        assert!(err.to_string().contains("4 attempts"));
    }
}
