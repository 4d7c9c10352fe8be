//! robots.txt checker
//!
//! Fetches and caches one parsed robots.txt per host, answers `can_fetch`
//! for the crawler's user agent and surfaces `Crawl-delay` so the engine can
//! pace itself. A missing or unreadable robots.txt allows everything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::errors::CrawlerError;
use crate::infrastructure::http_client::HttpClient;

/// Rules extracted from one robots.txt for our user agent.
#[derive(Debug, Clone, Default)]
struct RobotsRules {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Longest-match evaluation: a more specific Allow overrides Disallow.
    fn can_fetch(&self, path: &str) -> bool {
        let matched_disallow = self
            .disallow
            .iter()
            .filter(|rule| !rule.is_empty() && path.starts_with(rule.as_str()))
            .map(String::len)
            .max();
        let Some(disallow_len) = matched_disallow else {
            return true;
        };
        self.allow
            .iter()
            .filter(|rule| path.starts_with(rule.as_str()))
            .map(String::len)
            .max()
            .is_some_and(|allow_len| allow_len >= disallow_len)
    }
}

/// Parses the groups of a robots.txt, keeping rules that apply to
/// `user_agent` (token match) or `*`.
fn parse_robots(body: &str, user_agent: &str) -> RobotsRules {
    let agent_token = user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or(user_agent)
        .to_ascii_lowercase();

    let mut rules = RobotsRules::default();
    let mut group_applies = false;
    let mut in_agent_line_run = false;

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                let agent = value.to_ascii_lowercase();
                let applies = agent == "*" || agent_token.contains(&agent) || agent.contains(&agent_token);
                if in_agent_line_run {
                    group_applies |= applies;
                } else {
                    group_applies = applies;
                }
                in_agent_line_run = true;
            }
            "disallow" if group_applies => {
                in_agent_line_run = false;
                rules.disallow.push(value.to_string());
            }
            "allow" if group_applies => {
                in_agent_line_run = false;
                rules.allow.push(value.to_string());
            }
            "crawl-delay" if group_applies => {
                in_agent_line_run = false;
                if let Ok(secs) = value.parse::<f64>() {
                    rules.crawl_delay = Some(Duration::from_secs_f64(secs.max(0.0)));
                }
            }
            _ => in_agent_line_run = false,
        }
    }
    rules
}

/// Cached robots.txt consultation keyed by host.
pub struct RobotsChecker {
    client: Arc<HttpClient>,
    user_agent: String,
    cache: Mutex<HashMap<String, RobotsRules>>,
}

impl RobotsChecker {
    #[must_use]
    pub fn new(client: Arc<HttpClient>, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the crawler may fetch the URL.
    pub async fn can_fetch(&self, url: &str) -> Result<bool, CrawlerError> {
        let parsed = Url::parse(url).map_err(|e| CrawlerError::navigation(format!("invalid url: {e}"), url))?;
        let path = parsed.path().to_string();
        let rules = self.rules_for(&parsed).await;
        Ok(rules.can_fetch(&path))
    }

    /// `Crawl-delay` for the URL's host, when declared.
    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        let parsed = Url::parse(url).ok()?;
        self.rules_for(&parsed).await.crawl_delay
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn rules_for(&self, url: &Url) -> RobotsRules {
        let host = url.host_str().unwrap_or_default().to_string();
        {
            let cache = self.cache.lock().await;
            if let Some(rules) = cache.get(&host) {
                return rules.clone();
            }
        }

        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        let rules = match self.client.get_text(&robots_url).await {
            Ok(body) => {
                debug!(%host, "robots.txt fetched");
                parse_robots(&body, &self.user_agent)
            }
            Err(err) => {
                warn!(%host, %err, "robots.txt unavailable, allowing all");
                RobotsRules::default()
            }
        };
        self.cache.lock().await.insert(host, rules.clone());
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# sample
User-agent: *
Disallow: /private/
Allow: /private/open/
Crawl-delay: 2

User-agent: BadBot
Disallow: /
";

    #[test]
    fn wildcard_group_applies() {
        let rules = parse_robots(ROBOTS, "BidCrawler/1.0");
        assert!(rules.can_fetch("/bids/list"));
        assert!(!rules.can_fetch("/private/data"));
        assert!(rules.can_fetch("/private/open/data"));
        assert_eq!(rules.crawl_delay, Some(Duration::from_secs(2)));
    }

    #[test]
    fn named_group_overrides() {
        let rules = parse_robots(ROBOTS, "BadBot/2.0");
        // BadBot matches its own group only: everything under / is blocked
        assert!(!rules.can_fetch("/bids/list"));
    }

    #[test]
    fn empty_body_allows_all() {
        let rules = parse_robots("", "BidCrawler/1.0");
        assert!(rules.can_fetch("/anything"));
        assert_eq!(rules.crawl_delay, None);
    }

    #[test]
    fn fractional_crawl_delay() {
        let rules = parse_robots("User-agent: *\nCrawl-delay: 0.5\n", "BidCrawler/1.0");
        assert_eq!(rules.crawl_delay, Some(Duration::from_millis(500)));
    }
}
