//! Browser session abstraction
//!
//! The crawl engine drives pages only through these traits. The shipped
//! implementation fetches server-rendered HTML over HTTP and answers
//! selector queries from the parsed document; page handles are cheap, so the
//! orchestrator gives the producer and every worker their own.
//!
//! `scraper::Html` is not `Send`, so documents are parsed inside synchronous
//! scopes and queries return owned [`ElementHandle`] values.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::CrawlerError;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::infrastructure::parsing::{clean_text, normalize_url};

/// Owned snapshot of a matched element.
#[derive(Debug, Clone, Default)]
pub struct ElementHandle {
    text: String,
    attributes: HashMap<String, String>,
    html: String,
}

impl ElementHandle {
    #[must_use]
    pub fn new(text: impl Into<String>, attributes: HashMap<String, String>, html: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes,
            html: html.into(),
        }
    }

    /// Normalized text content of the element subtree.
    #[must_use]
    pub fn text_content(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Queries within this element's subtree.
    #[must_use]
    pub fn select(&self, selector: &str) -> Vec<ElementHandle> {
        let Ok(parsed) = Selector::parse(selector) else {
            return Vec::new();
        };
        // table fragments parsed in body context lose their row/cell tags, so
        // give them a table context back
        let trimmed = self.html.trim_start().to_ascii_lowercase();
        let table_fragment = ["<tr", "<td", "<th", "<tbody", "<thead", "<tfoot"]
            .iter()
            .any(|tag| trimmed.starts_with(tag));
        let fragment = if table_fragment {
            Html::parse_fragment(&format!("<table>{}</table>", self.html))
        } else {
            Html::parse_fragment(&self.html)
        };
        fragment.select(&parsed).map(ElementHandle::from_element).collect()
    }

    fn from_element(el: scraper::ElementRef<'_>) -> Self {
        let text = clean_text(&el.text().collect::<Vec<_>>().join(" "));
        let attributes = el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            text,
            attributes,
            html: el.html(),
        }
    }
}

/// A navigable page handle.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigates to the URL and waits for the document.
    async fn goto(&self, url: &str) -> Result<(), CrawlerError>;

    /// Returns to the previous document in this page's history.
    async fn go_back(&self) -> Result<(), CrawlerError>;

    /// First element matching the selector, or `None` within the timeout.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, CrawlerError>;

    /// Every element matching the selector.
    async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>, CrawlerError>;

    /// Activates the first matching element (follows its link).
    async fn click(&self, selector: &str) -> Result<(), CrawlerError>;

    /// Current document URL.
    async fn url(&self) -> String;

    async fn close(&self) -> Result<(), CrawlerError>;
}

/// A browser-like session yielding page handles.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn start(&self) -> Result<(), CrawlerError>;
    async fn stop(&self) -> Result<(), CrawlerError>;
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, CrawlerError>;
}

struct PageState {
    url: String,
    html: String,
    history: Vec<(String, String)>,
}

/// Page handle backed by plain HTTP fetches of server-rendered documents.
pub struct HttpPage {
    client: Arc<HttpClient>,
    cancel: CancellationToken,
    state: Mutex<PageState>,
}

impl HttpPage {
    fn new(client: Arc<HttpClient>, cancel: CancellationToken) -> Self {
        Self {
            client,
            cancel,
            state: Mutex::new(PageState {
                url: String::new(),
                html: String::new(),
                history: Vec::new(),
            }),
        }
    }
}

fn select_all_in(html: &str, selector: &str) -> Result<Vec<ElementHandle>, CrawlerError> {
    let parsed = Selector::parse(selector).map_err(|e| CrawlerError::Scrape {
        message: format!("invalid selector: {e}"),
        selector: Some(selector.to_string()),
        url: None,
    })?;
    let document = Html::parse_document(html);
    Ok(document.select(&parsed).map(ElementHandle::from_element).collect())
}

#[async_trait]
impl BrowserPage for HttpPage {
    async fn goto(&self, url: &str) -> Result<(), CrawlerError> {
        let html = self.client.get_text_with_cancellation(url, &self.cancel).await?;
        let mut state = self.state.lock().await;
        if !state.url.is_empty() {
            let prev_url = std::mem::take(&mut state.url);
            let prev_html = std::mem::take(&mut state.html);
            state.history.push((prev_url, prev_html));
        }
        state.url = url.to_string();
        state.html = html;
        Ok(())
    }

    async fn go_back(&self) -> Result<(), CrawlerError> {
        let mut state = self.state.lock().await;
        let (url, html) = state
            .history
            .pop()
            .ok_or_else(|| CrawlerError::navigation("no previous document", state.url.clone()))?;
        state.url = url;
        state.html = html;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<Option<ElementHandle>, CrawlerError> {
        // the document is already complete after goto, so there is nothing to
        // wait for; answer from the snapshot
        let state = self.state.lock().await;
        Ok(select_all_in(&state.html, selector)?.into_iter().next())
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>, CrawlerError> {
        let state = self.state.lock().await;
        select_all_in(&state.html, selector)
    }

    async fn click(&self, selector: &str) -> Result<(), CrawlerError> {
        let (href, current_url) = {
            let state = self.state.lock().await;
            let element = select_all_in(&state.html, selector)?.into_iter().next().ok_or_else(|| {
                CrawlerError::Scrape {
                    message: "element not found".into(),
                    selector: Some(selector.to_string()),
                    url: Some(state.url.clone()),
                }
            })?;
            let href = element
                .get_attribute("href")
                .filter(|h| !h.is_empty() && *h != "#")
                .map(ToString::to_string);
            (href, state.url.clone())
        };

        let href = href.ok_or_else(|| {
            CrawlerError::navigation("element has no followable link", current_url.clone())
        })?;
        self.goto(&normalize_url(&href, &current_url)).await
    }

    async fn url(&self) -> String {
        self.state.lock().await.url.clone()
    }

    async fn close(&self) -> Result<(), CrawlerError> {
        let mut state = self.state.lock().await;
        state.url.clear();
        state.html.clear();
        state.history.clear();
        Ok(())
    }
}

/// Session over [`HttpPage`] handles sharing one rate-limited client.
pub struct HttpBrowserSession {
    client: Arc<HttpClient>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl HttpBrowserSession {
    pub fn new(config: &HttpClientConfig, cancel: CancellationToken) -> Result<Self, CrawlerError> {
        Ok(Self {
            client: Arc::new(HttpClient::new(config)?),
            cancel,
            started: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BrowserSession for HttpBrowserSession {
    async fn start(&self) -> Result<(), CrawlerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("browser session already started");
        } else {
            tracing::info!("browser session started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), CrawlerError> {
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("browser session stopped");
        Ok(())
    }

    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, CrawlerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(CrawlerError::Configuration(
                "browser session not started; call start() first".into(),
            ));
        }
        Ok(Arc::new(HttpPage::new(self.client.clone(), self.cancel.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_handle_nested_select() {
        let html = r#"<table><tr><td>20240115-001</td><td><a href="/detail?id=1">도로 보수공사</a></td></tr></table>"#;
        let fragment = Html::parse_fragment(html);
        let selector = Selector::parse("tr").unwrap();
        let row = ElementHandle::from_element(fragment.select(&selector).next().unwrap());

        let cells = row.select("td");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].text_content(), "20240115-001");

        let link = &row.select("a")[0];
        assert_eq!(link.get_attribute("href"), Some("/detail?id=1"));
        assert_eq!(link.text_content(), "도로 보수공사");
    }

    #[test]
    fn select_all_rejects_bad_selector() {
        assert!(select_all_in("<p></p>", ":::").is_err());
    }
}
