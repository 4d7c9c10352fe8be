//! List page scraper
//!
//! Parses the paginated bid-notice table into [`BidNotice`] summaries.
//! Column positions and pagination markup come from the selector document;
//! the defaults below match the common 나라장터 list layout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::bid_notice::{BidNotice, BidNoticeList, BidStatus, BidType};
use crate::errors::CrawlerError;
use crate::infrastructure::browser::{BrowserPage, ElementHandle};
use crate::infrastructure::config::SelectorSet;
use crate::infrastructure::parsing::{clean_text, extract_bid_id, parse_datetime, parse_korean_price};
use crate::scrapers::ListScraper;

static ONCLICK_URL: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r#"location\.href\s*=\s*['"]([^'"]+)['"]"#).unwrap(),
        Regex::new(r#"window\.open\s*\(['"]([^'"]+)['"]"#).unwrap(),
        Regex::new(r#"fnDetail\s*\(['"]([^'"]+)['"]"#).unwrap(),
    ]
});
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d,]+").unwrap());
static PAGE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"page=\d+").unwrap());

const ITEMS_PER_PAGE: u32 = 10;

fn default_selector(key: &str) -> &'static str {
    match key {
        "table" => "table.list_table, table.tb_list, #resultList table",
        "rows" => "table tbody tr",
        "no_data" => ".no_data, .nodata",
        "page_links" => ".pagination a, .paging a",
        "current_page" => ".pagination .on, .paging .current",
        "total_count" => ".total_count, .count, #totalCnt",
        _ => "",
    }
}

/// Selector-driven scraper for the notice list table.
pub struct BidListScraper {
    selectors: SelectorSet,
    keyword: Option<String>,
    bid_type: Option<String>,
    wait_timeout: Duration,
}

impl BidListScraper {
    #[must_use]
    pub fn new(selectors: SelectorSet) -> Self {
        Self {
            selectors,
            keyword: None,
            bid_type: None,
            wait_timeout: Duration::from_secs(10),
        }
    }

    /// Restricts results to titles containing the keyword.
    #[must_use]
    pub fn with_keyword(mut self, keyword: Option<String>) -> Self {
        self.keyword = keyword;
        self
    }

    /// Restricts results to one bid type label (물품, 용역, ...).
    #[must_use]
    pub fn with_bid_type(mut self, bid_type: Option<String>) -> Self {
        self.bid_type = bid_type;
        self
    }

    fn selector(&self, key: &str) -> String {
        self.selectors
            .get(key)
            .map_or_else(|| default_selector(key).to_string(), ToString::to_string)
    }

    async fn wait_for_table(&self, page: &dyn BrowserPage) -> Result<bool, CrawlerError> {
        let table = self.selector("table");
        if page.wait_for_selector(&table, self.wait_timeout).await?.is_some() {
            return Ok(true);
        }
        let no_data = self.selector("no_data");
        if page.wait_for_selector(&no_data, Duration::from_secs(2)).await?.is_some() {
            debug!("list page reports no results");
            return Ok(false);
        }
        Err(CrawlerError::Scrape {
            message: "list table not found".into(),
            selector: Some(table),
            url: Some(page.url().await),
        })
    }

    fn parse_row(&self, row: &ElementHandle, index: usize) -> Option<BidNotice> {
        let cells = row.select("td");
        if cells.len() < 3 {
            return None;
        }

        let cell_text = |i: usize| cells.get(i).map(|c| clean_text(c.text_content())).unwrap_or_default();

        let raw_id = cell_text(1);
        let bid_id = extract_bid_id(&raw_id).unwrap_or_else(|| format!("UNKNOWN_{index}"));

        let (title, detail_url) = extract_title_and_url(&cells);
        if title.is_empty() {
            return None;
        }

        let mut notice = match BidNotice::new(bid_id, title) {
            Ok(notice) => notice,
            Err(err) => {
                warn!(row = index, %err, "skipping invalid row");
                return None;
            }
        };
        notice.organization = non_empty(cell_text(3));
        notice.bid_type = BidType::from_label(&cell_text(4));
        notice.status = BidStatus::from_label(&cell_text(5));
        notice.deadline = parse_datetime(&cell_text(6));
        notice.estimated_price = parse_korean_price(&cell_text(7));
        notice.detail_url = detail_url;
        notice.crawled_at = Utc::now();
        Some(notice)
    }

    fn matches_filters(&self, notice: &BidNotice) -> bool {
        if let Some(keyword) = &self.keyword {
            if !notice.title.contains(keyword.as_str()) {
                return false;
            }
        }
        if let Some(bid_type) = &self.bid_type {
            if notice.bid_type != BidType::from_label(bid_type) {
                return false;
            }
        }
        true
    }

    async fn pagination_info(&self, page: &dyn BrowserPage) -> Result<(u32, u32, u32), CrawlerError> {
        let mut total_count = 0u32;
        let mut current_page = 1u32;
        let mut total_pages = 1u32;

        if let Some(el) = page
            .wait_for_selector(&self.selector("total_count"), Duration::from_secs(1))
            .await?
        {
            if let Some(m) = COUNT.find(el.text_content()) {
                total_count = m.as_str().replace(',', "").parse().unwrap_or(0);
            }
        }

        if let Some(el) = page
            .wait_for_selector(&self.selector("current_page"), Duration::from_secs(1))
            .await?
        {
            if let Some(m) = DIGITS.find(el.text_content()) {
                current_page = m.as_str().parse().unwrap_or(1);
            }
        }

        let links = page.query_selector_all(&self.selector("page_links")).await?;
        let max_linked = links
            .iter()
            .filter_map(|link| DIGITS.find(link.text_content()))
            .filter_map(|m| m.as_str().parse::<u32>().ok())
            .max();
        if let Some(max) = max_linked {
            total_pages = total_pages.max(max);
        }
        if total_count > 0 && total_pages == 1 {
            total_pages = total_count.div_ceil(ITEMS_PER_PAGE);
        }
        total_pages = total_pages.max(current_page);

        Ok((total_count, current_page, total_pages))
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn extract_title_and_url(cells: &[ElementHandle]) -> (String, Option<String>) {
    let Some(title_cell) = cells.get(2) else {
        return (String::new(), None);
    };

    if let Some(link) = title_cell.select("a").into_iter().next() {
        let title = clean_text(link.text_content());
        let href = link
            .get_attribute("href")
            .filter(|h| !h.is_empty() && *h != "#")
            .map(ToString::to_string)
            .or_else(|| link.get_attribute("onclick").and_then(url_from_onclick));
        return (title, href);
    }

    (clean_text(title_cell.text_content()), None)
}

fn url_from_onclick(onclick: &str) -> Option<String> {
    ONCLICK_URL
        .iter()
        .find_map(|pattern| pattern.captures(onclick).map(|caps| caps[1].to_string()))
}

#[async_trait]
impl ListScraper for BidListScraper {
    async fn scrape(&self, page: &dyn BrowserPage) -> Result<BidNoticeList, CrawlerError> {
        if !self.wait_for_table(page).await? {
            return Ok(BidNoticeList::default());
        }

        let rows = page.query_selector_all(&self.selector("rows")).await?;
        debug!(rows = rows.len(), "list rows found");

        let items: Vec<BidNotice> = rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| self.parse_row(row, i))
            .filter(|notice| self.matches_filters(notice))
            .collect();

        let (total_count, current_page, total_pages) = self.pagination_info(page).await?;
        Ok(BidNoticeList {
            items,
            total_count,
            current_page,
            total_pages,
            has_next: current_page < total_pages,
        })
    }

    async fn go_to_page(&self, page: &dyn BrowserPage, page_num: u32) -> Result<bool, CrawlerError> {
        // prefer the numbered pagination link when present
        let links = page.query_selector_all(&self.selector("page_links")).await?;
        let target = page_num.to_string();
        if let Some(link) = links.iter().find(|l| clean_text(l.text_content()) == target) {
            if let Some(href) = link.get_attribute("href").filter(|h| !h.is_empty() && *h != "#") {
                let current = page.url().await;
                page.goto(&crate::infrastructure::parsing::normalize_url(href, &current))
                    .await?;
                return self.wait_for_table(page).await.map(|_| true);
            }
        }

        // fall back to rewriting the page query parameter
        let current = page.url().await;
        let next_url = if PAGE_PARAM.is_match(&current) {
            PAGE_PARAM.replace(&current, format!("page={page_num}")).to_string()
        } else {
            let separator = if current.contains('?') { '&' } else { '?' };
            format!("{current}{separator}page={page_num}")
        };
        page.goto(&next_url).await?;
        self.wait_for_table(page).await.map(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onclick_url_extraction() {
        assert_eq!(
            url_from_onclick("location.href='/detail?id=7'; return false;").as_deref(),
            Some("/detail?id=7")
        );
        assert_eq!(
            url_from_onclick("window.open('/popup/detail?id=7')").as_deref(),
            Some("/popup/detail?id=7")
        );
        assert_eq!(
            url_from_onclick("fnDetail('20240115-001')").as_deref(),
            Some("20240115-001")
        );
        assert_eq!(url_from_onclick("doNothing()"), None);
    }

    #[test]
    fn row_parsing_from_fragment() {
        let html = r#"<table><tbody><tr>
            <td>1</td>
            <td>20240115-001</td>
            <td><a href="/detail?id=1">청사 도로 보수공사</a></td>
            <td>서울특별시</td>
            <td>공사</td>
            <td>공고중</td>
            <td>2024-02-01 17:00</td>
            <td>1,200,000,000원</td>
        </tr></tbody></table>"#;
        let fragment = scraper::Html::parse_fragment(html);
        let selector = scraper::Selector::parse("tr").unwrap();
        let row = crate::infrastructure::browser::ElementHandle::new(
            String::new(),
            std::collections::HashMap::new(),
            fragment.select(&selector).next().unwrap().html(),
        );

        let scraper = BidListScraper::new(SelectorSet::default());
        let notice = scraper.parse_row(&row, 0).unwrap();
        assert_eq!(notice.bid_notice_id, "20240115-001");
        assert_eq!(notice.title, "청사 도로 보수공사");
        assert_eq!(notice.bid_type, BidType::Construction);
        assert_eq!(notice.status, BidStatus::Open);
        assert_eq!(notice.detail_url.as_deref(), Some("/detail?id=1"));
        assert_eq!(
            notice.estimated_price,
            Some(rust_decimal::Decimal::from(1_200_000_000_i64))
        );
        assert!(notice.deadline.is_some());
    }

    #[test]
    fn keyword_filter() {
        let scraper = BidListScraper::new(SelectorSet::default()).with_keyword(Some("도로".into()));
        let mut notice = BidNotice::new("1", "청사 도로 보수공사").unwrap();
        assert!(scraper.matches_filters(&notice));
        notice.title = "소프트웨어 유지보수".into();
        assert!(!scraper.matches_filters(&notice));
    }
}
