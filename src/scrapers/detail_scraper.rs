//! Detail page scraper
//!
//! Navigates to a notice's detail page and fills a [`BidNoticeDetail`] from
//! its information tables. Rows are read as th/td label-value pairs and
//! mapped by Korean label keywords, so column order and table count do not
//! matter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::domain::bid_notice::{BidNotice, BidNoticeDetail, BidStatus, BidType};
use crate::errors::CrawlerError;
use crate::infrastructure::browser::BrowserPage;
use crate::infrastructure::config::SelectorSet;
use crate::infrastructure::parsing::{clean_text, extract_bid_id, parse_datetime, parse_korean_price};
use crate::scrapers::DetailScraper;

fn default_selector(key: &str) -> &'static str {
    match key {
        "detail_container" => ".detail_view, .view_table, #detailView",
        "info_rows" => "table tr",
        "attachments" => ".attach_list a, .file_list a, a[href*='download']",
        _ => "",
    }
}

/// Selector-driven scraper for notice detail pages.
pub struct BidDetailScraper {
    selectors: SelectorSet,
    wait_timeout: Duration,
}

impl BidDetailScraper {
    #[must_use]
    pub fn new(selectors: SelectorSet) -> Self {
        Self {
            selectors,
            wait_timeout: Duration::from_secs(10),
        }
    }

    fn selector(&self, key: &str) -> String {
        self.selectors
            .get(key)
            .map_or_else(|| default_selector(key).to_string(), ToString::to_string)
    }

    async fn label_value_pairs(&self, page: &dyn BrowserPage) -> Result<Vec<(String, String)>, CrawlerError> {
        let rows = page.query_selector_all(&self.selector("info_rows")).await?;
        let mut pairs = Vec::new();
        for row in &rows {
            let labels = row.select("th");
            let values = row.select("td");
            for (label, value) in labels.iter().zip(values.iter()) {
                let label = clean_text(label.text_content());
                let value = clean_text(value.text_content());
                if !label.is_empty() && !value.is_empty() {
                    pairs.push((label, value));
                }
            }
        }
        Ok(pairs)
    }

    fn apply_pair(detail: &mut BidNoticeDetail, label: &str, value: &str) {
        let text = || Some(value.to_string());
        let n = &mut detail.notice;
        if label.contains("공고번호") {
            if let Some(id) = extract_bid_id(value) {
                n.bid_notice_id = id;
            }
        } else if label.contains("공고명") {
            n.title = value.to_string();
        } else if label.contains("수요기관") {
            n.demand_organization = text();
        } else if label.contains("공고기관") || label.contains("발주기관") {
            n.organization = text();
        } else if label.contains("공고일") {
            n.announce_date = parse_datetime(value);
        } else if label.contains("마감") {
            n.deadline = parse_datetime(value);
        } else if label.contains("추정가") || label.contains("예정가격") {
            n.estimated_price = parse_korean_price(value);
        } else if label.contains("기초금액") {
            n.base_price = parse_korean_price(value);
        } else if label.contains("입찰유형") || label.contains("업종") {
            n.bid_type = BidType::from_label(value);
        } else if label.contains("진행상태") || label.contains("상태") {
            n.status = BidStatus::from_label(value);
        } else if label.contains("입찰방식") || label.contains("낙찰방법") {
            detail.bid_method = text();
        } else if label.contains("계약방법") {
            detail.contract_method = text();
        } else if label.contains("참가자격") {
            detail.qualification = text();
        } else if label.contains("납품장소") {
            detail.delivery_location = text();
        } else if label.contains("지역") {
            detail.region = text();
        } else if label.contains("납품지") {
            detail.delivery_location = text();
        } else if label.contains("담당부서") {
            detail.contact_department = text();
        } else if label.contains("담당자") {
            detail.contact_person = text();
        } else if label.contains("전화") || label.contains("연락처") {
            detail.contact_phone = text();
        } else if label.contains("이메일") || label.contains("메일") {
            detail.contact_email = text();
        } else if label.contains("참조번호") || label.contains("사업번호") {
            detail.reference_no = text();
        } else if label.contains("사업자등록") {
            detail.registration_no = text();
        }
    }

    async fn extract_attachments(&self, page: &dyn BrowserPage) -> Result<Vec<String>, CrawlerError> {
        let links = page.query_selector_all(&self.selector("attachments")).await?;
        Ok(links
            .iter()
            .map(|link| {
                let name = clean_text(link.text_content());
                if name.is_empty() {
                    link.get_attribute("href").unwrap_or_default().to_string()
                } else {
                    name
                }
            })
            .filter(|name| !name.is_empty())
            .collect())
    }
}

#[async_trait]
impl DetailScraper for BidDetailScraper {
    async fn scrape_from_url(
        &self,
        page: &dyn BrowserPage,
        url: &str,
        notice: &BidNotice,
    ) -> Result<BidNoticeDetail, CrawlerError> {
        page.goto(url).await?;

        let container = self.selector("detail_container");
        if page.wait_for_selector(&container, self.wait_timeout).await?.is_none() {
            return Err(CrawlerError::Scrape {
                message: "detail container not found".into(),
                selector: Some(container),
                url: Some(url.to_string()),
            });
        }

        let mut detail = BidNoticeDetail::from_notice(notice.clone());
        let pairs = self.label_value_pairs(page).await?;
        debug!(fields = pairs.len(), url, "detail fields extracted");
        for (label, value) in &pairs {
            Self::apply_pair(&mut detail, label, value);
        }

        detail.attachments = self.extract_attachments(page).await?;
        detail.notice.detail_url = Some(url.to_string());
        detail.detail_crawled_at = Some(Utc::now());
        detail.crawl_success = true;
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn base_notice() -> BidNotice {
        BidNotice::new("20240115-001", "list title").unwrap()
    }

    #[test]
    fn label_mapping_fills_detail() {
        let mut detail = BidNoticeDetail::from_notice(base_notice());
        let pairs = [
            ("공고명", "청사 도로 보수공사"),
            ("공고기관", "서울특별시"),
            ("수요기관", "서울특별시 도로관리과"),
            ("추정가격", "1억 2천만원"),
            ("기초금액", "118,000,000원"),
            ("입찰방식", "전자입찰"),
            ("계약방법", "일반경쟁"),
            ("납품지역", "서울"),
            ("담당부서", "재무과"),
            ("담당자", "김담당"),
            ("전화번호", "02-120"),
            ("입찰마감일시", "2024-02-01 17:00"),
            ("진행상태", "공고중"),
        ];
        for (label, value) in pairs {
            BidDetailScraper::apply_pair(&mut detail, label, value);
        }

        assert_eq!(detail.notice.title, "청사 도로 보수공사");
        assert_eq!(detail.notice.organization.as_deref(), Some("서울특별시"));
        assert_eq!(
            detail.notice.demand_organization.as_deref(),
            Some("서울특별시 도로관리과")
        );
        assert_eq!(detail.notice.estimated_price, Some(Decimal::from(120_000_000)));
        assert_eq!(detail.notice.base_price, Some(Decimal::from(118_000_000)));
        assert_eq!(detail.bid_method.as_deref(), Some("전자입찰"));
        assert_eq!(detail.contract_method.as_deref(), Some("일반경쟁"));
        assert_eq!(detail.region.as_deref(), Some("서울"));
        assert_eq!(detail.contact_department.as_deref(), Some("재무과"));
        assert_eq!(detail.contact_person.as_deref(), Some("김담당"));
        assert_eq!(detail.contact_phone.as_deref(), Some("02-120"));
        assert!(detail.notice.deadline.is_some());
        assert_eq!(detail.notice.status, BidStatus::Open);
    }

    #[test]
    fn department_label_wins_over_person() {
        let mut detail = BidNoticeDetail::from_notice(base_notice());
        BidDetailScraper::apply_pair(&mut detail, "담당부서", "재무과");
        assert_eq!(detail.contact_department.as_deref(), Some("재무과"));
        assert_eq!(detail.contact_person, None);
    }
}
