//! Bid notice domain model
//!
//! Structured representation of Korean public-procurement bid notices as
//! scraped from list and detail pages. Values are validated on construction
//! and immutable afterwards; status transitions return a new value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::errors::CrawlerError;

/// Default threshold for [`BidNotice::is_valuable`]: 1억원.
pub const VALUABLE_THRESHOLD: u64 = 100_000_000;

/// Bid type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BidType {
    /// 물품 구매
    Goods,
    /// 용역 계약
    Service,
    /// 시설 공사
    Construction,
    /// 외자 구매
    Foreign,
    #[default]
    Other,
}

impl BidType {
    /// Maps a Korean type label to a [`BidType`]. Substring match, `Other` fallback.
    #[must_use]
    pub fn from_label(text: &str) -> Self {
        const LABELS: [(&str, BidType); 4] = [
            ("물품", BidType::Goods),
            ("용역", BidType::Service),
            ("공사", BidType::Construction),
            ("외자", BidType::Foreign),
        ];
        LABELS
            .iter()
            .find(|(label, _)| text.contains(label))
            .map_or(BidType::Other, |(_, ty)| *ty)
    }
}

/// Notice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Open,
    Closed,
    Cancelled,
    Postponed,
    Rebid,
    #[default]
    Unknown,
}

impl BidStatus {
    /// Maps a Korean status label to a [`BidStatus`]. Substring match, `Unknown` fallback.
    #[must_use]
    pub fn from_label(text: &str) -> Self {
        const LABELS: [(&str, BidStatus); 7] = [
            ("공고중", BidStatus::Open),
            ("진행중", BidStatus::Open),
            ("마감", BidStatus::Closed),
            ("취소", BidStatus::Cancelled),
            ("연기", BidStatus::Postponed),
            ("재공고", BidStatus::Rebid),
            ("공고", BidStatus::Open),
        ];
        LABELS
            .iter()
            .find(|(label, _)| text.contains(label))
            .map_or(BidStatus::Unknown, |(_, status)| *status)
    }

    /// Transition table. Anything not listed here is a domain error.
    fn allowed_transitions(self) -> &'static [BidStatus] {
        match self {
            Self::Open => &[Self::Closed, Self::Cancelled, Self::Postponed],
            Self::Postponed => &[Self::Open, Self::Cancelled, Self::Rebid],
            Self::Rebid => &[Self::Open],
            _ => &[],
        }
    }
}

/// A bid notice as it appears on the list page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidNotice {
    /// 입찰공고번호 (unique identifier)
    pub bid_notice_id: String,
    pub title: String,
    #[serde(default)]
    pub bid_type: BidType,
    #[serde(default)]
    pub status: BidStatus,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub demand_organization: Option<String>,
    #[serde(default)]
    pub announce_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// 추정가격 (원). Fixed decimal; serialized as a string to preserve precision.
    #[serde(default)]
    pub estimated_price: Option<Decimal>,
    /// 기초금액 (원)
    #[serde(default)]
    pub base_price: Option<Decimal>,
    #[serde(default)]
    pub detail_url: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

impl BidNotice {
    /// Creates a validated notice. The id must be non-empty and prices
    /// non-negative.
    pub fn new(bid_notice_id: impl Into<String>, title: impl Into<String>) -> Result<Self, CrawlerError> {
        let bid_notice_id = bid_notice_id.into();
        if bid_notice_id.trim().is_empty() {
            return Err(CrawlerError::invalid_field(
                "bid_notice_id must not be empty",
                "bid_notice_id",
            ));
        }
        Ok(Self {
            bid_notice_id,
            title: title.into(),
            bid_type: BidType::default(),
            status: BidStatus::default(),
            organization: None,
            demand_organization: None,
            announce_date: None,
            deadline: None,
            estimated_price: None,
            base_price: None,
            detail_url: None,
            crawled_at: Utc::now(),
        })
    }

    /// Sets the estimated price, rejecting negative values.
    pub fn with_estimated_price(mut self, price: Decimal) -> Result<Self, CrawlerError> {
        if price.is_sign_negative() {
            return Err(CrawlerError::invalid_field(
                format!("estimated_price must be non-negative, got {price}"),
                "estimated_price",
            ));
        }
        self.estimated_price = Some(price);
        Ok(self)
    }

    /// Sets the base price, rejecting negative values.
    pub fn with_base_price(mut self, price: Decimal) -> Result<Self, CrawlerError> {
        if price.is_sign_negative() {
            return Err(CrawlerError::invalid_field(
                format!("base_price must be non-negative, got {price}"),
                "base_price",
            ));
        }
        self.base_price = Some(price);
        Ok(self)
    }

    /// Whether the estimated price meets the threshold (default 1억원).
    /// Returns `false` when the price is absent.
    #[must_use]
    pub fn is_valuable(&self, threshold: Decimal) -> bool {
        self.estimated_price.is_some_and(|price| price >= threshold)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == BidStatus::Open
    }

    /// Whether the deadline has passed. `false` when no deadline is set.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Utc::now() > deadline)
    }

    /// Open and not past the deadline.
    #[must_use]
    pub fn can_participate(&self) -> bool {
        self.is_open() && !self.is_expired()
    }

    /// Returns a copy with the new status applied.
    ///
    /// Allowed transitions: OPEN→{CLOSED, CANCELLED, POSTPONED},
    /// POSTPONED→{OPEN, CANCELLED, REBID}, REBID→{OPEN}.
    pub fn transition_to(&self, new_status: BidStatus) -> Result<Self, CrawlerError> {
        if !self.status.allowed_transitions().contains(&new_status) {
            return Err(CrawlerError::invalid_field(
                format!("invalid status transition: {:?} -> {new_status:?}", self.status),
                "status",
            ));
        }
        let mut next = self.clone();
        next.status = new_status;
        Ok(next)
    }

    /// Human-readable price string, e.g. "1억 2,000만원".
    #[must_use]
    pub fn price_display(&self) -> String {
        let Some(price) = self.estimated_price else {
            return "미정".to_string();
        };
        let won: i64 = price.to_i64().unwrap_or(0);
        if won >= 100_000_000 {
            let eok = won / 100_000_000;
            let man = (won % 100_000_000) / 10_000;
            if man > 0 {
                format!("{eok}억 {}만원", group_digits(man))
            } else {
                format!("{eok}억원")
            }
        } else if won >= 10_000 {
            format!("{}만원", group_digits(won / 10_000))
        } else {
            format!("{}원", group_digits(won))
        }
    }
}

fn group_digits(n: i64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Full notice record extracted from the detail page.
///
/// Extends the list summary with contract, contact and attachment fields plus
/// crawl metadata. `crawl_success=false` records a partial result whose
/// detail fetch exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidNoticeDetail {
    #[serde(flatten)]
    pub notice: BidNotice,

    #[serde(default)]
    pub bid_method: Option<String>,
    #[serde(default)]
    pub contract_method: Option<String>,
    #[serde(default)]
    pub qualification: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub delivery_location: Option<String>,
    #[serde(default)]
    pub contact_department: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub reference_no: Option<String>,
    #[serde(default)]
    pub registration_no: Option<String>,

    #[serde(default)]
    pub detail_crawled_at: Option<DateTime<Utc>>,
    #[serde(default = "default_crawl_success")]
    pub crawl_success: bool,
    #[serde(default)]
    pub crawl_error: Option<String>,

    /// Fields we did not model still survive a load/save cycle.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_crawl_success() -> bool {
    true
}

impl BidNoticeDetail {
    /// Wraps a list summary into a detail record with empty detail fields.
    #[must_use]
    pub fn from_notice(notice: BidNotice) -> Self {
        Self {
            notice,
            bid_method: None,
            contract_method: None,
            qualification: None,
            region: None,
            delivery_location: None,
            contact_department: None,
            contact_person: None,
            contact_phone: None,
            contact_email: None,
            attachments: Vec::new(),
            reference_no: None,
            registration_no: None,
            detail_crawled_at: None,
            crawl_success: true,
            crawl_error: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Partial record for a notice whose detail fetch failed permanently.
    #[must_use]
    pub fn failed(notice: BidNotice, error: impl Into<String>) -> Self {
        let mut detail = Self::from_notice(notice);
        detail.detail_crawled_at = Some(Utc::now());
        detail.crawl_success = false;
        detail.crawl_error = Some(error.into());
        detail
    }

    #[must_use]
    pub fn bid_notice_id(&self) -> &str {
        &self.notice.bid_notice_id
    }

    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// "부서 / 담당자 / 전화" formatted contact line, `None` when all absent.
    #[must_use]
    pub fn contact_info(&self) -> Option<String> {
        let parts: Vec<&str> = [
            self.contact_department.as_deref(),
            self.contact_person.as_deref(),
            self.contact_phone.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" / "))
        }
    }

    #[must_use]
    pub fn is_crawl_complete(&self) -> bool {
        self.crawl_success && self.detail_crawled_at.is_some()
    }
}

/// One scraped list page: items plus pagination metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidNoticeList {
    pub items: Vec<BidNotice>,
    pub total_count: u32,
    pub current_page: u32,
    pub total_pages: u32,
    pub has_next: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn notice(status: BidStatus) -> BidNotice {
        let mut n = BidNotice::new("20240115-001", "도로 보수공사").unwrap();
        n.status = status;
        n
    }

    #[test]
    fn rejects_empty_id() {
        assert!(BidNotice::new("  ", "title").is_err());
    }

    #[test]
    fn rejects_negative_price() {
        let n = BidNotice::new("1", "t").unwrap();
        assert!(n.with_estimated_price(Decimal::from(-1)).is_err());
    }

    #[test]
    fn valuable_threshold_boundary() {
        let threshold = Decimal::from(VALUABLE_THRESHOLD);
        let n = notice(BidStatus::Open)
            .with_estimated_price(Decimal::from(VALUABLE_THRESHOLD))
            .unwrap();
        assert!(n.is_valuable(threshold));

        let below = notice(BidStatus::Open)
            .with_estimated_price(Decimal::from(VALUABLE_THRESHOLD - 1))
            .unwrap();
        assert!(!below.is_valuable(threshold));

        // absent price is never valuable
        assert!(!notice(BidStatus::Open).is_valuable(threshold));
    }

    #[test]
    fn status_transition_table() {
        let allowed = [
            (BidStatus::Open, BidStatus::Closed),
            (BidStatus::Open, BidStatus::Cancelled),
            (BidStatus::Open, BidStatus::Postponed),
            (BidStatus::Postponed, BidStatus::Open),
            (BidStatus::Postponed, BidStatus::Cancelled),
            (BidStatus::Postponed, BidStatus::Rebid),
            (BidStatus::Rebid, BidStatus::Open),
        ];
        for (from, to) in allowed {
            let next = notice(from).transition_to(to).unwrap();
            assert_eq!(next.status, to);
        }

        let rejected = [
            (BidStatus::Open, BidStatus::Rebid),
            (BidStatus::Closed, BidStatus::Open),
            (BidStatus::Cancelled, BidStatus::Open),
            (BidStatus::Rebid, BidStatus::Closed),
            (BidStatus::Unknown, BidStatus::Open),
        ];
        for (from, to) in rejected {
            assert!(notice(from).transition_to(to).is_err(), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn transition_leaves_original_untouched() {
        let original = notice(BidStatus::Open);
        let _ = original.transition_to(BidStatus::Closed).unwrap();
        assert_eq!(original.status, BidStatus::Open);
    }

    #[test]
    fn label_mapping() {
        assert_eq!(BidType::from_label("일반용역"), BidType::Service);
        assert_eq!(BidType::from_label("??"), BidType::Other);
        assert_eq!(BidStatus::from_label("공고중"), BidStatus::Open);
        assert_eq!(BidStatus::from_label("마감됨"), BidStatus::Closed);
        assert_eq!(BidStatus::from_label("???"), BidStatus::Unknown);
    }

    #[test]
    fn price_display_formats() {
        let won = |v: i64| {
            notice(BidStatus::Open)
                .with_estimated_price(Decimal::from(v))
                .unwrap()
                .price_display()
        };
        assert_eq!(won(520_000_000), "5억 2,000만원");
        assert_eq!(won(500_000_000), "5억원");
        assert_eq!(won(35_000_000), "3,500만원");
        assert_eq!(won(9_999), "9,999원");
        assert_eq!(notice(BidStatus::Open).price_display(), "미정");
    }

    proptest::proptest! {
        // serialized prices never pass through floating point
        #[test]
        fn any_price_round_trips_exactly(units in 0i64..=10_000_000_000, cents in 0u32..100) {
            let price = Decimal::from(units) + Decimal::new(i64::from(cents), 2);
            let json = serde_json::to_string(&price).unwrap();
            proptest::prop_assert!(json.starts_with('"') && json.ends_with('"'));
            let back: Decimal = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(price, back);
        }
    }

    #[test]
    fn decimal_round_trips_as_string() {
        let n = notice(BidStatus::Open)
            .with_estimated_price(Decimal::new(123_456_789_01, 2))
            .unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"123456789.01\""), "{json}");
        let back: BidNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(back.estimated_price, n.estimated_price);
    }

    #[test]
    fn detail_partial_record() {
        let detail = BidNoticeDetail::failed(notice(BidStatus::Open), "selector missing");
        assert!(!detail.crawl_success);
        assert_eq!(detail.crawl_error.as_deref(), Some("selector missing"));
        assert!(!detail.is_crawl_complete());
    }

    #[test]
    fn contact_info_joins_present_fields() {
        let mut detail = BidNoticeDetail::from_notice(notice(BidStatus::Open));
        assert_eq!(detail.contact_info(), None);
        detail.contact_department = Some("재무과".into());
        detail.contact_phone = Some("02-123-4567".into());
        assert_eq!(detail.contact_info().unwrap(), "재무과 / 02-123-4567");
    }
}
