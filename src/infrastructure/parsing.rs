//! Text parsing helpers
//!
//! Pure string-to-typed-value conversions used by the scrapers: prices
//! (including Korean 억/만 units), dates in dashed and Korean formats, and
//! bid-notice id extraction. Browser-independent and unit tested in
//! isolation.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NUMBER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d,]+").unwrap());
static DATETIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-./](\d{1,2})[-./](\d{1,2})\s+(\d{1,2}):(\d{2})(?::(\d{2}))?").unwrap());
static DATE_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})[-./](\d{1,2})[-./](\d{1,2})").unwrap());
static KOREAN_DATETIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일\s*(\d{1,2})시\s*(\d{2})분").unwrap());
static KOREAN_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일").unwrap());
static BID_ID_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(\d{8,}-\d+)").unwrap(),
        Regex::new(r"(\d{10,})").unwrap(),
        Regex::new(r"([A-Z0-9]{5,}-\d+)").unwrap(),
    ]
});
static KOREAN_PRICE_UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+|[일이삼사오육칠팔구])([조억만천백십])").unwrap());

/// Collapses runs of whitespace into single spaces and trims the ends.
#[must_use]
pub fn clean_text(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Parses a comma-grouped numeric price such as "123,456,789원".
///
/// Uses the longest digit run in the input; returns `None` when no digits are
/// present.
#[must_use]
pub fn parse_price(text: &str) -> Option<Decimal> {
    let longest = NUMBER_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .max_by_key(|s| s.len())?;
    longest.replace(',', "").parse().ok()
}

fn korean_digit(text: &str) -> Option<Decimal> {
    let value = match text {
        "일" => 1,
        "이" => 2,
        "삼" => 3,
        "사" => 4,
        "오" => 5,
        "육" => 6,
        "칠" => 7,
        "팔" => 8,
        "구" => 9,
        "영" => 0,
        _ => return None,
    };
    Some(Decimal::from(value))
}

fn korean_unit(unit: &str) -> Option<Decimal> {
    let value: i64 = match unit {
        "조" => 1_000_000_000_000,
        "억" => 100_000_000,
        "만" => 10_000,
        "천" => 1_000,
        "백" => 100,
        "십" => 10,
        _ => return None,
    };
    Some(Decimal::from(value))
}

/// Parses prices written with Korean units, e.g. "1억 2천만원" → 120000000.
///
/// Falls back to [`parse_price`] for plain numeric inputs.
#[must_use]
pub fn parse_korean_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text.chars().filter(|c| !"약원 ,".contains(*c)).collect();

    let mut total = Decimal::ZERO;
    for caps in KOREAN_PRICE_UNIT.captures_iter(&cleaned) {
        let num_str = &caps[1];
        let num = if num_str.chars().all(|c| c.is_ascii_digit()) {
            num_str.parse().ok()?
        } else {
            korean_digit(num_str)?
        };
        let unit = korean_unit(&caps[2])?;
        total += num * unit;
    }
    if total > Decimal::ZERO {
        return Some(total);
    }

    parse_price(text)
}

fn make_datetime(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(y, mo, d)?;
    let naive = date.and_hms_opt(h, mi, s)?;
    Utc.from_local_datetime(&naive).single()
}

/// Parses dashed ("2024-01-15 14:30"), slashed, dotted and Korean
/// ("2024년 1월 15일 14시 30분") date formats. Time defaults to midnight.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = clean_text(text);
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = DATETIME.captures(&text) {
        return make_datetime(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            caps[4].parse().ok()?,
            caps[5].parse().ok()?,
            caps.get(6).map_or(Ok(0), |m| m.as_str().parse()).ok()?,
        );
    }
    if let Some(caps) = KOREAN_DATETIME.captures(&text) {
        return make_datetime(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            caps[4].parse().ok()?,
            caps[5].parse().ok()?,
            0,
        );
    }
    if let Some(caps) = DATE_ONLY.captures(&text) {
        return make_datetime(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?, 0, 0, 0);
    }
    if let Some(caps) = KOREAN_DATE.captures(&text) {
        return make_datetime(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?, 0, 0, 0);
    }
    None
}

/// Extracts a bid-notice id: date-sequence ("20240115-001"), long digit runs,
/// or letter-prefixed ("KEPCO-12345") forms. Falls back to the input with
/// whitespace stripped.
#[must_use]
pub fn extract_bid_id(text: &str) -> Option<String> {
    for pattern in BID_ID_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            return Some(caps[1].to_string());
        }
    }
    let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    (!stripped.is_empty()).then_some(stripped)
}

/// Resolves a possibly relative URL against the base.
#[must_use]
pub fn normalize_url(href: &str, base_url: &str) -> String {
    if href.is_empty() {
        return String::new();
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match url::Url::parse(base_url).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => {
            let base = base_url.trim_end_matches('/');
            let path = if href.starts_with('/') {
                href.to_string()
            } else {
                format!("/{href}")
            };
            format!("{base}{path}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  hello   world  "), "hello world");
        assert_eq!(clean_text("line1\n\n  line2"), "line1 line2");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn parse_price_handles_commas_and_suffix() {
        assert_eq!(parse_price("123,456,789원"), Some(Decimal::from(123_456_789)));
        assert_eq!(parse_price("1,000,000"), Some(Decimal::from(1_000_000)));
        assert_eq!(parse_price("추정가격 없음"), None);
    }

    #[test]
    fn parse_price_prefers_longest_run() {
        // a row cell like "3건 / 1,200,000원" must pick the price
        assert_eq!(parse_price("3건 / 1,200,000원"), Some(Decimal::from(1_200_000)));
    }

    #[rstest::rstest]
    #[case("1억 2천만원", 120_000_000)]
    #[case("5천만원", 50_000_000)]
    #[case("약 3억 5000만원", 350_000_000)]
    #[case("이억원", 200_000_000)]
    #[case("1조 2억원", 1_000_200_000_000)]
    #[case("123,456,789원", 123_456_789)]
    fn parse_korean_price_units(#[case] input: &str, #[case] expected: i64) {
        assert_eq!(parse_korean_price(input), Some(Decimal::from(expected)));
    }

    #[test]
    fn parse_korean_price_rejects_nonsense() {
        assert_eq!(parse_korean_price("미정"), None);
        assert_eq!(parse_korean_price(""), None);
    }

    #[test]
    fn parse_datetime_formats() {
        let dt = parse_datetime("2024-01-15 14:30").unwrap();
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);

        let with_seconds = parse_datetime("2024/01/15 14:30:45").unwrap();
        assert_eq!(with_seconds.second(), 45);

        let date_only = parse_datetime("2024.01.15").unwrap();
        assert_eq!(date_only.hour(), 0);

        let korean = parse_datetime("2024년 1월 15일 14시 30분").unwrap();
        assert_eq!(korean.minute(), 30);

        assert!(parse_datetime("마감일 미정").is_none());
        assert!(parse_datetime("2024-13-45").is_none());
    }

    #[test]
    fn extract_bid_id_patterns() {
        assert_eq!(extract_bid_id("공고번호: 20240115-001").as_deref(), Some("20240115-001"));
        assert_eq!(extract_bid_id("2024011500001").as_deref(), Some("2024011500001"));
        assert_eq!(extract_bid_id("KEPCO-12345").as_deref(), Some("KEPCO-12345"));
        assert_eq!(extract_bid_id("공고 17").as_deref(), Some("공고17"));
        assert_eq!(extract_bid_id("   "), None);
    }

    #[test]
    fn normalize_url_joins_relative_paths() {
        assert_eq!(
            normalize_url("/detail?id=1", "https://example.com"),
            "https://example.com/detail?id=1"
        );
        assert_eq!(
            normalize_url("https://other.com/x", "https://example.com"),
            "https://other.com/x"
        );
        assert_eq!(normalize_url("", "https://example.com"), "");
    }
}
