use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use super::vocab::{BRANDS, CANONICAL_BRANDS, DELIVERY, DELIVERY_CUES, PICKUP, PICKUP_CUES, PLACES};
use super::keywords::mentions_any;
use super::{Candidate, PatternRule};

pub const MIN_PRICE: u32 = 50;
pub const MAX_PRICE: u32 = 100_000;

fn price_rules() -> &'static [PatternRule] {
    static RULES: OnceLock<Vec<PatternRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            PatternRule::new(
                "amount-currency",
                r"(?i)(?P<v>\d{1,3}(?:,\d{3})+|\d+)\s*(?:บาท|฿|baht|บ\.)",
                accept_price,
            ),
            PatternRule::new(
                "keyword-amount",
                r"(?i)(?:ราคา|price|ขาย|฿)[\s:]*(?P<v>\d{1,3}(?:,\d{3})+|\d+)",
                accept_price,
            ),
        ]
    })
}

pub fn parse_price(raw: &str) -> Option<u32> {
    raw.replace(',', "").parse::<u32>().ok()
}

fn accept_price(c: &Candidate<'_>) -> bool {
    matches!(parse_price(c.value()), Some(v) if (MIN_PRICE..=MAX_PRICE).contains(&v))
}

pub fn extract_prices(text: &str) -> BTreeSet<u32> {
    price_rules()
        .iter()
        .flat_map(|rule| rule.accepted(text))
        .filter_map(parse_price)
        .collect()
}

fn canonical_brand(brand: &str) -> String {
    CANONICAL_BRANDS
        .iter()
        .find(|(raw, _)| *raw == brand)
        .map(|(_, display)| display.to_string())
        .unwrap_or_else(|| brand.to_string())
}

pub fn extract_brands(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    BRANDS
        .iter()
        .filter(|brand| lower.contains(&brand.to_lowercase()))
        .map(|brand| canonical_brand(brand))
        .collect()
}

fn district_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<kind>อำเภอ|อ\.|ตำบล|ต\.)\s*(?P<name>[ก-๙a-zA-Z]+)").unwrap())
}

pub fn extract_locations(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    let mut found: BTreeSet<String> = PLACES
        .iter()
        .filter(|place| lower.contains(*place))
        .map(|place| place.to_string())
        .collect();

    for caps in district_regex().captures_iter(text) {
        let name = &caps["name"];
        if name.chars().count() <= 2 {
            continue;
        }
        let prefix = match &caps["kind"] {
            "อำเภอ" | "อ." => "อ.",
            _ => "ต.",
        };
        found.insert(format!("{}{}", prefix, name));
    }
    found
}

pub fn extract_delivery_methods(text: &str) -> BTreeSet<String> {
    let mut methods = BTreeSet::new();
    if mentions_any(text, DELIVERY_CUES) {
        methods.insert(DELIVERY.to_string());
    }
    if mentions_any(text, PICKUP_CUES) {
        methods.insert(PICKUP.to_string());
    }
    methods
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_below_floor_is_dropped() {
        assert!(extract_prices("แค่ 30 บาท").is_empty());
    }

    #[test]
    fn thousands_separator() {
        let prices = extract_prices("ลังละ 1,200 บาท");
        assert_eq!(prices.into_iter().collect::<Vec<_>>(), vec![1200]);
    }

    #[test]
    fn keyword_then_amount() {
        let prices = extract_prices("ราคา: 450 ส่งฟรี, price 1200");
        assert!(prices.contains(&450));
        assert!(prices.contains(&1200));
    }

    #[test]
    fn prices_within_bounds() {
        let text = "ขาย 10 ขวด 49 บาท 50 บาท 100,000 บาท 100,001 บาท ราคา 9999999";
        let prices = extract_prices(text);
        assert!(prices.iter().all(|p| (MIN_PRICE..=MAX_PRICE).contains(p)));
        assert!(prices.contains(&50));
        assert!(prices.contains(&100_000));
        assert!(!prices.contains(&100_001));
    }

    #[test]
    fn overflowing_amount_is_ignored() {
        assert!(extract_prices("99999999999999999999 baht").is_empty());
    }

    #[test]
    fn brand_casing() {
        let brands = extract_brands("มี HEINEKEN กับ สิงห์ และ Stella");
        assert!(brands.contains("Heineken"));
        assert!(brands.contains("สิงห์"));
        assert!(brands.contains("stella"));
    }

    #[test]
    fn places_and_districts() {
        let locations = extract_locations("ส่งทั่ว Bangkok และ นนทบุรี อำเภอ บางบัวทอง ต.บางรักพัฒนา");
        assert!(locations.contains("bangkok"));
        assert!(locations.contains("นนทบุรี"));
        assert!(locations.contains("อ.บางบัวทอง"));
        assert!(locations.contains("ต.บางรักพัฒนา"));
    }

    #[test]
    fn short_district_names_skipped() {
        assert!(extract_locations("อ.ab").is_empty());
    }

    #[test]
    fn delivery_and_pickup() {
        let methods = extract_delivery_methods("พร้อมส่ง หรือ นัดรับ ได้");
        assert_eq!(methods.len(), 2);
        assert!(extract_delivery_methods("Free Delivery").contains(DELIVERY));
    }
}
