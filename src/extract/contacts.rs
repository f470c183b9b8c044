use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::{Candidate, PatternRule};

const HANDLE_MIN_LEN: usize = 4;
const HANDLE_MAX_LEN: usize = 30;

/// Platform UI words that the handle patterns pick up on their own.
const HANDLE_STOPWORDS: &[&str] = &[
    "line",
    "chat",
    "contact",
    "inbox",
    "message",
    "ไลน์",
    "ความคิดเห็น",
    "ถูกใจ",
    "แชร์",
];

fn phone_rules() -> &'static [PatternRule] {
    static RULES: OnceLock<Vec<PatternRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            PatternRule::new(
                "mobile",
                r"(?:\+66|0)?[\s-]?[689]\d[\s-]?\d{3}[\s-]?\d{4}",
                accept_phone,
            ),
            PatternRule::new(
                "regional",
                r"(?:\+66|0)?[\s-]?[2-9]\d[\s-]?\d{3}[\s-]?\d{4}",
                accept_phone,
            ),
            PatternRule::new("3-3-4", r"\d{3}[-\s]?\d{3}[-\s]?\d{4}", accept_phone),
            PatternRule::new("2-3-4", r"\d{2}[-\s]?\d{3}[-\s]?\d{4}", accept_phone),
        ]
    })
}

fn handle_rules() -> &'static [PatternRule] {
    static RULES: OnceLock<Vec<PatternRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            PatternRule::new(
                "keyword",
                r"(?i)(?:line\s*id|line|ไลน์|ไอดี|id)[\s:]*@?(?P<v>[a-zA-Z0-9._-]+)",
                accept_keyword_handle,
            ),
            PatternRule::new("at", r"@(?P<v>[a-zA-Z0-9._-]+)", accept_at_handle),
        ]
    })
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == '-'
}

/// Strip separators and fold the `+66` country prefix into a leading zero.
pub fn normalize_phone(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !is_separator(*c)).collect();
    match compact.strip_prefix("+66") {
        Some(rest) => format!("0{}", rest),
        None => compact,
    }
}

fn accept_phone(c: &Candidate<'_>) -> bool {
    // Leading separators belong to the optional prefix slot, not the number.
    let raw = c.whole.as_str();
    let lead = raw.len() - raw.trim_start_matches(is_separator).len();
    let before = c.text[..c.whole.start() + lead].chars().next_back();
    if matches!(before, Some(ch) if ch.is_ascii_digit() || ch == '+') {
        return false;
    }
    if matches!(c.char_after(), Some(ch) if ch.is_ascii_digit()) {
        return false;
    }
    let normalized = normalize_phone(raw);
    normalized.chars().all(|ch| ch.is_ascii_digit()) && (9..=10).contains(&normalized.len())
}

fn accept_keyword_handle(c: &Candidate<'_>) -> bool {
    if matches!(c.char_before(), Some(ch) if ch.is_ascii_alphabetic()) {
        return false;
    }
    valid_handle(c.value())
}

fn accept_at_handle(c: &Candidate<'_>) -> bool {
    // `name@domain` is an e-mail address, not a handle.
    if matches!(c.char_before(), Some(ch) if ch.is_ascii_alphanumeric()) {
        return false;
    }
    valid_handle(c.value())
}

fn trim_handle(token: &str) -> &str {
    token.trim_end_matches(['.', '-'])
}

pub fn valid_handle(token: &str) -> bool {
    let token = trim_handle(token);
    let len = token.chars().count();
    if !(HANDLE_MIN_LEN..=HANDLE_MAX_LEN).contains(&len) {
        return false;
    }
    let lower = token.to_lowercase();
    if HANDLE_STOPWORDS.contains(&lower.as_str()) {
        return false;
    }
    let all_digits = token.chars().all(|ch| ch.is_ascii_digit());
    !(all_digits && (9..=10).contains(&len))
}

pub fn extract_phones(text: &str) -> BTreeSet<String> {
    let found: BTreeSet<String> = phone_rules()
        .iter()
        .flat_map(|rule| rule.accepted(text))
        .map(normalize_phone)
        .collect();
    drop_shadowed(found)
}

/// A shorter number that is the tail of a longer accepted number is a
/// partial re-match of the same digits.
fn drop_shadowed(phones: BTreeSet<String>) -> BTreeSet<String> {
    phones
        .iter()
        .filter(|p| !phones.iter().any(|other| other.len() > p.len() && other.ends_with(p.as_str())))
        .cloned()
        .collect()
}

pub fn extract_handles(text: &str) -> BTreeSet<String> {
    handle_rules()
        .iter()
        .flat_map(|rule| rule.accepted(text))
        .map(|h| trim_handle(h).to_string())
        .collect()
}
