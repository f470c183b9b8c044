//! Text → facts. Every function here is pure: identical text always yields
//! identical output, and no input (including the empty string) can fail.

pub mod commerce;
pub mod contacts;
pub mod keywords;
pub mod vocab;

use chrono::{DateTime, Utc};
use regex::{Match, Regex};

use crate::model::{CommerceFacts, ContactFacts, EnrichedRecord, ExtractedFacts, RawRecord};

/// A single regex paired with the predicate deciding whether a match is kept.
///
/// The value handed to the predicate is the `v` capture group when the
/// pattern has one, otherwise the whole match.
pub struct PatternRule {
    pub name: &'static str,
    regex: Regex,
    accept: fn(&Candidate<'_>) -> bool,
}

/// A raw regex hit, with enough context for boundary checks.
pub struct Candidate<'t> {
    pub text: &'t str,
    pub whole: Match<'t>,
    pub value: Match<'t>,
}

impl<'t> Candidate<'t> {
    /// The character immediately before the whole match.
    pub fn char_before(&self) -> Option<char> {
        self.text[..self.whole.start()].chars().next_back()
    }

    /// The character immediately after the whole match.
    pub fn char_after(&self) -> Option<char> {
        self.text[self.whole.end()..].chars().next()
    }

    pub fn value(&self) -> &'t str {
        self.value.as_str()
    }
}

impl PatternRule {
    pub fn new(name: &'static str, pattern: &str, accept: fn(&Candidate<'_>) -> bool) -> Self {
        PatternRule {
            name,
            regex: Regex::new(pattern).unwrap(),
            accept,
        }
    }

    pub fn candidates<'t>(&'t self, text: &'t str) -> impl Iterator<Item = Candidate<'t>> + 't {
        self.regex.captures_iter(text).filter_map(move |caps| {
            let whole = caps.get(0)?;
            let value = caps.name("v").unwrap_or(whole);
            Some(Candidate { text, whole, value })
        })
    }

    /// Accepted values, in match order.
    pub fn accepted<'t>(&'t self, text: &'t str) -> Vec<&'t str> {
        self.candidates(text)
            .filter(|c| (self.accept)(c))
            .map(|c| c.value())
            .collect()
    }
}

/// Run every extractor over `text`.
pub fn extract_facts(text: &str) -> ExtractedFacts {
    let phones = contacts::extract_phones(text);
    let handles = contacts::extract_handles(text);
    let has_contact = !phones.is_empty() || !handles.is_empty();

    ExtractedFacts {
        contact: ContactFacts {
            phones,
            handles,
            has_contact,
        },
        commerce: CommerceFacts {
            prices: commerce::extract_prices(text),
            brands: commerce::extract_brands(text),
            locations: commerce::extract_locations(text),
            delivery_methods: commerce::extract_delivery_methods(text),
        },
        keyword_tags: keywords::tag_keywords(text),
    }
}

/// Attach facts to a raw record collected under `query`.
pub fn enrich(raw: RawRecord, query: &str, now: DateTime<Utc>) -> EnrichedRecord {
    let facts = extract_facts(&raw.text);
    EnrichedRecord {
        raw,
        query: query.to_string(),
        facts,
        timestamp: now,
    }
}
