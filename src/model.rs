use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::StopReason;
use crate::queue::{FailedJob, QueueSummary};

/// One source to collect from in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
}

/// One candidate text unit as captured by a page session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default = "unknown_author")]
    pub author: String,
    #[serde(default)]
    pub author_profile_link: String,
    pub text: String,
    #[serde(default)]
    pub source_link: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub posted_at: String,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

fn unknown_author() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFacts {
    pub phones: BTreeSet<String>,
    pub handles: BTreeSet<String>,
    pub has_contact: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommerceFacts {
    pub prices: BTreeSet<u32>,
    pub brands: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub delivery_methods: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTag {
    pub keyword: String,
    pub category: String,
}

/// Everything derived from a record's text. Never mutated after extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFacts {
    pub contact: ContactFacts,
    pub commerce: CommerceFacts,
    pub keyword_tags: Vec<KeywordTag>,
}

/// The stored unit: a raw record, the query it was collected under and its facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub raw: RawRecord,
    #[serde(default)]
    pub query: String,
    #[serde(flatten)]
    pub facts: ExtractedFacts,
    pub timestamp: DateTime<Utc>,
}

impl EnrichedRecord {
    pub fn link(&self) -> &str {
        &self.raw.source_link
    }

    pub fn text(&self) -> &str {
        &self.raw.text
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub with_contact: usize,
    pub with_price: usize,
    pub with_brand: usize,
    pub with_location: usize,
    /// Percentage of records carrying a contact, rounded.
    pub completeness_rate: u32,
}

impl GroupStats {
    pub fn from_records(records: &[EnrichedRecord]) -> Self {
        let with_contact = records.iter().filter(|r| r.facts.contact.has_contact).count();
        let with_price = records.iter().filter(|r| !r.facts.commerce.prices.is_empty()).count();
        let with_brand = records.iter().filter(|r| !r.facts.commerce.brands.is_empty()).count();
        let with_location = records
            .iter()
            .filter(|r| !r.facts.commerce.locations.is_empty())
            .count();
        GroupStats {
            with_contact,
            with_price,
            with_brand,
            with_location,
            completeness_rate: percent(with_contact, records.len()),
        }
    }
}

pub fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

/// One collector's output for one target in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target_name: String,
    pub target_url: String,
    pub query: String,
    pub collected_at: DateTime<Utc>,
    /// Unique valid records seen during the run, before filtering.
    pub total_seen: usize,
    pub query_matched: usize,
    pub category_matched: usize,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub iterations: u32,
    pub stats: GroupStats,
    pub records: Vec<EnrichedRecord>,
}

/// A target's accumulated records as persisted across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroup {
    #[serde(flatten)]
    pub result: TargetResult,
    pub last_updated: DateTime<Utc>,
}

impl TargetGroup {
    pub fn name(&self) -> &str {
        &self.result.target_name
    }

    pub fn records(&self) -> &[EnrichedRecord] {
        &self.result.records
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub total_seen: usize,
    pub query_matched: usize,
    pub category_matched: usize,
    pub total_with_contact: usize,
    pub total_groups: usize,
}

/// The on-disk accumulation for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub query: String,
    pub scraped_at: DateTime<Utc>,
    pub status: CycleStatus,
    pub queue: QueueSummary,
    pub summary: StateSummary,
    pub groups: Vec<TargetGroup>,
    #[serde(default)]
    pub failed_targets: Vec<FailedJob>,
}

impl PersistedState {
    pub fn group(&self, name: &str) -> Option<&TargetGroup> {
        self.groups.iter().find(|g| g.name() == name)
    }

    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|g| g.records().len()).sum()
    }
}
