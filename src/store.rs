//! Merge fresh results into the accumulated per-query state and persist it.
//!
//! The store is the only writer of the state file. Writes go to `<file>.tmp`
//! first and are renamed over the target, so a crash never leaves a
//! half-written state behind.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::{
    CycleStatus, EnrichedRecord, GroupStats, PersistedState, StateSummary, TargetGroup, TargetResult,
};
use crate::queue::{FailedJob, QueueSummary};

/// Everything a merge needs besides the records themselves.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub query: String,
    pub queue: QueueSummary,
    pub failed: Vec<FailedJob>,
    pub now: DateTime<Utc>,
}

/// Before/after record counts for one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    /// `None` when there was no prior state.
    pub before: Option<usize>,
    pub after: usize,
}

impl UpdateReport {
    pub fn between(before: Option<&PersistedState>, after: &PersistedState) -> Self {
        UpdateReport {
            before: before.map(PersistedState::record_count),
            after: after.record_count(),
        }
    }

    pub fn added(&self) -> i64 {
        self.after as i64 - self.before.unwrap_or(0) as i64
    }
}

/// Unique contact points across every stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDirectory {
    pub phones: BTreeSet<String>,
    pub handles: BTreeSet<String>,
}

impl ContactDirectory {
    pub fn from_state(state: &PersistedState) -> Self {
        let mut dir = ContactDirectory::default();
        for record in state.groups.iter().flat_map(|g| g.records()) {
            dir.phones.extend(record.facts.contact.phones.iter().cloned());
            dir.handles.extend(record.facts.contact.handles.iter().cloned());
        }
        dir
    }
}

/// Keep ASCII alphanumerics and Thai characters; every other run becomes one `_`.
pub fn sanitize_filename(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        let keep = c.is_ascii_alphanumeric() || ('\u{0E01}'..='\u{0E59}').contains(&c);
        if keep {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out
}

pub fn state_path(output_dir: &Path, query: &str) -> PathBuf {
    output_dir.join(format!("{}.json", sanitize_filename(query)))
}

pub fn failed_path(output_dir: &Path, query: &str) -> PathBuf {
    output_dir.join(format!("{}_failed.json", sanitize_filename(query)))
}

/// Strict read: a missing file is `Ok(None)`, anything else unreadable is an error.
pub fn read_state(path: &Path) -> Result<Option<PersistedState>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Best-effort read: an unreadable or corrupt file is treated as absent.
pub fn load_state(path: &Path) -> Option<PersistedState> {
    match read_state(path) {
        Ok(state) => state,
        Err(e) => {
            warn!("{}; starting from empty state", e);
            None
        }
    }
}

pub fn save_state(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    write_json_atomic(path, state)?;
    info!(
        "Saved {} records across {} groups to {}",
        state.record_count(),
        state.groups.len(),
        path.display()
    );
    Ok(())
}

/// Write the failed-targets report, or remove a stale one when nothing failed.
/// Returns whether a report was written.
pub fn save_failed_report(path: &Path, failed: &[FailedJob]) -> Result<bool, StoreError> {
    if failed.is_empty() {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove stale report {}: {}", path.display(), e);
            }
        }
        return Ok(false);
    }
    write_json_atomic(path, &failed)?;
    warn!("{} target(s) failed, see {}", failed.len(), path.display());
    Ok(true)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let write_err = |reason: String| StoreError::Write {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| write_err(format!("creating {}: {}", parent.display(), e)))?;
    }
    let raw = serde_json::to_vec_pretty(value).map_err(|e| write_err(format!("encoding: {}", e)))?;

    let tmp = tmp_path(path);
    let replaced = fs::write(&tmp, raw)
        .map_err(|e| write_err(format!("writing temp {}: {}", tmp.display(), e)))
        .and_then(|_| fs::rename(&tmp, path).map_err(|e| write_err(format!("replacing: {}", e))));
    if replaced.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    replaced
}

/// Fold `results` into `existing`.
///
/// Groups are matched by target name. Within a group, records are keyed by
/// identity link: existing records keep their order, an incoming record with a
/// known link replaces the old one in place, and new links are appended.
/// Groups absent from `results` are carried over untouched.
pub fn merge(
    existing: Option<&PersistedState>,
    results: Vec<TargetResult>,
    ctx: MergeContext,
) -> PersistedState {
    let mut groups: Vec<TargetGroup> = existing.map(|s| s.groups.clone()).unwrap_or_default();

    for result in results {
        match groups.iter_mut().find(|g| g.name() == result.target_name) {
            Some(group) => merge_group(group, result, ctx.now),
            None => groups.push(new_group(result, ctx.now)),
        }
    }

    let summary = summarize(&groups);
    let status = if ctx.failed.is_empty() {
        CycleStatus::Complete
    } else {
        CycleStatus::Partial
    };

    PersistedState {
        query: ctx.query,
        scraped_at: ctx.now,
        status,
        queue: ctx.queue,
        summary,
        groups,
        failed_targets: ctx.failed,
    }
}

fn merge_group(group: &mut TargetGroup, incoming: TargetResult, now: DateTime<Utc>) {
    let previous = std::mem::take(&mut group.result.records);
    let records = dedupe_by_link(previous.into_iter().chain(incoming.records));

    group.result = settle(TargetResult { records, ..incoming });
    group.last_updated = now;
}

fn new_group(mut result: TargetResult, now: DateTime<Utc>) -> TargetGroup {
    result.records = dedupe_by_link(result.records);
    TargetGroup {
        result: settle(result),
        last_updated: now,
    }
}

/// `total_seen` stays the latest run's; matched counts describe the stored set.
fn settle(mut result: TargetResult) -> TargetResult {
    result.query_matched = result.records.len();
    result.category_matched = result.records.len();
    result.stats = GroupStats::from_records(&result.records);
    result
}

/// Refresh per-group stats and the top-level summary after records were
/// edited in place (e.g. re-extraction).
pub fn recompute(state: &mut PersistedState) {
    for group in &mut state.groups {
        group.result.stats = GroupStats::from_records(&group.result.records);
    }
    state.summary = summarize(&state.groups);
}

/// Last write wins per link, at the position of the first occurrence.
fn dedupe_by_link(records: impl IntoIterator<Item = EnrichedRecord>) -> Vec<EnrichedRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<EnrichedRecord> = Vec::new();
    for record in records {
        match index.get(record.link()) {
            Some(&i) => merged[i] = record,
            None => {
                index.insert(record.link().to_string(), merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

fn summarize(groups: &[TargetGroup]) -> StateSummary {
    groups.iter().fold(
        StateSummary {
            total_groups: groups.len(),
            ..StateSummary::default()
        },
        |mut acc, g| {
            acc.total_seen += g.result.total_seen;
            acc.query_matched += g.result.query_matched;
            acc.category_matched += g.result.category_matched;
            acc.total_with_contact += g.result.stats.with_contact;
            acc
        },
    )
}
