//! One incremental pagination run against one target.

pub mod state;

use std::collections::HashSet;

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::CollectorSettings;
use crate::error::SessionError;
use crate::extract::{enrich, keywords::mentions_any};
use crate::model::{EnrichedRecord, GroupStats, RawRecord, Target, TargetResult};
use crate::session::PageSession;

pub use state::{Observation, ScrollMachine, ScrollState, StopReason};

/// Navigate to `target`, scroll until a stop guard fires, then filter.
///
/// Only navigation failure is an error. Batch timeouts and session errors
/// during collection count as empty batches.
pub async fn collect<S: PageSession + ?Sized>(
    session: &mut S,
    target: &Target,
    query: &str,
    settings: &CollectorSettings,
) -> Result<TargetResult, SessionError> {
    info!("Collecting {} via {} session", target.name, session.name());
    session
        .navigate(&target.url, settings.navigation_timeout())
        .await?;
    if let Err(e) = session.dismiss_overlays().await {
        debug!("Overlay dismissal failed on {}: {}", target.url, e);
    }
    sleep(settings.post_navigation_delay.sample()).await;

    let mut machine = ScrollMachine::new(settings.patience, settings.max_scroll_times);
    let mut seen: HashSet<String> = HashSet::new();
    let mut records: Vec<EnrichedRecord> = Vec::new();
    let mut dropped = 0usize;

    let stop_reason = loop {
        let batch = next_batch(session, settings).await;
        let before = records.len();
        for raw in batch {
            if !is_valid(&raw, settings.min_text_len) {
                dropped += 1;
                debug!(link = %raw.source_link, "Dropping record without link or with short text");
                continue;
            }
            if !seen.insert(raw.source_link.clone()) {
                continue;
            }
            records.push(enrich(raw, query, Utc::now()));
        }

        let extent = session.current_scroll_extent().await.unwrap_or_else(|e| {
            warn!("Could not read scroll extent on {}: {}", target.url, e);
            0
        });
        let end_marker = session.has_end_marker().await.unwrap_or(false);

        let state = machine.observe(Observation {
            total: records.len(),
            extent,
            end_marker,
        });
        debug!(
            target = %target.name,
            iteration = machine.iterations(),
            new = records.len() - before,
            total = records.len(),
            extent,
            ?state,
            "Iteration done"
        );
        if let ScrollState::Stopped(reason) = state {
            break reason;
        }

        if let Err(e) = session.scroll_step().await {
            warn!("Scroll failed on {}: {}", target.url, e);
        }
        sleep(settings.settle_delay.sample()).await;
    };

    let total_seen = records.len();
    let matched = filter_by_query(records, query);
    let query_matched = matched.len();
    let kept = filter_by_category(matched, &settings.category_keywords);

    info!(
        "{}: {} seen, {} match query, {} kept after {} iteration(s) ({:?}, {} dropped)",
        target.name,
        total_seen,
        query_matched,
        kept.len(),
        machine.iterations(),
        stop_reason,
        dropped
    );

    Ok(TargetResult {
        target_name: target.name.clone(),
        target_url: target.url.clone(),
        query: query.to_string(),
        collected_at: Utc::now(),
        total_seen,
        query_matched,
        category_matched: kept.len(),
        stop_reason: Some(stop_reason),
        iterations: machine.iterations(),
        stats: GroupStats::from_records(&kept),
        records: kept,
    })
}

async fn next_batch<S: PageSession + ?Sized>(
    session: &mut S,
    settings: &CollectorSettings,
) -> Vec<RawRecord> {
    let limit = settings.extraction_timeout();
    match timeout(limit, session.extract_visible_records(limit)).await {
        Ok(Ok(batch)) => batch,
        Ok(Err(e)) => {
            warn!("Batch extraction failed, treating as empty: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!("{}", SessionError::Timeout(limit));
            Vec::new()
        }
    }
}

fn is_valid(raw: &RawRecord, min_text_len: usize) -> bool {
    !raw.source_link.trim().is_empty() && raw.text.trim().chars().count() >= min_text_len
}

/// Case-insensitive containment. A blank query keeps everything.
pub fn filter_by_query(records: Vec<EnrichedRecord>, query: &str) -> Vec<EnrichedRecord> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| r.text().to_lowercase().contains(&needle))
        .collect()
}

/// Keep records mentioning any category keyword. An empty keyword list keeps everything.
pub fn filter_by_category(records: Vec<EnrichedRecord>, keywords: &[String]) -> Vec<EnrichedRecord> {
    if keywords.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| mentions_any(r.text(), keywords))
        .collect()
}
