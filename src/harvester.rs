//! Drives whole cycles: one queued collection job per target, then merge and persist.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::collector;
use crate::config::{CollectorSettings, Settings};
use crate::error::CycleError;
use crate::model::{CycleStatus, Target, TargetResult};
use crate::queue::{self, Job, JobMeta, QueueSummary, TaskQueue};
use crate::run_log::{self, CycleOutcome, CycleRecord};
use crate::session::PageSession;
use crate::store::{self, MergeContext, UpdateReport};
use crate::targets::TargetSource;

/// What the serving layer may observe about the harvester.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub is_running: bool,
    pub total_cycles: u32,
    pub successful_cycles: u32,
    pub failed_cycles: u32,
    pub last_cycle: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct StatusInner {
    status: StdMutex<RunStatus>,
    trigger: mpsc::Sender<()>,
}

/// Cloneable read-only view of the run status, plus the manual trigger.
#[derive(Clone)]
pub struct StatusHandle {
    inner: Arc<StatusInner>,
}

impl StatusHandle {
    /// The receiver goes to whoever runs the cooldown loop.
    fn new() -> (Self, mpsc::Receiver<()>) {
        let (trigger, requests) = mpsc::channel(1);
        let handle = StatusHandle {
            inner: Arc::new(StatusInner {
                status: StdMutex::new(RunStatus::default()),
                trigger,
            }),
        };
        (handle, requests)
    }

    fn with_status<R>(&self, f: impl FnOnce(&mut RunStatus) -> R) -> R {
        let mut guard = self
            .inner
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn snapshot(&self) -> RunStatus {
        self.with_status(|s| s.clone())
    }

    /// Ask for a cycle now instead of after the cooldown. Returns `false`
    /// without doing anything if a cycle is already running.
    pub fn request_run(&self) -> bool {
        self.with_status(|s| {
            if s.is_running {
                return false;
            }
            match self.inner.trigger.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => true,
                Err(TrySendError::Closed(())) => false,
            }
        })
    }

    fn begin(&self) {
        self.with_status(|s| s.is_running = true);
    }

    fn finish(&self, error: Option<String>) {
        self.with_status(|s| {
            s.is_running = false;
            s.total_cycles += 1;
            match error {
                None => s.successful_cycles += 1,
                Some(_) => s.failed_cycles += 1,
            }
            s.last_cycle = Some(Utc::now());
            s.last_error = error;
        });
    }
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub query: String,
    pub queue: QueueSummary,
    pub status: CycleStatus,
    pub update: UpdateReport,
    pub state_path: PathBuf,
    /// Set when at least one target exhausted its retries.
    pub failed_path: Option<PathBuf>,
}

pub struct Harvester<S: PageSession + 'static> {
    settings: Settings,
    collector: Arc<CollectorSettings>,
    session: Arc<Mutex<S>>,
    source: Box<dyn TargetSource>,
    queue: TaskQueue<TargetResult>,
    run_log: Option<Connection>,
    status: StatusHandle,
    run_requests: mpsc::Receiver<()>,
}

impl<S: PageSession + 'static> Harvester<S> {
    pub fn new(settings: Settings, session: S, source: Box<dyn TargetSource>) -> Self {
        let queue = TaskQueue::from_settings(&settings.queue);
        let (status, run_requests) = StatusHandle::new();
        Harvester {
            collector: Arc::new(settings.collector.clone()),
            settings,
            session: Arc::new(Mutex::new(session)),
            source,
            queue,
            run_log: None,
            status,
            run_requests,
        }
    }

    pub fn with_run_log(mut self, conn: Connection) -> Self {
        self.run_log = Some(conn);
        self
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// The long-lived page session shared by every cycle.
    pub fn session(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.session)
    }

    /// Run one full cycle. Per-target failures end up in the report; only a
    /// missing target list or a failed write makes the cycle itself fail.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let started_at = Utc::now();
        self.status.begin();
        // The cycle a pending request asked for is this one.
        while self.run_requests.try_recv().is_ok() {}
        info!("Starting cycle, targets from {}", self.source.describe());

        let outcome = self.cycle(started_at).await;

        match &outcome {
            Ok(report) => {
                self.status.finish(None);
                info!(
                    "Cycle done for {:?}: {} ({} -> {} records)",
                    report.query,
                    report.queue,
                    report.update.before.unwrap_or(0),
                    report.update.after
                );
            }
            Err(e) => {
                self.status.finish(Some(e.to_string()));
                error!("Cycle failed: {}", e);
                self.log_cycle(&CycleRecord {
                    query: String::new(),
                    started_at,
                    finished_at: Utc::now(),
                    targets: 0,
                    successful: 0,
                    failed: 0,
                    records_before: 0,
                    records_after: 0,
                    outcome: CycleOutcome::Failed,
                    error: Some(e.to_string()),
                });
            }
        }
        outcome
    }

    async fn cycle(&mut self, started_at: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let list = self
            .source
            .fetch()
            .await
            .map_err(|e| CycleError::SourceList(format!("{:#}", e)))?;
        let query = list.query;
        let total = list.targets.len();
        info!("Cycle query {:?} over {} targets", query, total);

        self.queue.reset();
        let mut handles = Vec::with_capacity(total);
        for (index, target) in list.targets.into_iter().enumerate() {
            let meta = JobMeta {
                name: target.name.clone(),
                url: target.url.clone(),
                index,
                total,
            };
            let job = self.collect_job(target, query.clone());
            handles.push((meta.name.clone(), self.queue.submit(job, meta)));
        }

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        for (name, handle) in handles {
            match handle.wait().await {
                Ok(result) => pb.set_message(format!("{}: {} kept", name, result.records.len())),
                Err(e) => pb.println(format!("  {} failed: {}", name, e)),
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        self.queue.wait_for_completion().await;

        let mut completed = self.queue.completed();
        completed.sort_by_key(|c| c.metadata.index);
        let results: Vec<TargetResult> = completed.into_iter().map(|c| c.result).collect();
        let failures = self.queue.failures();
        let summary = self.queue.summary();

        let state_path = store::state_path(&self.settings.output_dir, &query);
        let failed_path = store::failed_path(&self.settings.output_dir, &query);
        let existing = store::load_state(&state_path);
        let merged = store::merge(
            existing.as_ref(),
            results,
            MergeContext {
                query: query.clone(),
                queue: summary,
                failed: failures.clone(),
                now: Utc::now(),
            },
        );
        store::save_state(&state_path, &merged)?;
        let wrote_failed = store::save_failed_report(&failed_path, &failures)?;

        let update = UpdateReport::between(existing.as_ref(), &merged);
        self.log_cycle(&CycleRecord {
            query: query.clone(),
            started_at,
            finished_at: Utc::now(),
            targets: total,
            successful: summary.successful,
            failed: summary.failed,
            records_before: update.before.unwrap_or(0),
            records_after: update.after,
            outcome: match merged.status {
                CycleStatus::Complete => CycleOutcome::Complete,
                CycleStatus::Partial => CycleOutcome::Partial,
            },
            error: None,
        });

        Ok(CycleReport {
            query,
            queue: summary,
            status: merged.status,
            update,
            state_path,
            failed_path: wrote_failed.then_some(failed_path),
        })
    }

    fn collect_job(&self, target: Target, query: String) -> Job<TargetResult> {
        let session = Arc::clone(&self.session);
        let settings = Arc::clone(&self.collector);
        queue::job(move || {
            let session = Arc::clone(&session);
            let settings = Arc::clone(&settings);
            let target = target.clone();
            let query = query.clone();
            async move {
                let mut session = session.lock().await;
                let result = collector::collect(&mut *session, &target, &query, &settings).await?;
                Ok(result)
            }
        })
    }

    fn log_cycle(&self, record: &CycleRecord) {
        let Some(conn) = &self.run_log else {
            return;
        };
        if let Err(e) = run_log::record_cycle(conn, record) {
            warn!("Could not record cycle in run log: {:#}", e);
        }
    }

    /// Run cycles back to back with `cooldown` in between, until `max_cycles`
    /// (if given) have run. A failed cycle does not stop the loop.
    pub async fn run_forever(&mut self, cooldown: Duration, max_cycles: Option<u32>) {
        let mut cycles = 0u32;
        loop {
            // Errors are already logged and counted by run_cycle.
            let _ = self.run_cycle().await;
            cycles += 1;
            if max_cycles.is_some_and(|max| cycles >= max) {
                info!("Finished {} cycle(s)", cycles);
                break;
            }

            info!("Next cycle in {}s", cooldown.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(cooldown) => {}
                Some(()) = self.run_requests.recv() => info!("Manual run requested"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRange;
    use crate::model::RawRecord;
    use crate::session::replay::{Capture, CapturedFeed};
    use crate::session::ReplaySession;
    use crate::targets::TargetList;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;

    const FEED: &str = "https://example.com/groups/craft-beer";

    struct StaticSource(Vec<Target>);

    #[async_trait]
    impl TargetSource for StaticSource {
        async fn fetch(&self) -> anyhow::Result<TargetList> {
            Ok(TargetList {
                query: "เบียร์".to_string(),
                targets: self.0.clone(),
            })
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl TargetSource for BrokenSource {
        async fn fetch(&self) -> anyhow::Result<TargetList> {
            anyhow::bail!("connection refused")
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn target(name: &str, url: &str) -> Target {
        Target {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    fn post(id: u32, text: &str) -> RawRecord {
        RawRecord {
            author: "Somchai".to_string(),
            author_profile_link: String::new(),
            text: text.to_string(),
            source_link: format!("{}/posts/{}", FEED, id),
            image_url: String::new(),
            posted_at: String::new(),
            captured_at: Utc::now(),
        }
    }

    fn capture(records: Vec<RawRecord>) -> Capture {
        let mut feeds = HashMap::new();
        feeds.insert(
            FEED.to_string(),
            CapturedFeed {
                batches: vec![records],
                end_marker: true,
            },
        );
        Capture { feeds }
    }

    fn settings(output_dir: &Path) -> Settings {
        let mut settings = Settings {
            output_dir: output_dir.to_path_buf(),
            ..Settings::default()
        };
        settings.queue.max_retries = 1;
        settings.queue.poll_interval_ms = 10;
        settings.collector.post_navigation_delay = DelayRange::ZERO;
        settings.collector.settle_delay = DelayRange::ZERO;
        settings
    }

    #[tokio::test(start_paused = true)]
    async fn second_cycle_adds_new_and_replaces_seen_records() {
        let dir = tempfile::tempdir().unwrap();
        let session = ReplaySession::new(capture(vec![
            post(1, "ขายเบียร์ลีโอ ยกลัง ราคา 650 บาท"),
            post(2, "เบียร์ช้าง เย็นๆ พร้อมส่ง โทร 081-234-5678"),
        ]));
        let source = StaticSource(vec![target("Craft Beer", FEED)]);
        let mut harvester = Harvester::new(settings(dir.path()), session, Box::new(source));

        let first = harvester.run_cycle().await.unwrap();
        assert_eq!(first.update, UpdateReport { before: None, after: 2 });
        assert_eq!(first.status, CycleStatus::Complete);

        *harvester.session().lock().await = ReplaySession::new(capture(vec![
            post(2, "เบียร์ช้าง ลดราคา เหลือ 590 บาท โทร 081-234-5678"),
            post(3, "รับตัวแทนจำหน่ายเบียร์ ทั่วประเทศ ไลน์ beerhub"),
        ]));
        let second = harvester.run_cycle().await.unwrap();
        assert_eq!(second.update, UpdateReport { before: Some(2), after: 3 });
        assert_eq!(second.update.added(), 1);

        let state = store::load_state(&second.state_path).unwrap();
        let group = state.group("Craft Beer").unwrap();
        let links: Vec<&str> = group.records().iter().map(|r| r.link()).collect();
        assert_eq!(
            links,
            vec![
                format!("{}/posts/1", FEED),
                format!("{}/posts/2", FEED),
                format!("{}/posts/3", FEED)
            ]
        );
        assert!(group.records()[1].text().contains("590"));
        assert!(group.records()[1].facts.commerce.prices.contains(&590));
        assert_eq!(state.queue.successful, 1);
        assert!(second.failed_path.is_none());

        let status = harvester.status().snapshot();
        assert_eq!((status.total_cycles, status.successful_cycles), (2, 2));
        assert!(!status.is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_target_lands_in_failed_report() {
        let dir = tempfile::tempdir().unwrap();
        let session = ReplaySession::new(capture(vec![post(1, "ขายเบียร์ลีโอ ยกลัง ราคา 650 บาท")]));
        let source = StaticSource(vec![
            target("Gone", "https://example.com/groups/gone"),
            target("Craft Beer", FEED),
        ]);
        let conn = run_log::connect(&dir.path().join("harvest.sqlite")).unwrap();
        run_log::init_schema(&conn).unwrap();
        let mut harvester =
            Harvester::new(settings(dir.path()), session, Box::new(source)).with_run_log(conn);

        let report = harvester.run_cycle().await.unwrap();
        assert_eq!(report.status, CycleStatus::Partial);
        assert_eq!((report.queue.successful, report.queue.failed), (1, 1));

        let failed_path = report.failed_path.expect("failed report written");
        let failed: Vec<crate::queue::FailedJob> =
            serde_json::from_str(&std::fs::read_to_string(failed_path).unwrap()).unwrap();
        assert_eq!(failed[0].metadata.name, "Gone");
        assert_eq!(failed[0].attempts, 2);

        let state = store::load_state(&report.state_path).unwrap();
        assert_eq!(state.failed_targets.len(), 1);
        assert!(state.group("Craft Beer").is_some());

        let log = harvester.run_log.as_ref().unwrap();
        let stats = run_log::fetch_stats(log).unwrap();
        assert_eq!((stats.cycles, stats.partial), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_target_list_fails_cycle_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut harvester = Harvester::new(
            settings(dir.path()),
            ReplaySession::new(Capture::default()),
            Box::new(BrokenSource),
        );

        let err = harvester.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::SourceList(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let status = harvester.status().snapshot();
        assert_eq!(status.failed_cycles, 1);
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_failed_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let mut harvester = Harvester::new(
            settings(dir.path()),
            ReplaySession::new(Capture::default()),
            Box::new(BrokenSource),
        );
        harvester
            .run_forever(Duration::from_secs(30 * 60), Some(3))
            .await;

        let status = harvester.status().snapshot();
        assert_eq!(status.total_cycles, 3);
        assert_eq!(status.failed_cycles, 3);
    }

    #[test]
    fn manual_trigger_is_refused_while_running() {
        let (handle, mut requests) = StatusHandle::new();
        assert!(handle.request_run());
        assert!(handle.request_run());

        handle.begin();
        assert!(!handle.request_run());
        handle.finish(None);
        assert!(handle.request_run());

        assert!(requests.try_recv().is_ok());
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn request_before_a_cycle_does_not_shorten_its_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut harvester = Harvester::new(
            settings(dir.path()),
            ReplaySession::new(Capture::default()),
            Box::new(BrokenSource),
        );
        assert!(harvester.status().request_run());

        let cooldown = Duration::from_secs(30 * 60);
        let started = tokio::time::Instant::now();
        harvester.run_forever(cooldown, Some(2)).await;
        assert!(started.elapsed() >= cooldown);
        assert_eq!(harvester.status().snapshot().total_cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn request_during_cooldown_starts_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut harvester = Harvester::new(
            settings(dir.path()),
            ReplaySession::new(Capture::default()),
            Box::new(BrokenSource),
        );
        let status = harvester.status();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert!(status.request_run());
        });

        let cooldown = Duration::from_secs(30 * 60);
        let started = tokio::time::Instant::now();
        harvester.run_forever(cooldown, Some(2)).await;
        assert!(started.elapsed() < cooldown);
        assert_eq!(harvester.status().snapshot().total_cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_fails_cycle_and_loop_goes_on() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "occupied").unwrap();
        let session = ReplaySession::new(capture(vec![post(1, "ขายเบียร์ลีโอ ยกลัง ราคา 650 บาท")]));
        let source = StaticSource(vec![target("Craft Beer", FEED)]);
        let mut harvester = Harvester::new(settings(&blocker), session, Box::new(source));

        let err = harvester.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Persistence(_)));
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "occupied");
        assert_eq!(harvester.status().snapshot().failed_cycles, 1);

        harvester.run_forever(Duration::from_secs(60), Some(2)).await;
        let status = harvester.status().snapshot();
        assert_eq!((status.total_cycles, status.failed_cycles), (3, 3));
        assert!(!status.is_running);
    }
}
