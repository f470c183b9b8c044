//! SQLite log of harvest cycles, one row per cycle.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cycles (
            run_id         INTEGER PRIMARY KEY,
            query          TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            finished_at    TEXT NOT NULL,
            targets        INTEGER NOT NULL DEFAULT 0,
            successful     INTEGER NOT NULL DEFAULT 0,
            failed         INTEGER NOT NULL DEFAULT 0,
            records_before INTEGER NOT NULL DEFAULT 0,
            records_after  INTEGER NOT NULL DEFAULT 0,
            outcome        TEXT NOT NULL CHECK(outcome IN ('complete','partial','failed')),
            error          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_cycles_query ON cycles(query);
        ",
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Complete,
    Partial,
    Failed,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Complete => "complete",
            CycleOutcome::Partial => "partial",
            CycleOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: usize,
    pub successful: usize,
    pub failed: usize,
    pub records_before: usize,
    pub records_after: usize,
    pub outcome: CycleOutcome,
    pub error: Option<String>,
}

/// Returns the new row's `run_id`.
pub fn record_cycle(conn: &Connection, cycle: &CycleRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO cycles (query, started_at, finished_at, targets, successful, failed,
                             records_before, records_after, outcome, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            cycle.query,
            cycle.started_at.to_rfc3339(),
            cycle.finished_at.to_rfc3339(),
            cycle.targets,
            cycle.successful,
            cycle.failed,
            cycle.records_before,
            cycle.records_after,
            cycle.outcome.as_str(),
            cycle.error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub struct RunStats {
    pub cycles: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    /// `records_after` of the newest successful cycle.
    pub latest_records: usize,
    pub last_started_at: Option<String>,
}

pub fn fetch_stats(conn: &Connection) -> Result<RunStats> {
    let count = |outcome: &str| -> Result<usize> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM cycles WHERE outcome = ?1",
            [outcome],
            |r| r.get(0),
        )?)
    };
    let cycles: usize = conn.query_row("SELECT COUNT(*) FROM cycles", [], |r| r.get(0))?;
    let latest_records: usize = conn.query_row(
        "SELECT COALESCE((SELECT records_after FROM cycles
                          WHERE outcome != 'failed' ORDER BY run_id DESC LIMIT 1), 0)",
        [],
        |r| r.get(0),
    )?;
    let last_started_at: Option<String> = conn.query_row(
        "SELECT MAX(started_at) FROM cycles",
        [],
        |r| r.get(0),
    )?;
    Ok(RunStats {
        cycles,
        complete: count(CycleOutcome::Complete.as_str())?,
        partial: count(CycleOutcome::Partial.as_str())?,
        failed: count(CycleOutcome::Failed.as_str())?,
        latest_records,
        last_started_at,
    })
}

pub struct CycleRow {
    pub run_id: i64,
    pub query: String,
    pub started_at: String,
    pub successful: usize,
    pub failed: usize,
    pub records_before: usize,
    pub records_after: usize,
    pub outcome: String,
    pub error: Option<String>,
}

/// Newest first.
pub fn recent_cycles(conn: &Connection, limit: usize) -> Result<Vec<CycleRow>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, query, started_at, successful, failed, records_before, records_after,
                outcome, error
         FROM cycles
         ORDER BY run_id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok(CycleRow {
                run_id: row.get(0)?,
                query: row.get(1)?,
                started_at: row.get(2)?,
                successful: row.get(3)?,
                failed: row.get(4)?,
                records_before: row.get(5)?,
                records_after: row.get(6)?,
                outcome: row.get(7)?,
                error: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
