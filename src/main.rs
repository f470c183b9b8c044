use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use itertools::Itertools;

use post_harvester::config::Settings;
use post_harvester::extract::extract_facts;
use post_harvester::harvester::{CycleReport, Harvester};
use post_harvester::model::PersistedState;
use post_harvester::run_log;
use post_harvester::session::{PageSession, RemoteSession, ReplaySession};
use post_harvester::store::{self, ContactDirectory};
use post_harvester::targets::{FileTargetSource, HttpTargetSource, TargetSource};

#[derive(Parser)]
#[command(name = "post_harvester", about = "Harvest listing posts from group feeds and extract contact facts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./harvest.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read the target list from a local JSON file
    #[arg(long, global = true)]
    targets_file: Option<PathBuf>,

    /// Fetch the target list from this URL
    #[arg(long, global = true)]
    targets_url: Option<String>,

    /// Base URL of the rendering sidecar
    #[arg(long, global = true)]
    session_url: Option<String>,

    /// Replay a recorded capture instead of driving a live page
    #[arg(long, global = true)]
    replay: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one harvest cycle over every target
    Run,
    /// Run cycles in a loop with a cooldown in between
    Watch {
        /// Seconds between cycles (default: from config)
        #[arg(long)]
        cooldown: Option<u64>,
        /// Stop after this many cycles (default: run forever)
        #[arg(long)]
        cycles: Option<u32>,
    },
    /// Overview of stored results
    Show {
        /// Query to show (default: every stored query)
        #[arg(short, long)]
        query: Option<String>,
        /// Max posts to list per query
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Cycle history from the run log
    Stats,
    /// Re-run fact extraction over stored posts
    Reextract {
        #[arg(short, long)]
        query: String,
    },
}

enum Mode {
    Once,
    Loop { cooldown: Duration, cycles: Option<u32> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    apply_overrides(&mut settings, &cli);

    let result = match cli.command {
        Commands::Run => harvest(settings, cli.replay.as_deref(), Mode::Once).await,
        Commands::Watch { cooldown, cycles } => {
            let cooldown = cooldown.map(Duration::from_secs).unwrap_or_else(|| settings.cooldown());
            harvest(settings, cli.replay.as_deref(), Mode::Loop { cooldown, cycles }).await
        }
        Commands::Show { query, limit } => show(&settings, query.as_deref(), limit),
        Commands::Stats => {
            let conn = run_log::connect(&settings.run_log_path)?;
            run_log::init_schema(&conn)?;
            let s = run_log::fetch_stats(&conn)?;
            println!("Cycles:    {}", s.cycles);
            println!("Complete:  {}", s.complete);
            println!("Partial:   {}", s.partial);
            println!("Failed:    {}", s.failed);
            println!("Records:   {}", s.latest_records);
            println!("Last run:  {}", s.last_started_at.as_deref().unwrap_or("-"));

            let rows = run_log::recent_cycles(&conn, 10)?;
            if !rows.is_empty() {
                println!("\n{:>4} | {:<25} | {:<16} | {:<8} | {:>7} | {:>13}", "#", "Started", "Query", "Outcome", "Targets", "Records");
                println!("{}", "-".repeat(88));
                for r in &rows {
                    println!(
                        "{:>4} | {:<25} | {:<16} | {:<8} | {:>3}/{:<3} | {:>5} -> {:<5}",
                        r.run_id,
                        truncate(&r.started_at, 25),
                        truncate(&r.query, 16),
                        r.outcome,
                        r.successful,
                        r.successful + r.failed,
                        r.records_before,
                        r.records_after
                    );
                    if let Some(err) = &r.error {
                        println!("       {}", truncate(err, 80));
                    }
                }
            }
            Ok(())
        }
        Commands::Reextract { query } => reextract(&settings, &query),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(path) = &cli.targets_file {
        settings.targets_file = Some(path.clone());
    }
    if let Some(url) = &cli.targets_url {
        settings.targets_url = Some(url.clone());
    }
    if let Some(url) = &cli.session_url {
        settings.session_url = Some(url.clone());
    }
}

fn target_source(settings: &Settings) -> anyhow::Result<Box<dyn TargetSource>> {
    if let Some(path) = &settings.targets_file {
        return Ok(Box::new(FileTargetSource::new(path.clone())));
    }
    if let Some(url) = &settings.targets_url {
        return Ok(Box::new(HttpTargetSource::new(url)));
    }
    bail!("No target list configured: pass --targets-file or --targets-url")
}

async fn harvest(settings: Settings, replay: Option<&Path>, mode: Mode) -> anyhow::Result<()> {
    let source = target_source(&settings)?;
    let conn = run_log::connect(&settings.run_log_path)?;
    run_log::init_schema(&conn)?;

    if let Some(path) = replay {
        let session = ReplaySession::from_file(path)?;
        return drive(Harvester::new(settings, session, source).with_run_log(conn), mode).await;
    }
    let url = settings
        .session_url
        .clone()
        .context("No page session configured: set session_url or pass --replay")?;
    let session = RemoteSession::new(&url)?;
    drive(Harvester::new(settings, session, source).with_run_log(conn), mode).await
}

async fn drive<S: PageSession + 'static>(mut harvester: Harvester<S>, mode: Mode) -> anyhow::Result<()> {
    match mode {
        Mode::Once => {
            let report = harvester.run_cycle().await?;
            print_report(&report);
        }
        Mode::Loop { cooldown, cycles } => {
            harvester.run_forever(cooldown, cycles).await;
            let status = harvester.status().snapshot();
            println!(
                "Ran {} cycles ({} ok, {} failed)",
                status.total_cycles, status.successful_cycles, status.failed_cycles
            );
        }
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Query:    {}", report.query);
    println!("Targets:  {}", report.queue);
    println!("Status:   {:?}", report.status);
    match report.update.before {
        Some(before) => println!(
            "Posts:    {} -> {} ({:+})",
            before,
            report.update.after,
            report.update.added()
        ),
        None => println!("Posts:    {} (new file)", report.update.after),
    }
    println!("Saved:    {}", report.state_path.display());
    if let Some(path) = &report.failed_path {
        println!("Failed:   {}", path.display());
    }
    if let Some(state) = store::load_state(&report.state_path) {
        let contacts = ContactDirectory::from_state(&state);
        println!("Contacts: {} phones, {} handles", contacts.phones.len(), contacts.handles.len());
    }
}

fn stored_states(settings: &Settings, query: Option<&str>) -> anyhow::Result<Vec<PersistedState>> {
    if let Some(q) = query {
        let path = store::state_path(&settings.output_dir, q);
        return Ok(store::read_state(&path)?.into_iter().collect());
    }
    let entries = match std::fs::read_dir(&settings.output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("Failed to list output directory"),
    };
    let paths = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "json")
                && !p.to_string_lossy().ends_with("_failed.json")
        })
        .sorted()
        .collect::<Vec<_>>();
    Ok(paths.iter().filter_map(|p| store::load_state(p)).collect())
}

fn show(settings: &Settings, query: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let states = stored_states(settings, query)?;
    if states.is_empty() {
        println!("No stored results. Run 'run' first.");
        return Ok(());
    }

    for state in &states {
        println!(
            "\n== {} | {:?} | scraped {} | {} ==",
            state.query,
            state.status,
            state.scraped_at.format("%Y-%m-%d %H:%M"),
            state.queue
        );
        println!(
            "{:>3} | {:<28} | {:>5} | {:>7} | {:>5} | {:>5} | {:>8} | {:>4}",
            "#", "Group", "Posts", "Contact", "Price", "Brand", "Location", "Rate"
        );
        println!("{}", "-".repeat(86));
        for (i, g) in state.groups.iter().enumerate() {
            let s = &g.result.stats;
            println!(
                "{:>3} | {:<28} | {:>5} | {:>7} | {:>5} | {:>5} | {:>8} | {:>3}%",
                i + 1,
                truncate(g.name(), 28),
                g.records().len(),
                s.with_contact,
                s.with_price,
                s.with_brand,
                s.with_location,
                s.completeness_rate
            );
        }

        let with_contact = state
            .groups
            .iter()
            .flat_map(|g| g.records())
            .filter(|r| r.facts.contact.has_contact)
            .take(limit)
            .collect::<Vec<_>>();
        if !with_contact.is_empty() {
            println!("\n--- Posts with contact ---");
            for r in with_contact {
                let contact = r
                    .facts
                    .contact
                    .phones
                    .iter()
                    .chain(r.facts.contact.handles.iter())
                    .join(", ");
                let prices = r.facts.commerce.prices.iter().map(|p| format!("{}฿", p)).join(" ");
                println!("  {:<16} {:<30} {:<12} {}", truncate(&r.raw.author, 16), truncate(&contact, 30), prices, truncate(r.text(), 40));
            }
        }

        let failed = &state.failed_targets;
        if !failed.is_empty() {
            println!("\n--- Failed targets ---");
            for f in failed {
                println!("  {} ({} attempts): {}", f.metadata.name, f.attempts, truncate(&f.error, 60));
            }
        }

        let contacts = ContactDirectory::from_state(state);
        println!(
            "\n{} posts in {} groups | {} phones, {} handles",
            state.record_count(),
            state.groups.len(),
            contacts.phones.len(),
            contacts.handles.len()
        );
    }
    Ok(())
}

fn reextract(settings: &Settings, query: &str) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let path = store::state_path(&settings.output_dir, query);
    let mut state = store::read_state(&path)?
        .with_context(|| format!("No stored results at {}", path.display()))?;

    let pb = ProgressBar::new(state.record_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let changed = AtomicUsize::new(0);
    for group in &mut state.groups {
        group.result.records.par_iter_mut().for_each(|record| {
            let facts = extract_facts(&record.raw.text);
            if facts != record.facts {
                changed.fetch_add(1, Ordering::Relaxed);
                record.facts = facts;
            }
            pb.inc(1);
        });
    }
    pb.finish_and_clear();

    store::recompute(&mut state);
    store::save_state(&path, &state)?;
    println!(
        "Re-extracted {} posts, {} changed. Saved {}",
        state.record_count(),
        changed.load(Ordering::Relaxed),
        path.display()
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
