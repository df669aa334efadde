use anyhow::{Context, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use harvester::handlers::{CrawlOverrides, load_urls_from_source, prepare_db_path, resolve_config};
use harvester_core::crawl::{CrawlOptions, execute_crawl, extract_url_path};
use harvester_core::data::Database;
use harvester_core::model::CrawlResult;
use harvester_core::monitor::{HealthStatus, Monitor, StatusUpdate};
use harvester_core::report::{
    ReportFormat, format_bytes, generate_json_report, generate_report, save_report,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, warn};
use url::Url;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    match chosen_command.subcommand() {
        Some(("crawl", primary_command)) => {
            if let Err(e) = handle_crawl(primary_command, quiet).await {
                eprintln!("{} {:#}", "✗".red().bold(), e);
                std::process::exit(1);
            }
        }
        None => {}
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

fn print_banner() {
    println!("{}", "═".repeat(60).bright_green().bold());
    println!(
        "{}  {}",
        "  HARVESTER".bright_white().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  reclaimable bytes, committed");
    println!("{}", "═".repeat(60).bright_green().bold());
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_crawl(sub_matches: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    init_logging(sub_matches.get_flag("verbose"));

    let url = sub_matches.get_one::<Url>("url");
    let hosts_file = sub_matches.get_one::<PathBuf>("hosts-file");
    let seeds = load_urls_from_source(url, hosts_file).map_err(|e| anyhow!(e))?;

    let overrides = CrawlOverrides {
        workers: sub_matches.get_one::<usize>("threads").copied(),
        max_depth: sub_matches.get_one::<usize>("depth").copied(),
        delay_ms: sub_matches.get_one::<u64>("delay").copied(),
        timeout_ms: sub_matches.get_one::<u64>("timeout").copied(),
        no_ocr: sub_matches.get_flag("no-ocr"),
    };
    let config_file = sub_matches.get_one::<PathBuf>("config");
    let config = resolve_config(config_file.map(PathBuf::as_path), &overrides)
        .map_err(|e| anyhow!(e))?;

    let format = sub_matches
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text);
    let output = sub_matches.get_one::<PathBuf>("output");

    let db_raw = sub_matches
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or("~/.config/harvester/harvester.db");
    let db_path = prepare_db_path(db_raw).map_err(|e| anyhow!(e))?;
    let db = Database::new(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let session_id = db.create_session(&seeds, &config)?;

    if !quiet {
        println!("\n🌾 Harvesting {} seed(s)", seeds.len());
        println!("Workers:   {}", config.max_concurrency);
        println!("Max depth: {}", config.max_depth);
        println!(
            "OCR:       {}",
            if config.ocr_active() { "enabled" } else { "disabled" }
        );
        println!("Database:  {}\n", db_path.display());
    }

    // Per-worker spinners
    let m = Arc::new(MultiProgress::new());
    let mut bars = HashMap::new();
    for i in 0..config.max_concurrency {
        let pb = m.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} Worker {msg}")
                .unwrap(),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("{}: idle", i));
        bars.insert(i, pb);
    }
    let worker_bars = Arc::new(bars);

    let bars_clone = worker_bars.clone();
    let progress_callback = Arc::new(move |worker_id: usize, url: String| {
        if let Some(pb) = bars_clone.get(&worker_id) {
            pb.set_message(format!("{}: {}", worker_id, extract_url_path(&url)));
        }
    });

    // Results go to a blocking writer so SQLite never runs on a runtime thread.
    let (tx, mut rx) = mpsc::unbounded_channel::<CrawlResult>();
    let writer_session = session_id.clone();
    let writer = tokio::task::spawn_blocking(move || {
        let mut stored = 0usize;
        while let Some(result) = rx.blocking_recv() {
            match db.insert_result(&writer_session, &result) {
                Ok(_) => stored += 1,
                Err(e) => warn!("Failed to persist {}: {}", result.url, e),
            }
        }
        (db, stored)
    });
    let result_callback = Arc::new(move |result: &CrawlResult| {
        if tx.send(result.clone()).is_err() {
            warn!("Result writer stopped, dropping {}", result.url);
        }
    });

    let monitor = Arc::new(Monitor::new(config.monitor.clone()));
    let m_clone = m.clone();
    let health_updates = monitor.on_update(Arc::new(move |update: &StatusUpdate| {
        if let StatusUpdate::Health(health) = update
            && health.status != HealthStatus::Healthy
        {
            let line = format!(
                "⚠ Browser health {} ({} consecutive errors)",
                health.status.as_str(),
                health.consecutive_errors
            );
            let _ = m_clone.println(line.yellow().to_string());
        }
    }));

    let options = CrawlOptions::new(seeds, config).with_monitor(monitor);
    let crawl = execute_crawl(options, Some(progress_callback), Some(result_callback)).await;

    for pb in worker_bars.values() {
        pb.finish_and_clear();
    }
    let _ = m.clear();
    health_updates.abort();

    let (db, stored) = writer.await.context("Result writer panicked")?;

    let summary = match crawl {
        Ok(summary) => summary,
        Err(e) => {
            db.fail_session(&session_id)?;
            return Err(e).context("Crawl failed");
        }
    };
    db.complete_session(&session_id)?;

    // Retention may have evicted early results; the database has all of them.
    let results = match db.get_results_by_session(&session_id) {
        Ok(results) if results.len() >= summary.results.len() => results,
        Ok(_) => summary.results,
        Err(e) => {
            warn!("Falling back to in-memory results: {}", e);
            summary.results
        }
    };

    if !quiet {
        let total: u64 = results.iter().map(|r| r.space_saved).sum();
        println!("\n{} Crawl complete!", "✓".green().bold());
        println!(
            "  {} pages, {} reclaimable, {} stored",
            results.len().to_string().cyan(),
            format_bytes(total).cyan(),
            stored.to_string().cyan()
        );
        if let Some(status) = &summary.status {
            println!(
                "  {} results/min, {:.0} ms average, health {}",
                status.performance.results_per_minute,
                status.performance.average_processing_ms,
                status.health.status.as_str()
            );
        }
        println!();
    }

    let report = match format {
        ReportFormat::Text => generate_report(&results),
        ReportFormat::Json => {
            let session = db.get_session(&session_id)?;
            generate_json_report(&results, session.as_ref())?
        }
    };

    match output {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }

    Ok(())
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
