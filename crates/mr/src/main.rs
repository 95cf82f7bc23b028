//! mr - record, replay and trigger input macros
//!
//! Macros are stored as JSON under ~/.macro-recorder (or `--dir`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use macro_recorder::prelude::*;
use macro_recorder::testing::{DrySink, ManualSource};
use macro_recorder::{platform, TriggerCoordinator};

#[derive(Parser)]
#[command(name = "mr")]
#[command(about = "Record and replay keyboard/mouse macros")]
#[command(version)]
struct Cli {
    /// Macro directory (default: ~/.macro-recorder)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,
    /// More logging (-v info, -vv debug, -vvv trace). RUST_LOG wins if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record input until Ctrl+C
    Record {
        #[arg(short, long, default_value = "macro")]
        name: String,
        /// Key that replays this macro under `mr listen`, e.g. f9
        #[arg(short, long)]
        trigger: Option<String>,
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
        /// Don't record pointer movement
        #[arg(long)]
        no_moves: bool,
    },
    /// Replay a stored macro
    Replay {
        name: String,
        /// Overrides the stored speed
        #[arg(short, long)]
        speed: Option<f64>,
        /// Seconds to wait before starting
        #[arg(short, long, default_value = "2")]
        delay: f64,
        /// Log actions instead of performing them
        #[arg(long)]
        dry_run: bool,
    },
    /// List stored macros
    List,
    /// Show a macro
    Show {
        name: String,
        /// Print every event
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Delete a macro
    Delete {
        name: String,
    },
    /// Import a bare event list as a macro
    Import {
        file: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        trigger: Option<String>,
    },
    /// Export a macro's events as a bare event list
    Export {
        name: String,
        file: PathBuf,
    },
    /// Fire stored macros when their trigger key is pressed, until Ctrl+C
    Listen,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let dir = cli.dir.as_deref();
    let result = match cli.command {
        Commands::Record { name, trigger, speed, no_moves } => record(dir, &name, trigger, speed, no_moves),
        Commands::Replay { name, speed, delay, dry_run } => replay(dir, &name, speed, delay, dry_run),
        Commands::List => list(dir),
        Commands::Show { name, all, json } => show(dir, &name, all, json),
        Commands::Delete { name } => delete(dir, &name),
        Commands::Import { file, name, trigger } => import(dir, &file, &name, trigger),
        Commands::Export { name, file } => export(dir, &name, &file),
        Commands::Listen => listen(dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .init();
}

fn storage(dir: Option<&Path>) -> Result<MacroStorage> {
    match dir {
        Some(d) => MacroStorage::with_dir(d),
        None => MacroStorage::new(),
    }
}

/// Flag flipped by Ctrl+C
fn interrupted() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;
    Ok(running)
}

fn record(dir: Option<&Path>, name: &str, trigger: Option<String>, speed: f64, no_moves: bool) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        bail!("speed must be a positive number, got {}", speed);
    }
    let storage = storage(dir)?;
    let (source, sink) = platform::default_backend()?;
    let config = SessionConfig {
        recorder: RecorderConfig {
            record_pointer_moves: !no_moves,
            ..Default::default()
        },
        ..Default::default()
    };
    let session = SessionManager::new(source, sink, config);

    let running = interrupted()?;
    session.begin_capture()?;
    println!("Recording: {} (Ctrl+C to stop)", name);

    let mut count = 0;
    while running.load(Ordering::SeqCst) {
        let n = session.captured().unwrap_or(0);
        if n != count {
            count = n;
            print!("\r{} events", count);
            io::stdout().flush()?;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let events = session.end_capture()?;
    println!("\n{} events recorded", events.len());

    let mut m = Macro::new(name, events).with_speed(speed);
    m.trigger = trigger;
    let path = storage.save(&m)?;
    println!("Saved: {}", path.display());
    Ok(())
}

fn replay(dir: Option<&Path>, name: &str, speed: Option<f64>, delay: f64, dry_run: bool) -> Result<()> {
    let m = storage(dir)?.load(name)?;
    let speed = speed.unwrap_or(m.speed);
    let start_delay = Duration::try_from_secs_f64(delay).context("invalid --delay")?;

    let (source, sink): (Arc<dyn InputSource>, Arc<dyn InputSink>) = if dry_run {
        (Arc::new(ManualSource::new()), Arc::new(DrySink))
    } else {
        platform::default_backend()?
    };
    let config = SessionConfig {
        replay: ReplayConfig { start_delay },
        ..Default::default()
    };
    let session = Arc::new(SessionManager::new(source, sink, config));

    let s = session.clone();
    ctrlc::set_handler(move || s.cancel_all())?;

    println!("Replaying {} ({} events) at {}x speed...", m.name, m.events.len(), speed);
    if !start_delay.is_zero() {
        println!("Starting in {} seconds...", delay);
    }
    let report = session.play_blocking(m.events, speed)?;

    if report.cancelled {
        println!("Cancelled after {} events", report.dispatched);
    } else {
        println!(
            "Done! {} moves, {} buttons, {} scrolls, {} keys in {:.2}s",
            report.moves,
            report.buttons,
            report.scrolls,
            report.keys,
            report.elapsed.as_secs_f64()
        );
    }
    for skipped in &report.skipped {
        println!("  skipped event {}: {}", skipped.index, skipped.error);
    }
    Ok(())
}

fn list(dir: Option<&Path>) -> Result<()> {
    let storage = storage(dir)?;
    let macros = storage.load_all()?;
    if macros.is_empty() {
        println!("No macros saved.");
    }
    for m in macros {
        match &m.trigger {
            Some(t) => println!("{} [{}] ({} events)", m.name, t, m.events.len()),
            None => println!("{} ({} events)", m.name, m.events.len()),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct MacroInfo<'a> {
    name: &'a str,
    trigger: Option<&'a str>,
    speed: f64,
    recorded_at: String,
    events: usize,
    duration_secs: f64,
    summary: SequenceSummary,
}

fn show(dir: Option<&Path>, name: &str, all: bool, json: bool) -> Result<()> {
    let m = storage(dir)?.load(name)?;
    let summary = m.events.summary();

    if json {
        let info = MacroInfo {
            name: &m.name,
            trigger: m.trigger.as_deref(),
            speed: m.speed,
            recorded_at: m.recorded_at.to_rfc3339(),
            events: m.events.len(),
            duration_secs: m.events.duration().as_secs_f64(),
            summary,
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Name: {}", m.name);
    if let Some(t) = &m.trigger {
        println!("Trigger: {}", t);
    }
    println!("Speed: {}x", m.speed);
    println!("Recorded: {}", m.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Events: {} over {:.2}s", m.events.len(), m.events.duration().as_secs_f64());
    println!(
        "\nSummary: {} moves, {} buttons, {} scrolls, {} key presses, {} key releases",
        summary.moves, summary.buttons, summary.scrolls, summary.key_downs, summary.key_ups
    );
    if all {
        for (i, e) in m.events.iter().enumerate() {
            println!("{}: {:>8.3}s {:?}", i, e.timestamp, e.kind);
        }
    }
    Ok(())
}

fn delete(dir: Option<&Path>, name: &str) -> Result<()> {
    storage(dir)?.delete(name)?;
    println!("Deleted: {}", name);
    Ok(())
}

fn import(dir: Option<&Path>, file: &Path, name: &str, trigger: Option<String>) -> Result<()> {
    let storage = storage(dir)?;
    let events = MacroStorage::import_events(file)?;
    let mut m = Macro::new(name, events);
    m.trigger = trigger;
    let path = storage.save(&m)?;
    println!("Imported {} events: {}", m.events.len(), path.display());
    Ok(())
}

fn export(dir: Option<&Path>, name: &str, file: &Path) -> Result<()> {
    let m = storage(dir)?.load(name)?;
    MacroStorage::export_events(&m, file)?;
    println!("Exported {} events to {}", m.events.len(), file.display());
    Ok(())
}

fn listen(dir: Option<&Path>) -> Result<()> {
    let storage = storage(dir)?;
    let (source, sink) = platform::default_backend()?;
    let session = SessionManager::new(source.clone(), sink, SessionConfig::default());

    let mut bound = 0;
    for m in storage.load_all()? {
        let Some(trigger) = m.trigger.clone() else { continue };
        let key = Key::parse(&trigger).name();
        session.bind_trigger(key.clone(), m.events, m.speed)?;
        info!(trigger = %key, name = %m.name, speed = m.speed, "trigger bound");
        println!("{} -> {}", key, m.name);
        bound += 1;
    }
    if bound == 0 {
        bail!("no stored macro has a trigger (record with --trigger)");
    }

    let running = interrupted()?;
    let events = session.subscribe();
    let subscription = source.subscribe(TriggerCoordinator::hotkey_listener(session.triggers().clone()))?;
    println!("Listening for {} trigger(s) (Ctrl+C to stop)", bound);

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(PlaybackEvent::Started { id, origin }) => println!("{} started ({:?})", id, origin),
            Ok(PlaybackEvent::Finished { id, report, .. }) => {
                info!(%id, dispatched = report.dispatched, cancelled = report.cancelled, "trigger playback finished");
                println!("{} finished: {} events, {} skipped", id, report.dispatched, report.skipped.len())
            }
            Ok(PlaybackEvent::Failed { id, origin, reason }) => {
                warn!(%id, ?origin, %reason, "trigger playback failed");
                println!("{} failed: {}", id, reason)
            }
            Err(_) => {}
        }
    }

    subscription.cancel();
    session.shutdown();
    Ok(())
}
