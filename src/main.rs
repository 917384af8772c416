use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use homedir::my_home;
use tracing_subscriber::EnvFilter;

use smartfind::app::{App, Event, TriggerOutcome};
use smartfind::config::Config;
use smartfind::lock::FileLock;

mod cli;

/// How often the daemon loop drains worker events and input
const TICK: Duration = Duration::from_millis(100);

fn base_path(arg: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }

    if let Ok(path) = std::env::var("SMARTFIND_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/smartfind"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = base_path(args.base_path)?;
    let config = Config::load_with(&base_path)?;

    match args.command {
        cli::Command::Daemon {} => {
            let _lock = FileLock::try_acquire(&base_path)?;
            let app = App::from_config(config)?;
            run_daemon(&app)
        }

        cli::Command::Index { roots } => {
            let _lock = FileLock::try_acquire(&base_path)?;
            let app = App::from_config(config)?;
            let report = app.run_manual_index_blocking(roots)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        cli::Command::Search { query } => {
            let app = App::from_config(config)?;
            let results = app.search_blocking(&query.join(" "))?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
    }
}

fn run_daemon(app: &App) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    })
    .context("failed to set Ctrl+C handler")?;

    // stdin is read on its own thread so the loop below never blocks
    let (input_tx, input_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if input_tx.send(line).is_err() {
                break;
            }
        }
    });

    app.start_continuous_indexing();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let mut quit = false;
        for line in input_rx.try_iter() {
            if !handle_input(app, line.trim()) {
                quit = true;
            }
        }
        if quit {
            break;
        }

        for event in app.poll_events() {
            print_event(event)?;
        }

        std::thread::sleep(TICK);
    }

    app.shutdown();
    for event in app.poll_events() {
        print_event(event)?;
    }

    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_input(app: &App, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    if line == ":quit" {
        return false;
    }

    if let Some(rest) = line.strip_prefix(":index") {
        let roots: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
        if roots.is_empty() {
            eprintln!("usage: :index <folder>...");
            return true;
        }

        match app.start_manual_index(roots) {
            TriggerOutcome::Started => eprintln!("indexing started"),
            TriggerOutcome::AlreadyRunning => eprintln!("indexing already in progress"),
        }
        return true;
    }

    app.search(line);
    true
}

fn print_event(event: Event) -> anyhow::Result<()> {
    match event {
        Event::StatusChanged(status) => log::debug!("status: {status:?}"),
        Event::PassFinished { kind, report } => {
            log::info!("{kind:?} pass done: {}", serde_json::to_string(&report)?)
        }
        Event::PassFailed { kind, error } => log::error!("{kind:?} pass failed: {error}"),
        Event::ResultsReady { results, .. } => {
            println!("{}", serde_json::to_string_pretty(&results)?)
        }
        Event::SearchFailed { query, error } => eprintln!("search {query:?} failed: {error}"),
    }
    Ok(())
}
