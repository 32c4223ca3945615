// src/main.rs

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::prelude::*;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use vanguard_intel::{logging, Config, Pipeline, ScanData, ScanReport};

mod app;
mod ui;

use app::{App, AppState};

/// Client id used for rate limiting scans started from this process.
const LOCAL_CLIENT: &str = "local";

type ScanOutcome = std::result::Result<ScanReport, String>;

#[derive(Parser, Debug)]
#[command(version, about = "Domain and website intelligence scanner")]
struct Cli {
    /// Domain, URL or IP address to scan. Opens the interactive UI when omitted.
    target: Option<String>,

    /// Print the report as JSON instead of opening the interactive UI.
    #[arg(long, requires = "target")]
    json: bool,

    /// Configuration file (TOML). Defaults to the platform config directory.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::initialize_logging()?;

    let config = Config::load(cli.config.as_deref())?;
    let data = ScanData::load(&config)?;
    let pipeline = Arc::new(Pipeline::from_config(config, data)?);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting up.");

    match (cli.json, cli.target) {
        (true, Some(target)) => run_json(&pipeline, &target).await,
        (_, target) => run_tui(pipeline, target).await,
    }
}

async fn run_json(pipeline: &Pipeline, target: &str) -> Result<()> {
    let report = pipeline.scan(LOCAL_CLIENT, target).await.map_err(|e| {
        error!(error = %e, code = e.code(), "Scan rejected.");
        eyre!("{} ({})", e, e.code())
    })?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_tui(pipeline: Arc<Pipeline>, target: Option<String>) -> Result<()> {
    // --- Setup ---
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableMouseCapture)?;
    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut app = App::new();
    let (tx, mut rx) = mpsc::channel(1);

    if let Some(target) = target {
        app.input = target;
        start_scan(&mut app, &pipeline, &tx);
    }

    let outcome = event_loop(&mut terminal, &mut app, &pipeline, &tx, &mut rx).await;

    // --- Restore Terminal ---
    stdout().execute(LeaveAlternateScreen)?;
    stdout().execute(DisableMouseCapture)?;
    disable_raw_mode()?;
    outcome
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
    pipeline: &Arc<Pipeline>,
    tx: &mpsc::Sender<ScanOutcome>,
    rx: &mut mpsc::Receiver<ScanOutcome>,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if event::poll(Duration::from_millis(100))? {
            handle_events(app, pipeline, tx)?;
        }

        if let Ok(outcome) = rx.try_recv() {
            app.finish_scan(outcome);
        }
        app.on_tick();
    }
    Ok(())
}

fn handle_events(app: &mut App, pipeline: &Arc<Pipeline>, tx: &mpsc::Sender<ScanOutcome>) -> Result<()> {
    if let Event::Key(key) = event::read()? {
        if key.kind == KeyEventKind::Press {
            match app.state {
                AppState::Idle => handle_idle_input(app, key.code, pipeline, tx),
                AppState::Finished => handle_finished_input(app, key.code),
                AppState::Scanning => {
                    if key.code == KeyCode::Char('q') {
                        app.quit();
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_idle_input(
    app: &mut App,
    key_code: KeyCode,
    pipeline: &Arc<Pipeline>,
    tx: &mpsc::Sender<ScanOutcome>,
) {
    match key_code {
        KeyCode::Esc => app.quit(),
        KeyCode::Char(c) => app.input.push(c),
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Enter => {
            if !app.input.trim().is_empty() {
                start_scan(app, pipeline, tx);
            }
        }
        _ => {}
    }
}

/// Hands the input to the pipeline on a background task. Target validation
/// happens there; a rejected target comes back as an error outcome.
fn start_scan(app: &mut App, pipeline: &Arc<Pipeline>, tx: &mpsc::Sender<ScanOutcome>) {
    app.state = AppState::Scanning;
    let pipeline = pipeline.clone();
    let tx = tx.clone();
    let raw_input = app.input.trim().to_string();

    tokio::spawn(async move {
        let outcome = pipeline
            .scan(LOCAL_CLIENT, &raw_input)
            .await
            .map_err(|e| e.to_string());
        deliver(&tx, outcome).await;
    });
}

/// Hands a finished scan to the UI loop. Returns `false` if the UI is gone.
async fn deliver(tx: &mpsc::Sender<ScanOutcome>, outcome: ScanOutcome) -> bool {
    match tx.send(outcome).await {
        Ok(()) => true,
        Err(_) => {
            debug!("UI closed before the scan finished, dropping the result.");
            false
        }
    }
}

fn handle_finished_input(app: &mut App, key_code: KeyCode) {
    match key_code {
        KeyCode::Char('q') => app.quit(),
        KeyCode::Char('n') => app.reset(),
        KeyCode::Char('e') => app.export_report(logging::get_data_dir().join("reports")),
        KeyCode::Up => app.scroll_up(),
        KeyCode::Down => app.scroll_down(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outcome_is_dropped_quietly_once_the_ui_is_gone() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(deliver(&tx, Err("rate limited".into())).await);
        assert_eq!(rx.recv().await, Some(Err("rate limited".to_string())));

        drop(rx);
        assert!(!deliver(&tx, Err("too late".into())).await);
    }
}
