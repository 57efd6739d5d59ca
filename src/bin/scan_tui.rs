//! Scan TUI - operator screen for the ticket scan station
//!
//! Shows the live camera preview while scanning and the verification outcome
//! once a ticket is resolved. Logs go to the file named in `[logging] file`.
//!
//! Keys: Enter/Space scan again, `c` switch camera, `q`/Esc quit.

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use ticket_scanner::domain::VerificationOutcome;
use ticket_scanner::infra::logging::init_file_logging;
use ticket_scanner::infra::{Config, Metrics};
use ticket_scanner::io::decoder::Preview;
use ticket_scanner::io::{FrameDirCamera, HttpVerificationClient, QrReader};
use ticket_scanner::services::{
    CameraStatus, OperatorCommand, ScanStation, ScanViewState, StationHandle, StationView,
};
use tracing::info;

/// Darkest to brightest
const SHADES: &[u8] = b" .:-=+*#%@";

#[derive(Parser, Debug)]
#[command(name = "scan-tui", version, about = "Ticket scan station operator screen")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Override the service base URL from the config
    #[arg(long)]
    api_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = Config::load_from_path(&args.config);
    if let Some(url) = &args.api_url {
        config = config.with_api_base_url(url);
    }
    init_file_logging(config.log_file(), config.log_json())?;
    info!(config_file = %config.config_file(), "scan-tui starting");

    let metrics = Arc::new(Metrics::new());
    let verifier = Arc::new(HttpVerificationClient::from_config(&config)?);
    let backend = Arc::new(FrameDirCamera::from_config(&config));
    let (station, handle) =
        ScanStation::new(&config, backend, Arc::new(QrReader), verifier, metrics.clone());
    let station_task = tokio::spawn(station.run());

    let metrics_interval = config.metrics_interval_secs();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_ui(&mut terminal, &handle).await;

    handle.send(OperatorCommand::Shutdown).await;
    let _ = station_task.await;
    reporter.abort();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    info!("scan-tui stopped");
    result
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    handle: &StationHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_rate = Duration::from_millis(100);
    let view = handle.view();
    let preview = handle.preview();

    loop {
        let current = view.borrow().clone();
        let frame = preview.borrow().clone();
        terminal.draw(|f| draw_ui(f, &current, frame.as_ref()))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let command = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Enter | KeyCode::Char(' ') => OperatorCommand::ScanAgain,
                    KeyCode::Char('c') => OperatorCommand::SwitchCamera,
                    _ => continue,
                };
                if !handle.send(command).await {
                    return Ok(());
                }
            }
        }
    }
}

fn draw_ui(f: &mut Frame, view: &StationView, preview: Option<&Preview>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Preview or outcome
            Constraint::Length(3), // Key help
        ])
        .split(f.area());

    draw_header(f, chunks[0], view);
    match &view.state {
        ScanViewState::Scanning => draw_preview(f, chunks[1], view, preview),
        ScanViewState::Resolved(outcome) => draw_outcome(f, chunks[1], outcome),
    }

    let help = match view.state {
        ScanViewState::Scanning => "c: switch camera | q: quit",
        ScanViewState::Resolved(_) => "Enter: scan again | c: switch camera | q: quit",
    };
    f.render_widget(
        Paragraph::new(help).alignment(Alignment::Center).block(Block::default().borders(Borders::ALL)),
        chunks[2],
    );
}

fn draw_header(f: &mut Frame, area: Rect, view: &StationView) {
    let (camera_text, camera_color) = match &view.camera {
        CameraStatus::Starting => ("starting".to_string(), Color::Yellow),
        CameraStatus::Active { session_id } => (format!("session {}", session_id), Color::Green),
        CameraStatus::Unavailable { reason } => (format!("unavailable: {}", reason), Color::Red),
        CameraStatus::Stopped => ("stopped".to_string(), Color::DarkGray),
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Ticket Scanner ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| Camera: "),
        Span::styled(view.facing.as_str(), Style::default().fg(Color::Yellow)),
        Span::raw(" "),
        Span::styled(camera_text, Style::default().fg(camera_color)),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_preview(f: &mut Frame, area: Rect, view: &StationView, preview: Option<&Preview>) {
    let title = if view.awaiting { " Checking ticket... " } else { " Point the camera at a ticket " };
    let block = Block::default().borders(Borders::ALL).title(title);

    let lines: Vec<Line> = match preview {
        Some(preview) => shade_rows(preview).into_iter().map(Line::from).collect(),
        None => vec![Line::from(Span::styled(
            "no camera image",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    f.render_widget(Paragraph::new(lines).alignment(Alignment::Center).block(block), area);
}

/// Render a preview frame as rows of shading characters
fn shade_rows(preview: &Preview) -> Vec<String> {
    let frame = &preview.frame;
    (0..frame.height)
        .map(|y| {
            (0..frame.width)
                .map(|x| {
                    let level = usize::from(frame.pixel(x, y)) * (SHADES.len() - 1) / 255;
                    SHADES[level] as char
                })
                .collect()
        })
        .collect()
}

fn draw_outcome(f: &mut Frame, area: Rect, outcome: &VerificationOutcome) {
    let (title, color, lines) = match outcome {
        VerificationOutcome::Success { travel } => (
            " VALID TICKET ",
            Color::Green,
            vec![
                Line::from(Span::styled(
                    travel.passenger(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!("{} -> {}", travel.from, travel.to)),
                Line::from(travel.display_date()),
            ],
        ),
        VerificationOutcome::Failure => (
            " INVALID TICKET ",
            Color::Red,
            vec![Line::from("The ticket could not be verified.")],
        ),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(Span::styled(title, Style::default().fg(color).add_modifier(Modifier::BOLD)));
    f.render_widget(Paragraph::new(lines).alignment(Alignment::Center).block(block), area);
}
