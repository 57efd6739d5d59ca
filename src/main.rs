//! Ticket scanner - transit ticket verification station and reservation admin
//!
//! Module structure:
//! - `domain/` - Ticket and reservation types, the scan interpreter
//! - `io/` - Camera, decoder, HTTP clients, mock service
//! - `services/` - Scan state machine, camera sessions, scan station
//! - `infra/` - Config, logging, metrics

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use ticket_scanner::domain::reservation::count_on;
use ticket_scanner::domain::{PassengerKind, Reservation, ReservationFilter, VerificationOutcome};
use ticket_scanner::infra::logging::init_logging;
use ticket_scanner::infra::{Config, Metrics};
use ticket_scanner::io::{FrameDirCamera, HttpVerificationClient, QrReader, ReservationClient};
use ticket_scanner::services::{
    CameraStatus, OperatorCommand, ScanStation, ScanViewState, StationView,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Ticket scanner - verify tickets and administer reservations
#[derive(Parser, Debug)]
#[command(name = "ticket-scanner", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Override the service base URL from the config
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a headless scan station; stdin takes `again`, `switch`, `quit`
    Scan,
    /// List reservations, optionally filtered
    Reservations {
        /// Travel day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Substring of passenger name or surname
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        /// Show contact and document fields
        #[arg(long)]
        details: bool,
    },
    /// Show the route map
    Routes,
    /// Quote the price of a route
    Price {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "1")]
        adults: usize,
        #[arg(long, default_value = "0")]
        students: usize,
    },
    /// Set the base price of a route
    SetPrice {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        price: f64,
    },
    /// Inspect or change whether sales are open on a day
    Sales {
        action: SalesAction,
        /// Travel day (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SalesAction {
    Status,
    Start,
    Stop,
    Toggle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration from TOML file
    let mut config = Config::load_from_path(&args.config);
    if let Some(url) = &args.api_url {
        config = config.with_api_base_url(url);
    }

    init_logging(config.log_json());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        config_file = %config.config_file(),
        api_base_url = %config.api_base_url(),
        "ticket-scanner starting"
    );

    match args.command {
        Command::Scan => run_station(config).await,
        Command::Reservations { date, search, from, to, details } => {
            let client = reservation_client(&config)?;
            let reservations =
                client.list_reservations().await.context("Failed to load reservations")?;
            let filter = ReservationFilter { date, search, from, to };
            let shown = filter.apply(&reservations);
            for reservation in &shown {
                print_reservation(reservation, details);
            }
            println!("{} of {} reservations", shown.len(), reservations.len());
            if let Some(day) = date {
                println!("{} travelling on {}", count_on(&reservations, day), day);
            }
            Ok(())
        }
        Command::Routes => {
            let client = reservation_client(&config)?;
            let routes = client.routes().await.context("Failed to load routes")?;
            for (from, destinations) in &routes {
                println!("{} -> {}", from, destinations.join(", "));
            }
            Ok(())
        }
        Command::Price { from, to, adults, students } => {
            let client = reservation_client(&config)?;
            let mut passengers = vec![PassengerKind { is_student: false }; adults];
            passengers.extend(vec![PassengerKind { is_student: true }; students]);
            if passengers.is_empty() {
                passengers.push(PassengerKind::default());
            }
            let price = client
                .price(&from, &to, &passengers)
                .await
                .with_context(|| format!("Failed to get price for {} -> {}", from, to))?;
            println!("{} -> {}: {}", from, to, price);
            Ok(())
        }
        Command::SetPrice { from, to, price } => {
            let client = reservation_client(&config)?;
            client
                .update_price(&from, &to, price)
                .await
                .with_context(|| format!("Failed to update price for {} -> {}", from, to))?;
            println!("{} -> {}: price set to {}", from, to, price);
            Ok(())
        }
        Command::Sales { action, date } => {
            let client = reservation_client(&config)?;
            let stopped = match action {
                SalesAction::Status => client.reservation_status(date).await,
                SalesAction::Start => client.start_sales(date).await.map(|_| false),
                SalesAction::Stop => client.stop_sales(date).await.map(|_| true),
                SalesAction::Toggle => client.toggle_sales(date).await,
            }
            .with_context(|| format!("Failed to {:?} sales for {}", action, date))?;
            println!("sales on {}: {}", date, if stopped { "stopped" } else { "open" });
            Ok(())
        }
    }
}

fn reservation_client(config: &Config) -> anyhow::Result<ReservationClient> {
    ReservationClient::from_config(config).context("Failed to build HTTP client")
}

fn print_reservation(reservation: &Reservation, details: bool) {
    let day = reservation
        .travel_day()
        .map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| reservation.date.clone());
    println!(
        "{}  {} {}  {} ({}) {} -> {} ({}) {}{}",
        day,
        reservation.name,
        reservation.surname,
        reservation.from,
        reservation.from_station,
        reservation.departure_time,
        reservation.to,
        reservation.to_station,
        reservation.arrival_time,
        if reservation.is_student { "  [student]" } else { "" },
    );
    if details {
        println!(
            "    trip: {}  phone: {}  email: {}  passport: {}  student id: {}",
            reservation.trip_type,
            reservation.phone,
            reservation.email,
            reservation.passport_serial,
            reservation.student_id_serial,
        );
    }
}

/// Headless scan station: outcomes go to stdout, commands come from stdin
async fn run_station(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new());
    let verifier =
        Arc::new(HttpVerificationClient::from_config(&config).context("Failed to build HTTP client")?);
    let backend = Arc::new(FrameDirCamera::from_config(&config));
    let (station, handle) =
        ScanStation::new(&config, backend, Arc::new(QrReader), verifier, metrics.clone());

    // Start metrics reporter
    let metrics_interval = config.metrics_interval_secs();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    });

    // Print every change of the displayed state
    let mut view = handle.view();
    tokio::spawn(async move {
        let mut last = view.borrow_and_update().clone();
        print_view(&last);
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            if current != last {
                print_view(&current);
                last = current;
            }
        }
    });

    // Operator commands from stdin, Ctrl+C shuts down
    let commands = handle.commands();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let command = tokio::select! {
                _ = tokio::signal::ctrl_c() => OperatorCommand::Shutdown,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match line.trim() {
                        "" | "a" | "again" => OperatorCommand::ScanAgain,
                        "s" | "switch" => OperatorCommand::SwitchCamera,
                        "q" | "quit" => OperatorCommand::Shutdown,
                        other => {
                            println!("unknown command '{}' (again, switch, quit)", other);
                            continue;
                        }
                    },
                    _ => OperatorCommand::Shutdown,
                },
            };
            let shutdown = command == OperatorCommand::Shutdown;
            if commands.send(command).await.is_err() || shutdown {
                break;
            }
        }
    });

    station.run().await;
    reporter.abort();
    info!("ticket-scanner shutdown complete");
    Ok(())
}

fn print_view(view: &StationView) {
    let camera = match &view.camera {
        CameraStatus::Starting => "starting".to_string(),
        CameraStatus::Active { session_id } => format!("active (session {})", session_id),
        CameraStatus::Unavailable { reason } => format!("unavailable: {}", reason),
        CameraStatus::Stopped => "stopped".to_string(),
    };
    match &view.state {
        ScanViewState::Scanning if view.awaiting => {
            println!("[{}] checking ticket...", view.facing)
        }
        ScanViewState::Scanning => println!("[{}] scanning, camera {}", view.facing, camera),
        ScanViewState::Resolved(VerificationOutcome::Success { travel }) => println!(
            "VALID  {} {} -> {}  {}  (enter = scan again)",
            travel.passenger(),
            travel.from,
            travel.to,
            travel.display_date()
        ),
        ScanViewState::Resolved(VerificationOutcome::Failure) => {
            println!("INVALID ticket  (enter = scan again)")
        }
    }
}
