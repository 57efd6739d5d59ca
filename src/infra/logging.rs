//! Structured logging setup
//!
//! Level comes from RUST_LOG (default: info). The TUI logs to a file so the
//! terminal stays free for rendering.

use anyhow::Context;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stdout
pub fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log to an append-only file
pub fn init_file_logging(path: &str, json: bool) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
