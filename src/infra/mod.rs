//! Infrastructure - configuration, logging, and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `logging` - tracing subscriber setup
//! - `metrics` - Lock-free scan station counters

pub mod config;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
