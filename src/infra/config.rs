//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The binaries resolve the path with clap; this module only loads it.

use crate::domain::FacingMode;
use crate::io::decoder::MAX_FPS;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the ticketing REST service (credentials may be embedded)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bound on every request, including ticket verification
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: default_base_url(), timeout_ms: default_api_timeout_ms() }
    }
}

fn default_base_url() -> String {
    "https://lavial.icu".to_string()
}

fn default_api_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Decode attempts per second
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Region of interest, centred in the frame
    #[serde(default = "default_roi_side")]
    pub roi_width: u32,
    #[serde(default = "default_roi_side")]
    pub roi_height: u32,
    #[serde(default)]
    pub initial_facing: FacingMode,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Preview raster published to renderers
    #[serde(default = "default_preview_width")]
    pub preview_width: u32,
    #[serde(default = "default_preview_height")]
    pub preview_height: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            roi_width: default_roi_side(),
            roi_height: default_roi_side(),
            initial_facing: FacingMode::default(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            preview_width: default_preview_width(),
            preview_height: default_preview_height(),
        }
    }
}

fn default_fps() -> u32 {
    10
}

fn default_roi_side() -> u32 {
    250
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_preview_width() -> u32 {
    64
}

fn default_preview_height() -> u32 {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Frame directory fed by the rear (environment-facing) camera
    #[serde(default = "default_environment_dir")]
    pub environment_dir: PathBuf,
    /// Frame directory fed by the front (user-facing) camera
    #[serde(default = "default_user_dir")]
    pub user_dir: PathBuf,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { environment_dir: default_environment_dir(), user_dir: default_user_dir() }
    }
}

fn default_environment_dir() -> PathBuf {
    PathBuf::from("/var/lib/ticket-scanner/camera/environment")
}

fn default_user_dir() -> PathBuf {
    PathBuf::from("/var/lib/ticket-scanner/camera/user")
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log file used by the TUI (the terminal is taken by the UI)
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { file: default_log_file(), json: false }
    }
}

fn default_log_file() -> String {
    "ticket-scanner.log".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    api_base_url: String,
    api_timeout_ms: u64,
    scan_fps: u32,
    roi_width: u32,
    roi_height: u32,
    initial_facing: FacingMode,
    acquire_timeout_ms: u64,
    preview_width: u32,
    preview_height: u32,
    environment_dir: PathBuf,
    user_dir: PathBuf,
    metrics_interval_secs: u64,
    log_file: String,
    log_json: bool,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            api_base_url: toml_config.api.base_url.trim_end_matches('/').to_string(),
            api_timeout_ms: toml_config.api.timeout_ms,
            scan_fps: toml_config.scanner.fps.clamp(1, MAX_FPS),
            roi_width: toml_config.scanner.roi_width,
            roi_height: toml_config.scanner.roi_height,
            initial_facing: toml_config.scanner.initial_facing,
            acquire_timeout_ms: toml_config.scanner.acquire_timeout_ms,
            preview_width: toml_config.scanner.preview_width,
            preview_height: toml_config.scanner.preview_height,
            environment_dir: toml_config.camera.environment_dir,
            user_dir: toml_config.camera.user_dir,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            log_file: toml_config.logging.file,
            log_json: toml_config.logging.json,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Frame directory for the camera facing `facing`
    pub fn camera_dir(&self, facing: FacingMode) -> &Path {
        match facing {
            FacingMode::Environment => &self.environment_dir,
            FacingMode::User => &self.user_dir,
        }
    }

    // Getters for all config fields
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn api_timeout_ms(&self) -> u64 {
        self.api_timeout_ms
    }

    pub fn scan_fps(&self) -> u32 {
        self.scan_fps
    }

    pub fn roi_size(&self) -> (u32, u32) {
        (self.roi_width, self.roi_height)
    }

    pub fn initial_facing(&self) -> FacingMode {
        self.initial_facing
    }

    pub fn acquire_timeout_ms(&self) -> u64 {
        self.acquire_timeout_ms
    }

    pub fn preview_size(&self) -> (u32, u32) {
        (self.preview_width, self.preview_height)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Point the config at another service (CLI override, tests)
    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Override both camera frame directories
    pub fn with_camera_dirs(mut self, environment: PathBuf, user: PathBuf) -> Self {
        self.environment_dir = environment;
        self.user_dir = user;
        self
    }

    pub fn with_api_timeout_ms(mut self, ms: u64) -> Self {
        self.api_timeout_ms = ms;
        self
    }
}
