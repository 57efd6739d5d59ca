//! Services - scan flow state and orchestration
//!
//! This module contains the core business logic services:
//! - `scan_machine` - Pure scan view state machine with the verification guard
//! - `camera_session` - Camera lifecycle, one session at a time
//! - `scan_station` - Event loop tying decoder, machine and verifier together

pub mod camera_session;
pub mod scan_machine;
pub mod scan_station;

// Re-export commonly used types
pub use camera_session::CameraSessionManager;
pub use scan_machine::{ScanMachine, ScanViewState};
pub use scan_station::{CameraStatus, OperatorCommand, ScanStation, StationHandle, StationView};
