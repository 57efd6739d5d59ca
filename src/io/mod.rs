//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `camera` - Camera backends, frame type, and the scoped camera lease
//! - `decoder` - Frame sampling and QR decoding with a one-shot arm gate
//! - `http` - Service base URL, Basic auth, shared client settings
//! - `verify_client` - Ticket verification endpoint
//! - `reservation_client` - Reservation administration endpoints
//! - `mock_api` - In-memory HTTP stand-in for the ticketing service

pub mod camera;
pub mod decoder;
pub mod http;
pub mod mock_api;
pub mod reservation_client;
pub mod verify_client;

// Re-export commonly used types
pub use camera::{CameraBackend, CameraError, FrameDirCamera};
pub use decoder::{CodeReader, QrReader};
pub use mock_api::MockApi;
pub use reservation_client::{ApiError, ReservationClient};
pub use verify_client::{HttpVerificationClient, VerificationClient};
