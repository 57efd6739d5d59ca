//! Domain models - ticket verification and reservation types
//!
//! - `ticket` - Ticket references, verification outcomes, the scan interpreter
//! - `reservation` - Reservation records and list filtering

pub mod reservation;
pub mod ticket;

// Re-export commonly used types at module level
pub use reservation::{PassengerKind, Reservation, ReservationFilter, Routes};
pub use ticket::{
    interpret, AttemptId, FacingMode, InterpretError, TicketReference, TravelInfo,
    VerificationOutcome,
};
