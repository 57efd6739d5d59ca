//! Scan view state machine
//!
//! States: `Scanning` (with an optional in-flight attempt) and
//! `Resolved(outcome)`. Every input goes through a transition method that
//! returns a `Step` telling the runtime what to do. The machine performs no
//! I/O, so the guard rules are checked here and nowhere else:
//! - at most one verification attempt in flight
//! - decodes while awaiting or resolved are dropped
//! - results for anything but the in-flight attempt are dropped
//! - "scan again" only leaves `Resolved`

use crate::domain::{interpret, AttemptId, InterpretError, TicketReference, VerificationOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScanViewState {
    #[default]
    Scanning,
    Resolved(VerificationOutcome),
}

impl ScanViewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanViewState::Scanning => "scanning",
            ScanViewState::Resolved(_) => "resolved",
        }
    }
}

/// Why an input caused no transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A verification call for another decode is still in flight
    AttemptInFlight,
    /// An outcome is displayed; only "scan again" is accepted
    AlreadyResolved,
    /// Result for an attempt that is no longer in flight
    StaleResult,
    /// "Scan again" while not showing a result
    NotResolved,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::AttemptInFlight => "attempt_in_flight",
            IgnoreReason::AlreadyResolved => "already_resolved",
            IgnoreReason::StaleResult => "stale_result",
            IgnoreReason::NotResolved => "not_resolved",
        }
    }
}

/// Effect the runtime must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Call the verification service once for this attempt
    Verify { attempt: AttemptId, reference: TicketReference },
    /// Payload rejected locally; the machine is now `Resolved(Failure)`
    Rejected { attempt: AttemptId, error: InterpretError },
    /// Verification finished; the machine is now `Resolved(outcome)`
    Resolved { attempt: AttemptId },
    /// Back to `Scanning`; the decoder must be re-armed
    Rearm,
    Ignored(IgnoreReason),
}

#[derive(Debug, Default)]
pub struct ScanMachine {
    state: ScanViewState,
    in_flight: Option<AttemptId>,
}

impl ScanMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ScanViewState {
        &self.state
    }

    /// True while a verification call is outstanding
    pub fn is_awaiting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<AttemptId> {
        self.in_flight
    }

    /// A code was decoded
    pub fn on_decoded(&mut self, raw: &str) -> Step {
        if matches!(self.state, ScanViewState::Resolved(_)) {
            return Step::Ignored(IgnoreReason::AlreadyResolved);
        }
        if self.in_flight.is_some() {
            return Step::Ignored(IgnoreReason::AttemptInFlight);
        }

        let attempt = AttemptId::new();
        match interpret(raw) {
            Ok(reference) => {
                self.in_flight = Some(attempt);
                Step::Verify { attempt, reference }
            }
            Err(error) => {
                self.state = ScanViewState::Resolved(VerificationOutcome::Failure);
                Step::Rejected { attempt, error }
            }
        }
    }

    /// The verification call for `attempt` finished
    pub fn on_verified(&mut self, attempt: AttemptId, outcome: VerificationOutcome) -> Step {
        if self.in_flight != Some(attempt) {
            return Step::Ignored(IgnoreReason::StaleResult);
        }
        self.in_flight = None;
        self.state = ScanViewState::Resolved(outcome);
        Step::Resolved { attempt }
    }

    /// Operator asked to scan again
    pub fn on_scan_again(&mut self) -> Step {
        match self.state {
            ScanViewState::Resolved(_) => {
                self.state = ScanViewState::Scanning;
                Step::Rearm
            }
            ScanViewState::Scanning => Step::Ignored(IgnoreReason::NotResolved),
        }
    }
}
