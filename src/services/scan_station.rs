//! Scan station - single owner of the scan view state machine
//!
//! The run loop processes one input at a time: operator commands, results of
//! verification calls, and decoder events. Verification calls run in their own
//! task so the loop keeps serving commands; their results come back over a
//! channel tagged with the attempt id that dispatched them.

use crate::domain::{AttemptId, FacingMode, TicketReference, VerificationOutcome};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::camera::CameraBackend;
use crate::io::decoder::{CodeReader, DecoderEvent, Preview};
use crate::io::verify_client::VerificationClient;
use crate::services::camera_session::CameraSessionManager;
use crate::services::scan_machine::{ScanMachine, ScanViewState, Step};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    ScanAgain,
    SwitchCamera,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraStatus {
    Starting,
    Active { session_id: u64 },
    Unavailable { reason: String },
    Stopped,
}

/// What renderers show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationView {
    pub state: ScanViewState,
    pub awaiting: bool,
    pub facing: FacingMode,
    pub camera: CameraStatus,
}

/// Result of one verification call, fed back into the loop
#[derive(Debug)]
struct VerificationResult {
    attempt: AttemptId,
    outcome: VerificationOutcome,
    latency_ms: u64,
}

/// Caller side of a running station
pub struct StationHandle {
    commands: mpsc::Sender<OperatorCommand>,
    view: watch::Receiver<StationView>,
    preview: watch::Receiver<Option<Preview>>,
}

impl StationHandle {
    /// Queue a command; false once the station has stopped
    pub async fn send(&self, command: OperatorCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn commands(&self) -> mpsc::Sender<OperatorCommand> {
        self.commands.clone()
    }

    pub fn view(&self) -> watch::Receiver<StationView> {
        self.view.clone()
    }

    pub fn preview(&self) -> watch::Receiver<Option<Preview>> {
        self.preview.clone()
    }
}

pub struct ScanStation {
    machine: ScanMachine,
    camera: CameraSessionManager,
    camera_status: CameraStatus,
    verifier: Arc<dyn VerificationClient>,
    verify_timeout: Duration,
    metrics: Arc<Metrics>,
    events_rx: mpsc::Receiver<DecoderEvent>,
    commands_rx: mpsc::Receiver<OperatorCommand>,
    results_tx: mpsc::Sender<VerificationResult>,
    results_rx: mpsc::Receiver<VerificationResult>,
    view_tx: watch::Sender<StationView>,
}

impl ScanStation {
    pub fn new(
        config: &Config,
        backend: Arc<dyn CameraBackend>,
        reader: Arc<dyn CodeReader>,
        verifier: Arc<dyn VerificationClient>,
        metrics: Arc<Metrics>,
    ) -> (Self, StationHandle) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (results_tx, results_rx) = mpsc::channel(4);

        let camera = CameraSessionManager::from_config(config, backend, reader, events_tx);
        let initial = StationView {
            state: ScanViewState::Scanning,
            awaiting: false,
            facing: camera.facing(),
            camera: CameraStatus::Starting,
        };
        let (view_tx, view_rx) = watch::channel(initial);

        let handle = StationHandle {
            commands: commands_tx,
            view: view_rx,
            preview: camera.preview(),
        };
        let station = Self {
            machine: ScanMachine::new(),
            camera,
            camera_status: CameraStatus::Starting,
            verifier,
            verify_timeout: Duration::from_millis(config.api_timeout_ms()),
            metrics,
            events_rx,
            commands_rx,
            results_tx,
            results_rx,
            view_tx,
        };
        (station, handle)
    }

    /// Run until `Shutdown` or until every command sender is gone
    pub async fn run(mut self) {
        info!(facing = %self.camera.facing(), "station_started");
        self.start_camera().await;

        loop {
            tokio::select! {
                biased;
                command = self.commands_rx.recv() => {
                    match command {
                        Some(OperatorCommand::ScanAgain) => {
                            let step = self.machine.on_scan_again();
                            self.apply(step);
                        }
                        Some(OperatorCommand::SwitchCamera) => self.switch_camera().await,
                        Some(OperatorCommand::Shutdown) | None => break,
                    }
                }
                Some(result) = self.results_rx.recv() => self.on_result(result),
                Some(event) = self.events_rx.recv() => self.on_decoder_event(event),
            }
            self.publish();
        }

        self.camera.stop().await;
        self.camera_status = CameraStatus::Stopped;
        self.publish();
        info!("station_stopped");
    }

    async fn start_camera(&mut self) {
        self.camera_status = CameraStatus::Starting;
        self.publish();
        self.camera_status = match self.camera.start().await {
            Ok(session_id) => CameraStatus::Active { session_id },
            Err(e) => CameraStatus::Unavailable { reason: e.to_string() },
        };
        self.publish();
    }

    async fn switch_camera(&mut self) {
        self.metrics.record_camera_switch();
        self.camera_status = CameraStatus::Starting;
        self.publish();
        // An in-flight verification keeps running; its result still applies
        self.camera_status = match self.camera.switch_facing().await {
            Ok(_) => match self.camera.session_id() {
                Some(session_id) => CameraStatus::Active { session_id },
                None => CameraStatus::Stopped,
            },
            Err(e) => CameraStatus::Unavailable { reason: e.to_string() },
        };
    }

    fn on_decoder_event(&mut self, event: DecoderEvent) {
        match event {
            DecoderEvent::Decoded { raw, meta } => {
                self.metrics.record_decode();
                debug!(
                    session_id = meta.session_id,
                    facing = %meta.facing,
                    version = ?meta.version,
                    ecc_level = ?meta.ecc_level,
                    "decode_received"
                );
                let step = self.machine.on_decoded(&raw);
                if matches!(step, Step::Ignored(_)) {
                    self.metrics.record_ignored_decode();
                }
                self.apply(step);
            }
            DecoderEvent::Fault { session_id, error } => {
                self.metrics.record_camera_fault();
                warn!(session_id = session_id, error = %error, "camera_fault");
                if self.camera.session_id() == Some(session_id) {
                    self.camera_status = CameraStatus::Unavailable { reason: error.to_string() };
                }
            }
        }
    }

    fn on_result(&mut self, result: VerificationResult) {
        let success = result.outcome.is_success();
        let step = self.machine.on_verified(result.attempt, result.outcome);
        // Stale results never reach the screen and are not counted
        if matches!(step, Step::Resolved { .. }) {
            self.metrics.record_verification_done(success, result.latency_ms);
        }
        self.apply(step);
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::Verify { attempt, reference } => {
                self.camera.disarm();
                self.dispatch(attempt, reference);
            }
            Step::Rejected { attempt, error } => {
                self.camera.disarm();
                self.metrics.record_malformed();
                warn!(attempt_id = %attempt, error = %error, "scan_payload_rejected");
            }
            Step::Resolved { attempt } => {
                let outcome = match self.machine.state() {
                    ScanViewState::Resolved(outcome) => outcome.as_str(),
                    ScanViewState::Scanning => "none",
                };
                info!(attempt_id = %attempt, outcome = outcome, "scan_resolved");
            }
            Step::Rearm => {
                self.camera.rearm();
                info!("scan_again");
            }
            Step::Ignored(reason) => {
                debug!(reason = reason.as_str(), "scan_input_ignored");
            }
        }
    }

    fn dispatch(&self, attempt: AttemptId, reference: TicketReference) {
        self.metrics.record_verification_sent();
        info!(attempt_id = %attempt, uniq_id = %reference, "verification_dispatched");

        let verifier = self.verifier.clone();
        let results_tx = self.results_tx.clone();
        let limit = self.verify_timeout;
        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = match tokio::time::timeout(limit, verifier.verify(&reference)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        attempt_id = %attempt,
                        uniq_id = %reference,
                        timeout_ms = limit.as_millis() as u64,
                        "verification_timed_out"
                    );
                    VerificationOutcome::Failure
                }
            };
            let latency_ms = start.elapsed().as_millis() as u64;
            // The station may have shut down meanwhile
            let _ = results_tx.send(VerificationResult { attempt, outcome, latency_ms }).await;
        });
    }

    fn publish(&self) {
        self.view_tx.send_replace(StationView {
            state: self.machine.state().clone(),
            awaiting: self.machine.is_awaiting(),
            facing: self.camera.facing(),
            camera: self.camera_status.clone(),
        });
    }
}
