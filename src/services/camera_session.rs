//! Camera session manager - owns the camera lifecycle for the scan station
//!
//! At most one session is active. A session is one camera lease bound to one
//! decoder task; tearing it down waits for the task to finish so the lease is
//! released before anything else is acquired.

use crate::domain::FacingMode;
use crate::infra::config::Config;
use crate::io::camera::{CameraBackend, CameraError, CameraLease};
use crate::io::decoder::{
    ArmGate, CodeReader, DecoderEvent, DecoderSettings, DecoderTask, Preview,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct ActiveSession {
    id: u64,
    facing: FacingMode,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CameraSessionManager {
    backend: Arc<dyn CameraBackend>,
    reader: Arc<dyn CodeReader>,
    settings: DecoderSettings,
    acquire_timeout: Duration,
    facing: FacingMode,
    gate: ArmGate,
    session: Option<ActiveSession>,
    next_session_id: u64,
    active: Arc<AtomicUsize>,
    events_tx: mpsc::Sender<DecoderEvent>,
    preview_tx: watch::Sender<Option<Preview>>,
}

impl CameraSessionManager {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        reader: Arc<dyn CodeReader>,
        settings: DecoderSettings,
        acquire_timeout: Duration,
        initial_facing: FacingMode,
        events_tx: mpsc::Sender<DecoderEvent>,
    ) -> Self {
        let (preview_tx, _) = watch::channel(None);
        Self {
            backend,
            reader,
            settings,
            acquire_timeout,
            facing: initial_facing,
            gate: ArmGate::new(true),
            session: None,
            next_session_id: 1,
            active: Arc::new(AtomicUsize::new(0)),
            events_tx,
            preview_tx,
        }
    }

    /// Build from config with the given backend and reader
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn CameraBackend>,
        reader: Arc<dyn CodeReader>,
        events_tx: mpsc::Sender<DecoderEvent>,
    ) -> Self {
        let settings = DecoderSettings {
            fps: config.scan_fps(),
            roi: config.roi_size(),
            preview: config.preview_size(),
        };
        Self::new(
            backend,
            reader,
            settings,
            Duration::from_millis(config.acquire_timeout_ms()),
            config.initial_facing(),
            events_tx,
        )
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Id of the running session, if any
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Camera leases currently held (0 or 1)
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Subscribe to the live preview of whichever session is active
    pub fn preview(&self) -> watch::Receiver<Option<Preview>> {
        self.preview_tx.subscribe()
    }

    /// Allow the decoder to emit the next code it reads
    pub fn rearm(&self) {
        self.gate.arm();
    }

    /// Stop the decoder from emitting until re-armed
    pub fn disarm(&self) {
        self.gate.disarm();
    }

    pub fn is_armed(&self) -> bool {
        self.gate.is_armed()
    }

    /// Acquire the camera for the current facing mode and start decoding.
    ///
    /// A running session is torn down first.
    pub async fn start(&mut self) -> Result<u64, CameraError> {
        self.stop().await;

        let facing = self.facing;
        let stream = match tokio::time::timeout(self.acquire_timeout, self.backend.acquire(facing))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(facing = %facing, error = %e, "camera_acquire_failed");
                return Err(e);
            }
            Err(_) => {
                let e = CameraError::Acquisition {
                    facing,
                    reason: format!("timed out after {} ms", self.acquire_timeout.as_millis()),
                };
                warn!(facing = %facing, error = %e, "camera_acquire_failed");
                return Err(e);
            }
        };

        let id = self.next_session_id;
        self.next_session_id += 1;

        let lease = CameraLease::new(stream, facing, self.active.clone());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = DecoderTask {
            session_id: id,
            reader: self.reader.clone(),
            settings: self.settings,
            gate: self.gate.clone(),
            events: self.events_tx.clone(),
            preview: self.preview_tx.clone(),
        };
        let handle = tokio::spawn(task.run(lease, stop_rx));

        info!(session_id = id, facing = %facing, "camera_session_started");
        self.session = Some(ActiveSession { id, facing, stop_tx, handle });
        Ok(id)
    }

    /// Tear down the active session and wait for the camera to be released
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        // The task may already have ended on a device fault
        let _ = session.stop_tx.send(());
        if let Err(e) = session.handle.await {
            warn!(session_id = session.id, error = %e, "decoder_task_join_failed");
        }
        info!(session_id = session.id, facing = %session.facing, "camera_session_stopped");
    }

    /// Toggle the facing mode and restart the session on the other camera.
    ///
    /// The new facing mode is kept even if acquisition fails, so switching
    /// again retries the previous camera.
    pub async fn switch_facing(&mut self) -> Result<FacingMode, CameraError> {
        self.stop().await;
        self.facing = self.facing.toggled();
        info!(facing = %self.facing, "camera_facing_switched");
        self.start().await?;
        Ok(self.facing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::camera::{CameraStream, LumaFrame};
    use crate::io::decoder::Decoded;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Backend that records the peak number of simultaneously open streams
    #[derive(Default)]
    struct CountingBackend {
        open: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        acquired: Mutex<Vec<FacingMode>>,
        refuse: Option<FacingMode>,
    }

    struct CountingStream {
        open: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CameraStream for CountingStream {
        async fn next_frame(&mut self) -> Result<Option<LumaFrame>, CameraError> {
            Ok(LumaFrame::new(4, 4, vec![255; 16]))
        }

        fn release(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CameraBackend for CountingBackend {
        async fn acquire(
            &self,
            facing: FacingMode,
        ) -> Result<Box<dyn CameraStream>, CameraError> {
            if self.refuse == Some(facing) {
                return Err(CameraError::Acquisition { facing, reason: "busy".to_string() });
            }
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.acquired.lock().push(facing);
            Ok(Box::new(CountingStream { open: self.open.clone() }))
        }
    }

    struct NeverReads;

    impl CodeReader for NeverReads {
        fn read(&self, _frame: &LumaFrame) -> Option<Decoded> {
            None
        }
    }

    fn manager(backend: Arc<CountingBackend>) -> (CameraSessionManager, mpsc::Receiver<DecoderEvent>) {
        let (events_tx, events_rx) = mpsc::channel(8);
        let manager = CameraSessionManager::new(
            backend,
            Arc::new(NeverReads),
            DecoderSettings { fps: 50, ..Default::default() },
            Duration::from_millis(500),
            FacingMode::Environment,
            events_tx,
        );
        (manager, events_rx)
    }

    #[tokio::test]
    async fn test_switch_never_overlaps_sessions() {
        let backend = Arc::new(CountingBackend::default());
        let (mut manager, _events_rx) = manager(backend.clone());

        manager.start().await.unwrap();
        for _ in 0..10 {
            manager.switch_facing().await.unwrap();
            assert_eq!(manager.active_sessions(), 1);
        }
        manager.stop().await;

        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(manager.facing(), FacingMode::Environment);

        let acquired = backend.acquired.lock();
        assert_eq!(acquired.len(), 11);
        assert_eq!(acquired[1], FacingMode::User);
    }

    #[tokio::test]
    async fn test_acquire_failure_is_reported_and_keeps_facing() {
        let backend =
            Arc::new(CountingBackend { refuse: Some(FacingMode::User), ..Default::default() });
        let (mut manager, _events_rx) = manager(backend.clone());

        manager.start().await.unwrap();
        let err = manager.switch_facing().await.unwrap_err();
        assert!(matches!(err, CameraError::Acquisition { facing: FacingMode::User, .. }));
        assert_eq!(manager.facing(), FacingMode::User);
        assert_eq!(manager.active_sessions(), 0);
        assert!(manager.session_id().is_none());

        // Switching again retries the other camera
        assert_eq!(manager.switch_facing().await.unwrap(), FacingMode::Environment);
        assert_eq!(manager.active_sessions(), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_arm_state_survives_switch() {
        let backend = Arc::new(CountingBackend::default());
        let (mut manager, _events_rx) = manager(backend);

        manager.start().await.unwrap();
        manager.disarm();
        manager.switch_facing().await.unwrap();
        assert!(!manager.is_armed());
        manager.rearm();
        assert!(manager.is_armed());
        manager.stop().await;
    }
}
