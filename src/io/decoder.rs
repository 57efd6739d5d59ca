//! Code decoder - samples camera frames and emits one event per arm
//!
//! The decoder task owns the camera lease for its session. It samples at a
//! fixed rate, crops the region of interest, and tries to read a code. A
//! frame without a code is not an error. Once a code is read the arm gate is
//! closed and nothing more is emitted until the owner re-arms it. A device
//! failure emits a fault event and ends the task, which releases the camera.

use crate::domain::FacingMode;
use crate::io::camera::{CameraError, CameraLease, LumaFrame};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Above this the sample period would round down to zero
pub const MAX_FPS: u32 = 1000;

/// A code read from one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub version: Option<usize>,
    pub ecc_level: Option<u16>,
}

/// Reads a machine-readable code from a greyscale frame
pub trait CodeReader: Send + Sync {
    fn read(&self, frame: &LumaFrame) -> Option<Decoded>;
}

/// QR reader backed by rqrr
#[derive(Debug, Default, Clone, Copy)]
pub struct QrReader;

impl CodeReader for QrReader {
    fn read(&self, frame: &LumaFrame) -> Option<Decoded> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width as usize,
            frame.height as usize,
            |x, y| frame.pixel(x as u32, y as u32),
        );

        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((meta, content)) => {
                    return Some(Decoded {
                        text: content,
                        version: Some(meta.version.0),
                        ecc_level: Some(meta.ecc_level),
                    });
                }
                Err(e) => debug!(error = ?e, "qr_grid_decode_failed"),
            }
        }
        None
    }
}

/// Details attached to a successful decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeMetadata {
    pub session_id: u64,
    pub facing: FacingMode,
    pub version: Option<usize>,
    pub ecc_level: Option<u16>,
    pub decoded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    Decoded { raw: String, meta: DecodeMetadata },
    Fault { session_id: u64, error: CameraError },
}

/// One-shot gate shared between the decoder and its owner
#[derive(Debug, Clone)]
pub struct ArmGate(Arc<AtomicBool>);

impl ArmGate {
    pub fn new(armed: bool) -> Self {
        Self(Arc::new(AtomicBool::new(armed)))
    }

    pub fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Close the gate; true only for the caller that found it open
    pub fn try_fire(&self) -> bool {
        self.0.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecoderSettings {
    pub fps: u32,
    pub roi: (u32, u32),
    pub preview: (u32, u32),
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self { fps: 10, roi: (250, 250), preview: (64, 32) }
    }
}

impl DecoderSettings {
    /// Interval between frame samples, never shorter than 1 ms
    pub fn sample_period(&self) -> Duration {
        let fps = self.fps.clamp(1, MAX_FPS);
        Duration::from_millis(1000 / u64::from(fps))
    }
}

/// Latest preview frame from the active session
#[derive(Debug, Clone)]
pub struct Preview {
    pub session_id: u64,
    pub facing: FacingMode,
    pub frame: LumaFrame,
}

/// Everything a decoder task needs besides its camera lease
pub struct DecoderTask {
    pub session_id: u64,
    pub reader: Arc<dyn CodeReader>,
    pub settings: DecoderSettings,
    pub gate: ArmGate,
    pub events: mpsc::Sender<DecoderEvent>,
    pub preview: watch::Sender<Option<Preview>>,
}

impl DecoderTask {
    /// Sample until stopped or the device fails. The lease is dropped on return.
    pub async fn run(self, mut lease: CameraLease, mut stop: oneshot::Receiver<()>) {
        let facing = lease.facing();
        let mut ticker = interval(self.settings.sample_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(session_id = self.session_id, facing = %facing, "decoder_started");

        loop {
            let sampled = tokio::select! {
                biased;
                _ = &mut stop => break,
                frame = async {
                    ticker.tick().await;
                    lease.next_frame().await
                } => frame,
            };

            let frame = match sampled {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(error) => {
                    warn!(session_id = self.session_id, error = %error, "decoder_camera_fault");
                    let _ = self
                        .events
                        .send(DecoderEvent::Fault { session_id: self.session_id, error })
                        .await;
                    break;
                }
            };

            let (pw, ph) = self.settings.preview;
            self.preview.send_replace(Some(Preview {
                session_id: self.session_id,
                facing,
                frame: frame.downsample(pw, ph),
            }));

            if !self.gate.is_armed() {
                continue;
            }

            let (rw, rh) = self.settings.roi;
            let Some(decoded) = self.reader.read(&frame.crop_center(rw, rh)) else {
                continue;
            };

            if !self.gate.try_fire() {
                continue;
            }

            info!(
                session_id = self.session_id,
                facing = %facing,
                len = decoded.text.len(),
                "code_decoded"
            );
            let event = DecoderEvent::Decoded {
                raw: decoded.text,
                meta: DecodeMetadata {
                    session_id: self.session_id,
                    facing,
                    version: decoded.version,
                    ecc_level: decoded.ecc_level,
                    decoded_at: Utc::now(),
                },
            };
            if self.events.send(event).await.is_err() {
                break;
            }
        }

        self.preview.send_replace(None);
        info!(session_id = self.session_id, facing = %facing, "decoder_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::camera::CameraStream;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Camera producing blank frames, failing after `fail_after` frames
    struct BlankStream {
        served: usize,
        fail_after: Option<usize>,
    }

    /// Camera whose first `gaps` ticks carry no usable frame
    struct GappyStream {
        gaps: usize,
    }

    #[async_trait]
    impl CameraStream for GappyStream {
        async fn next_frame(&mut self) -> Result<Option<LumaFrame>, CameraError> {
            if self.gaps > 0 {
                self.gaps -= 1;
                return Ok(None);
            }
            Ok(LumaFrame::new(16, 16, vec![255; 256]))
        }

        fn release(&mut self) {}
    }

    #[async_trait]
    impl CameraStream for BlankStream {
        async fn next_frame(&mut self) -> Result<Option<LumaFrame>, CameraError> {
            if self.fail_after.is_some_and(|n| self.served >= n) {
                return Err(CameraError::Device {
                    facing: FacingMode::Environment,
                    reason: "unplugged".to_string(),
                });
            }
            self.served += 1;
            Ok(LumaFrame::new(320, 240, vec![255; 320 * 240]))
        }

        fn release(&mut self) {}
    }

    /// Reader that "sees" a code in every frame
    struct AlwaysReads(&'static str);

    impl CodeReader for AlwaysReads {
        fn read(&self, frame: &LumaFrame) -> Option<Decoded> {
            assert!(frame.width <= 250 && frame.height <= 250);
            Some(Decoded { text: self.0.to_string(), version: None, ecc_level: None })
        }
    }

    fn task(
        reader: Arc<dyn CodeReader>,
        gate: ArmGate,
    ) -> (DecoderTask, mpsc::Receiver<DecoderEvent>, watch::Receiver<Option<Preview>>) {
        let (events, events_rx) = mpsc::channel(16);
        let (preview, preview_rx) = watch::channel(None);
        let settings = DecoderSettings { fps: 100, ..Default::default() };
        let task = DecoderTask { session_id: 7, reader, settings, gate, events, preview };
        (task, events_rx, preview_rx)
    }

    #[test]
    fn test_gate_fires_once() {
        let gate = ArmGate::new(true);
        assert!(gate.try_fire());
        assert!(!gate.try_fire());
        assert!(!gate.is_armed());
        gate.arm();
        assert!(gate.try_fire());
    }

    #[test]
    fn test_sample_period() {
        assert_eq!(DecoderSettings::default().sample_period(), Duration::from_millis(100));
        let zero = DecoderSettings { fps: 0, ..Default::default() };
        assert_eq!(zero.sample_period(), Duration::from_secs(1));

        let fast = DecoderSettings { fps: 2000, ..Default::default() };
        assert_eq!(fast.sample_period(), Duration::from_millis(1));
        let max = DecoderSettings { fps: u32::MAX, ..Default::default() };
        assert!(!max.sample_period().is_zero());
    }

    #[tokio::test]
    async fn test_high_fps_still_samples() {
        let active = Arc::new(AtomicUsize::new(0));
        let stream = Box::new(BlankStream { served: 0, fail_after: None });
        let lease = CameraLease::new(stream, FacingMode::Environment, active.clone());
        let (mut task, mut events_rx, _preview_rx) = task(Arc::new(AlwaysReads("x")), ArmGate::new(true));
        task.settings.fps = 5000;
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(task.run(lease, stop_rx));

        assert!(matches!(events_rx.recv().await.unwrap(), DecoderEvent::Decoded { .. }));
        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_frames_do_not_end_session() {
        let active = Arc::new(AtomicUsize::new(0));
        let lease = CameraLease::new(Box::new(GappyStream { gaps: 3 }), FacingMode::User, active.clone());
        let (task, mut events_rx, _preview_rx) = task(Arc::new(AlwaysReads("y")), ArmGate::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(task.run(lease, stop_rx));

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, DecoderEvent::Decoded { ref raw, .. } if raw == "y"));
        assert_eq!(active.load(Ordering::SeqCst), 1);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_qr_reader_finds_nothing_in_blank_frame() {
        let frame = LumaFrame::new(250, 250, vec![255; 250 * 250]).unwrap();
        assert!(QrReader.read(&frame).is_none());
    }

    #[tokio::test]
    async fn test_emits_once_per_arm() {
        let active = Arc::new(AtomicUsize::new(0));
        let stream = Box::new(BlankStream { served: 0, fail_after: None });
        let lease = CameraLease::new(stream, FacingMode::Environment, active.clone());
        let gate = ArmGate::new(true);
        let (task, mut events_rx, _preview_rx) = task(Arc::new(AlwaysReads("{}")), gate.clone());
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(task.run(lease, stop_rx));

        let first = events_rx.recv().await.unwrap();
        assert!(matches!(first, DecoderEvent::Decoded { ref raw, .. } if raw == "{}"));

        // Many frames pass while disarmed; none may produce an event
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(events_rx.try_recv().is_err());

        gate.arm();
        let second = events_rx.recv().await.unwrap();
        assert!(matches!(second, DecoderEvent::Decoded { .. }));

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fault_releases_camera() {
        let active = Arc::new(AtomicUsize::new(0));
        let stream = Box::new(BlankStream { served: 0, fail_after: Some(2) });
        let lease = CameraLease::new(stream, FacingMode::Environment, active.clone());
        let (task, mut events_rx, preview_rx) = task(Arc::new(QrReader), ArmGate::new(true));
        let (_stop_tx, stop_rx) = oneshot::channel();

        task.run(lease, stop_rx).await;

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, DecoderEvent::Fault { session_id: 7, .. }));
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(preview_rx.borrow().is_none());
    }
}
