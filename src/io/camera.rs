//! Camera capture backends
//!
//! A `CameraBackend` hands out one `CameraStream` per acquisition. Streams
//! yield 8-bit greyscale frames; `release` must be called exactly once by the
//! owner (the camera session lease does this on drop).
//!
//! `FrameDirCamera` reads the most recently written image in a per-camera
//! directory, as produced by a frame grabber writing snapshots to disk.

use crate::domain::FacingMode;
use crate::infra::config::Config;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("failed to acquire {facing} camera: {reason}")]
    Acquisition { facing: FacingMode, reason: String },
    #[error("{facing} camera device failure: {reason}")]
    Device { facing: FacingMode, reason: String },
}

/// Greyscale frame, row-major, one byte per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl LumaFrame {
    /// Build a frame; `None` if `data` does not hold `width * height` pixels
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self { width, height, data })
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data
            .get((y as usize) * (self.width as usize) + x as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Centred region of at most `width` x `height`, clamped to the frame
    pub fn crop_center(&self, width: u32, height: u32) -> LumaFrame {
        let w = width.min(self.width);
        let h = height.min(self.height);
        let x0 = (self.width - w) / 2;
        let y0 = (self.height - h) / 2;

        let mut data = Vec::with_capacity((w as usize) * (h as usize));
        for y in y0..y0 + h {
            let start = (y as usize) * (self.width as usize) + x0 as usize;
            data.extend_from_slice(&self.data[start..start + w as usize]);
        }
        LumaFrame { width: w, height: h, data }
    }

    /// Nearest-neighbour downsample for previews
    pub fn downsample(&self, width: u32, height: u32) -> LumaFrame {
        if self.width == 0 || self.height == 0 || width == 0 || height == 0 {
            return LumaFrame { width: 0, height: 0, data: Vec::new() };
        }
        let x_ratio = self.width as f32 / width as f32;
        let y_ratio = self.height as f32 / height as f32;

        let mut data = Vec::with_capacity((width as usize) * (height as usize));
        for dst_y in 0..height {
            for dst_x in 0..width {
                let src_x = ((dst_x as f32 * x_ratio) as u32).min(self.width - 1);
                let src_y = ((dst_y as f32 * y_ratio) as u32).min(self.height - 1);
                data.push(self.pixel(src_x, src_y));
            }
        }
        LumaFrame { width, height, data }
    }
}

#[async_trait]
pub trait CameraStream: Send {
    /// Next frame from the device, `None` when nothing usable arrived this
    /// tick. An error means the device is unusable.
    async fn next_frame(&mut self) -> Result<Option<LumaFrame>, CameraError>;

    /// Give the device back. Called once by the owning lease.
    fn release(&mut self);
}

#[async_trait]
pub trait CameraBackend: Send + Sync {
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// Exclusive hold on an acquired camera stream.
///
/// Counts itself in `active` while alive; dropping it releases the device on
/// every exit path (normal stop, decoder fault, task abort).
pub struct CameraLease {
    stream: Box<dyn CameraStream>,
    facing: FacingMode,
    active: Arc<AtomicUsize>,
}

impl CameraLease {
    pub fn new(stream: Box<dyn CameraStream>, facing: FacingMode, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { stream, facing, active }
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub async fn next_frame(&mut self) -> Result<Option<LumaFrame>, CameraError> {
        self.stream.next_frame().await
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.stream.release();
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Camera backed by per-facing-mode snapshot directories
pub struct FrameDirCamera {
    environment_dir: PathBuf,
    user_dir: PathBuf,
}

impl FrameDirCamera {
    pub fn new(environment_dir: PathBuf, user_dir: PathBuf) -> Self {
        Self { environment_dir, user_dir }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.camera_dir(FacingMode::Environment).to_path_buf(),
            config.camera_dir(FacingMode::User).to_path_buf(),
        )
    }

    fn dir_for(&self, facing: FacingMode) -> &Path {
        match facing {
            FacingMode::Environment => &self.environment_dir,
            FacingMode::User => &self.user_dir,
        }
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Most recently modified frame file in `dir`
async fn latest_frame_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut latest: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_frame_file(&path) {
            continue;
        }
        let modified = entry.metadata().await?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = match &latest {
            Some((best, best_path)) => {
                modified > *best || (modified == *best && path > *best_path)
            }
            None => true,
        };
        if newer {
            latest = Some((modified, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

#[async_trait]
impl CameraBackend for FrameDirCamera {
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn CameraStream>, CameraError> {
        let dir = self.dir_for(facing).to_path_buf();

        match latest_frame_file(&dir).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(CameraError::Acquisition {
                    facing,
                    reason: format!("no frames in {}", dir.display()),
                })
            }
            Err(e) => {
                return Err(CameraError::Acquisition {
                    facing,
                    reason: format!("{}: {}", dir.display(), e),
                })
            }
        }

        info!(facing = %facing, dir = %dir.display(), "camera_acquired");
        Ok(Box::new(FrameDirStream { facing, dir, released: false }))
    }
}

struct FrameDirStream {
    facing: FacingMode,
    dir: PathBuf,
    released: bool,
}

impl FrameDirStream {
    fn device_error(&self, reason: String) -> CameraError {
        CameraError::Device { facing: self.facing, reason }
    }
}

#[async_trait]
impl CameraStream for FrameDirStream {
    async fn next_frame(&mut self) -> Result<Option<LumaFrame>, CameraError> {
        if self.released {
            return Err(self.device_error("stream released".to_string()));
        }

        let path = latest_frame_file(&self.dir)
            .await
            .map_err(|e| self.device_error(e.to_string()))?
            .ok_or_else(|| self.device_error("frame source went empty".to_string()))?;

        // Image decoding is CPU-bound
        let source = path.clone();
        let decoded =
            tokio::task::spawn_blocking(move || image::open(&source).map(|img| img.to_luma8()))
                .await
                .map_err(|e| self.device_error(e.to_string()))?;

        // The grabber may still be writing the newest snapshot
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(facing = %self.facing, file = %path.display(), error = %e, "camera_frame_skipped");
                return Ok(None);
            }
        };

        let (width, height) = decoded.dimensions();
        debug!(facing = %self.facing, width = width, height = height, "camera_frame");
        Ok(LumaFrame::new(width, height, decoded.into_raw()))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            info!(facing = %self.facing, dir = %self.dir.display(), "camera_released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> LumaFrame {
        let data = (0..width * height).map(|i| (i % 251) as u8).collect();
        LumaFrame::new(width, height, data).unwrap()
    }

    #[test]
    fn test_frame_size_checked() {
        assert!(LumaFrame::new(2, 2, vec![0; 3]).is_none());
        assert!(LumaFrame::new(2, 2, vec![0; 4]).is_some());
    }

    #[test]
    fn test_crop_center() {
        let frame = gradient(10, 8);
        let roi = frame.crop_center(4, 2);
        assert_eq!((roi.width, roi.height), (4, 2));
        assert_eq!(roi.pixel(0, 0), frame.pixel(3, 3));
        assert_eq!(roi.pixel(3, 1), frame.pixel(6, 4));
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = gradient(100, 60);
        let roi = frame.crop_center(250, 250);
        assert_eq!(roi, frame);
    }

    #[test]
    fn test_downsample_size() {
        let frame = gradient(640, 480);
        let preview = frame.downsample(64, 32);
        assert_eq!(preview.data.len(), 64 * 32);
        assert_eq!(preview.pixel(0, 0), frame.pixel(0, 0));
    }

    #[tokio::test]
    async fn test_acquire_missing_dir_fails() {
        let camera = FrameDirCamera::new(
            PathBuf::from("/nonexistent/ticket-scanner/env"),
            PathBuf::from("/nonexistent/ticket-scanner/user"),
        );
        let err = camera.acquire(FacingMode::User).await.err().unwrap();
        assert!(matches!(err, CameraError::Acquisition { facing: FacingMode::User, .. }));
    }

    #[tokio::test]
    async fn test_acquire_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FrameDirCamera::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        assert!(camera.acquire(FacingMode::Environment).await.is_err());
    }

    #[tokio::test]
    async fn test_reads_frames_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::GrayImage::from_pixel(32, 16, image::Luma([200u8]));
        img.save(dir.path().join("frame.png")).unwrap();

        let camera = FrameDirCamera::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        let mut stream = camera.acquire(FacingMode::Environment).await.unwrap();
        let frame = stream.next_frame().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 16));
        assert_eq!(frame.pixel(5, 5), 200);

        stream.release();
        assert!(stream.next_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_lease_counts_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        image::GrayImage::new(8, 8).save(dir.path().join("a.png")).unwrap();
        let camera = FrameDirCamera::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        let active = Arc::new(AtomicUsize::new(0));

        let stream = camera.acquire(FacingMode::User).await.unwrap();
        let mut lease = CameraLease::new(stream, FacingMode::User, active.clone());
        assert_eq!(active.load(Ordering::SeqCst), 1);
        assert_eq!(lease.facing(), FacingMode::User);
        assert!(lease.next_frame().await.unwrap().is_some());

        drop(lease);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        image::GrayImage::from_pixel(8, 8, image::Luma([90u8])).save(dir.path().join("a.png")).unwrap();
        let camera = FrameDirCamera::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        let mut stream = camera.acquire(FacingMode::Environment).await.unwrap();
        assert!(stream.next_frame().await.unwrap().is_some());

        // Half of a valid png, newer than a.png
        let full = std::fs::read(dir.path().join("a.png")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("b.png"), &full[..full.len() / 2]).unwrap();

        assert_eq!(stream.next_frame().await, Ok(None));

        // Once the grabber finishes the file the stream picks it up
        image::GrayImage::from_pixel(8, 8, image::Luma([30u8])).save(dir.path().join("b.png")).unwrap();
        let frame = stream.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.pixel(0, 0), 30);
    }

    #[tokio::test]
    async fn test_vanished_dir_is_device_error() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir(&frames).unwrap();
        image::GrayImage::new(8, 8).save(frames.join("a.png")).unwrap();
        let camera = FrameDirCamera::new(frames.clone(), frames.clone());
        let mut stream = camera.acquire(FacingMode::User).await.unwrap();

        std::fs::remove_dir_all(&frames).unwrap();
        let err = stream.next_frame().await.err().unwrap();
        assert!(matches!(err, CameraError::Device { facing: FacingMode::User, .. }));
    }
}
