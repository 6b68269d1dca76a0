//! Live camera acquisition.
//!
//! [`Camera`] owns at most one open [`VideoStream`]. Switching cameras
//! releases the current stream before asking the backend for the next one,
//! so two device handles are never held at once.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::CameraError;
use crate::frame::{CapturedFrame, Provenance};

/// JPEG quality used for snapshots.
pub const SNAPSHOT_QUALITY: u8 = 80;
const FALLBACK_WIDTH: u32 = 640;
const FALLBACK_HEIGHT: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

/// A `min`/`ideal` pair as understood by media backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: u32,
    pub ideal: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub facing: FacingMode,
    pub width: Range,
    pub height: Range,
    pub frame_rate: Range,
}

impl VideoConstraints {
    /// Constraints tuned for obstacle detection with the given camera.
    pub fn for_facing(facing: FacingMode) -> Self {
        Self {
            facing,
            width: Range {
                min: 640,
                ideal: 1280,
            },
            height: Range {
                min: 480,
                ideal: 720,
            },
            frame_rate: Range { min: 15, ideal: 30 },
        }
    }
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self::for_facing(FacingMode::Environment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraCapabilities {
    pub has_multiple_cameras: bool,
    pub cameras: Vec<DeviceInfo>,
}

/// An open camera stream.
#[async_trait]
pub trait VideoStream: Send {
    fn facing(&self) -> FacingMode;

    /// The most recent frame, or `None` if no frame has been decoded yet.
    fn current_frame(&mut self) -> Option<RgbImage>;

    /// Release the device. Must be awaited before another stream is opened.
    async fn stop(&mut self);
}

/// Source of camera streams.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn permission(&self) -> Result<PermissionState, CameraError>;
    async fn open(&self, constraints: VideoConstraints)
    -> Result<Box<dyn VideoStream>, CameraError>;
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError>;
}

/// Observable camera state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraState {
    pub is_active: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub has_permission: bool,
}

pub struct Camera {
    devices: Arc<dyn MediaDevices>,
    stream: Option<Box<dyn VideoStream>>,
    state: CameraState,
}

impl Camera {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: None,
            state: CameraState::default(),
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    /// Query the backend's permission state without opening a device.
    pub async fn check_permissions(&mut self) -> Result<PermissionState, CameraError> {
        let permission = self.devices.permission().await?;
        if permission == PermissionState::Granted {
            self.state.has_permission = true;
        }
        Ok(permission)
    }

    /// Acquire a stream preferring `facing`.
    ///
    /// Any stream already open is released first. On failure the user
    /// facing message is recorded in [`CameraState`] and the camera stays
    /// inactive.
    pub async fn start(&mut self, facing: FacingMode) -> Result<(), CameraError> {
        self.stop().await;
        self.state.is_loading = true;
        self.state.error = None;
        match self.acquire(facing).await {
            Ok(stream) => {
                info!(facing = ?stream.facing(), "camera started");
                self.stream = Some(stream);
                self.state = CameraState {
                    is_active: true,
                    is_loading: false,
                    error: None,
                    has_permission: true,
                };
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "camera acquisition failed");
                self.state.is_active = false;
                self.state.is_loading = false;
                self.state.error = Some(e.user_message().to_string());
                Err(e)
            }
        }
    }

    async fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.check_permissions().await? == PermissionState::Denied {
            return Err(CameraError::PermissionDenied);
        }
        self.devices
            .open(VideoConstraints::for_facing(facing))
            .await
    }

    /// Release the current stream, if any.
    pub async fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop().await;
            debug!("camera stopped");
        }
        self.state.is_active = false;
        self.state.is_loading = false;
        self.state.error = None;
    }

    /// Snapshot the current frame as a JPEG.
    ///
    /// Returns `None` when no stream is active; that is an expected state,
    /// not an error.
    pub fn capture(&mut self) -> Option<CapturedFrame> {
        let stream = self.stream.as_mut()?;
        let frame = stream.current_frame().unwrap_or_else(|| {
            RgbImage::new(FALLBACK_WIDTH, FALLBACK_HEIGHT)
        });
        match encode_jpeg(&frame) {
            Ok(bytes) => Some(CapturedFrame::new(bytes, "image/jpeg", Provenance::LiveCamera)),
            Err(e) => {
                warn!(error = ?e, "failed to encode snapshot");
                None
            }
        }
    }

    /// Swap between front and back cameras.
    ///
    /// Returns `Ok(false)` without doing anything when the camera is not
    /// running.
    pub async fn switch(&mut self) -> Result<bool, CameraError> {
        let Some(current) = self.stream.as_ref().map(|s| s.facing()) else {
            return Ok(false);
        };
        self.stop().await;
        self.start(current.opposite()).await?;
        Ok(true)
    }

    pub async fn capabilities(&self) -> CameraCapabilities {
        match self.devices.enumerate().await {
            Ok(cameras) => CameraCapabilities {
                has_multiple_cameras: cameras.len() > 1,
                cameras,
            },
            Err(e) => {
                warn!(error = %e, "failed to enumerate cameras");
                CameraCapabilities {
                    has_multiple_cameras: false,
                    cameras: Vec::new(),
                }
            }
        }
    }
}

fn encode_jpeg(frame: &RgbImage) -> image::ImageResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, SNAPSHOT_QUALITY);
    DynamicImage::ImageRgb8(frame.clone()).write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

/// Default label for devices that do not report one.
pub fn device_label(id: &str, label: Option<&str>) -> String {
    match label {
        Some(l) if !l.is_empty() => l.to_string(),
        _ => format!("Camera {}", id.chars().take(8).collect::<String>()),
    }
}

/// Backend for hosts without any camera support.
pub struct NoMediaDevices;

#[async_trait]
impl MediaDevices for NoMediaDevices {
    async fn permission(&self) -> Result<PermissionState, CameraError> {
        Err(CameraError::Unsupported)
    }

    async fn open(&self, _: VideoConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        Err(CameraError::Unsupported)
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(Vec::new())
    }
}

/// Media backend whose cameras are still image files.
///
/// Each file stands in for one camera facing a fixed direction. Opening a
/// camera that is already open reports [`CameraError::Busy`].
#[derive(Clone)]
pub struct StillImageDevices {
    cameras: Vec<(FacingMode, PathBuf)>,
    permission: PermissionState,
    in_use: Arc<Mutex<HashSet<usize>>>,
}

impl StillImageDevices {
    pub fn new(cameras: Vec<(FacingMode, PathBuf)>) -> Self {
        Self {
            cameras,
            permission: PermissionState::Granted,
            in_use: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        Self { permission, ..self }
    }

    fn pick(&self, facing: FacingMode) -> Option<usize> {
        self.cameras
            .iter()
            .position(|(f, _)| *f == facing)
            .or(if self.cameras.is_empty() { None } else { Some(0) })
    }
}

#[async_trait]
impl MediaDevices for StillImageDevices {
    async fn permission(&self) -> Result<PermissionState, CameraError> {
        Ok(self.permission)
    }

    async fn open(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.permission == PermissionState::Denied {
            return Err(CameraError::PermissionDenied);
        }
        let index = self.pick(constraints.facing).ok_or(CameraError::NotFound)?;
        {
            let mut in_use = self.in_use.lock().map_err(|e| CameraError::Other(e.to_string()))?;
            if !in_use.insert(index) {
                return Err(CameraError::Busy);
            }
        }
        let (facing, path) = self.cameras[index].clone();
        let decoded = tokio::task::spawn_blocking(move || image::open(path))
            .await
            .map_err(|e| CameraError::Other(e.to_string()))
            .and_then(|r| r.map_err(|e| CameraError::Other(e.to_string())));
        match decoded {
            Ok(img) => Ok(Box::new(StillStream {
                facing,
                frame: Some(img.to_rgb8()),
                index,
                in_use: self.in_use.clone(),
            })),
            Err(e) => {
                if let Ok(mut in_use) = self.in_use.lock() {
                    in_use.remove(&index);
                }
                Err(e)
            }
        }
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(self
            .cameras
            .iter()
            .map(|(facing, path)| {
                let id = path.display().to_string();
                let label = format!("{facing:?} camera");
                DeviceInfo {
                    label: device_label(&id, Some(&label)),
                    id,
                }
            })
            .collect())
    }
}

struct StillStream {
    facing: FacingMode,
    frame: Option<RgbImage>,
    index: usize,
    in_use: Arc<Mutex<HashSet<usize>>>,
}

#[async_trait]
impl VideoStream for StillStream {
    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
        self.frame.clone()
    }

    async fn stop(&mut self) {
        self.frame = None;
        if let Ok(mut in_use) = self.in_use.lock() {
            in_use.remove(&self.index);
        }
    }
}

impl Drop for StillStream {
    fn drop(&mut self) {
        if let Ok(mut in_use) = self.in_use.lock() {
            in_use.remove(&self.index);
        }
    }
}
