use std::time::Duration;

use thiserror::Error;

/// Why a camera stream could not be acquired.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera access denied")]
    PermissionDenied,
    #[error("no camera device found")]
    NotFound,
    #[error("camera device is busy")]
    Busy,
    #[error("no media backend available")]
    Unsupported,
    #[error("camera failure: {0}")]
    Other(String),
}

impl CameraError {
    /// Fixed message shown (and spoken) to the user for this failure class.
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied => {
                "Camera permission denied. Please allow camera access in your device settings."
            }
            CameraError::NotFound => "No camera found on this device.",
            CameraError::Busy => "Camera is already in use by another application.",
            CameraError::Unsupported => "Camera not supported on this device",
            CameraError::Other(_) => "Unable to access camera",
        }
    }
}

/// Failure of a single request to the analysis endpoint.
///
/// These never reach the user as-is; the orchestrator folds them into a
/// synthetic error result.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint answered with status {0}")]
    Status(u16),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
}

/// Problems reading the settings document.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed settings: {0}")]
    Parse(#[from] serde_json::Error),
}
