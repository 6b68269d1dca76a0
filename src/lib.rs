//! Offline-tolerant spoken guidance for blind and low-vision users.
//!
//! A [`CapturedFrame`] from a camera or a file is sent to a remote vision
//! model by the [`Orchestrator`], and the outcome is spoken through the
//! [`NarrationScheduler`]. Every path, including malformed responses and
//! network failures, ends in some spoken feedback.

mod abort_guard;
pub mod analysis;
pub mod args;
pub mod camera;
pub mod error;
pub mod frame;
pub mod narration;
pub mod settings;

pub use abort_guard::AbortGuard;
pub use analysis::{
    AnalysisEndpoint, AnalysisResult, AnalysisState, AnalysisTask, ChatCompletionsClient,
    DetectedItem, Orchestrator, OrchestratorConfig, ResultSource, TextReading,
};
pub use camera::{
    Camera, CameraState, FacingMode, MediaDevices, NoMediaDevices, StillImageDevices,
};
pub use error::{AnalysisError, CameraError, SettingsError};
pub use frame::{CapturedFrame, Provenance};
pub use narration::{NarrationScheduler, SpeakOptions, SpeechEngine};
pub use settings::Settings;
