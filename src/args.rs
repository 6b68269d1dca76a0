use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use daemon_common::LogLevel;

use crate::camera::{FacingMode, MediaDevices, NoMediaDevices, StillImageDevices};
use crate::settings::VoiceSpeed;

/// Command line arguments for the `argus` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "argus", about = "Spoken obstacle guidance and text reading from a single frame")]
pub struct Cli {
    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub voice: VoiceArgs,

    /// Logging verbosity level
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Detect obstacles and speak navigation guidance
    Navigate {
        #[command(flatten)]
        frame: FrameArgs,
    },
    /// Extract and read out the text in a frame
    Read {
        #[command(flatten)]
        frame: FrameArgs,
        /// Language code of the text, or `auto`
        #[arg(long)]
        language: Option<String>,
    },
    /// List the available cameras
    Cameras {
        #[command(flatten)]
        frame: FrameArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Chat-completions URL of the vision model
    #[arg(
        long,
        env = "ARGUS_ENDPOINT",
        default_value = "http://localhost:11434/v1/chat/completions"
    )]
    pub endpoint: String,

    /// Model name sent with each request
    #[arg(long, env = "ARGUS_MODEL", default_value = "llava")]
    pub model: String,

    /// Bearer token for the endpoint
    #[arg(long, env = "ARGUS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Value of the `customerId` header, if the endpoint wants one
    #[arg(long, env = "ARGUS_CUSTOMER_ID")]
    pub customer_id: Option<String>,

    /// Abandon the request after this many seconds (0 waits forever)
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct VoiceArgs {
    /// Base URL of a Coqui TTS server; speech goes to stdout when omitted
    #[arg(long)]
    pub tts_url: Option<String>,

    #[arg(long, default_value = "p330")]
    pub speaker_id: String,

    #[arg(long)]
    pub language_id: Option<String>,

    /// Audio player command reading WAV on stdin
    #[arg(long, default_value = "aplay -q")]
    pub player: String,

    /// JSON settings document with voice preferences
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Override the stored voice speed
    #[arg(long, value_enum)]
    pub voice_speed: Option<VoiceSpeed>,

    /// Silence before each detected item is announced, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub item_gap_ms: u64,

    /// Print the analysis result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FrameArgs {
    /// Analyse this image file instead of capturing from a camera
    #[arg(long, conflicts_with_all = ["camera", "front_camera"])]
    pub image: Option<PathBuf>,

    /// Still image standing in for the back camera
    #[arg(long)]
    pub camera: Option<PathBuf>,

    /// Still image standing in for the front camera
    #[arg(long)]
    pub front_camera: Option<PathBuf>,

    /// Capture with the front camera instead of the back one
    #[arg(long)]
    pub front: bool,
}

impl FrameArgs {
    pub fn facing(&self) -> FacingMode {
        if self.front {
            FacingMode::User
        } else {
            FacingMode::Environment
        }
    }

    /// Still-image cameras from the flags, or no backend when none are given.
    pub fn devices(&self) -> Arc<dyn MediaDevices> {
        let cameras: Vec<_> = [
            (FacingMode::Environment, self.camera.clone()),
            (FacingMode::User, self.front_camera.clone()),
        ]
        .into_iter()
        .filter_map(|(facing, path)| path.map(|p| (facing, p)))
        .collect();
        if cameras.is_empty() {
            Arc::new(NoMediaDevices)
        } else {
            Arc::new(StillImageDevices::new(cameras))
        }
    }
}

impl VoiceArgs {
    pub fn player_command(&self) -> Vec<String> {
        self.player.split_whitespace().map(String::from).collect()
    }
}
