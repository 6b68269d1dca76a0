use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use argus::args::{Cli, Command, FrameArgs};
use argus::narration::{ConsoleSpeech, CoquiSpeech};
use argus::{
    AnalysisTask, Camera, CapturedFrame, ChatCompletionsClient, NarrationScheduler, Orchestrator,
    OrchestratorConfig, Settings, SpeechEngine,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const IMAGE_UNREADABLE: &str = "Unable to open the selected image. Please choose another file.";
const SNAPSHOT_FAILED: &str = "Unable to capture an image. Please try again.";

async fn acquire_frame(
    args: &FrameArgs,
    narrator: &NarrationScheduler,
) -> anyhow::Result<CapturedFrame> {
    if let Some(path) = &args.image {
        narrator.speak("Image selected.", false);
        let frame = CapturedFrame::from_file(path).await;
        if frame.is_err() {
            narrator.speak(IMAGE_UNREADABLE, true);
            narrator.wait_idle().await;
        }
        return frame.with_context(|| format!("failed to read {}", path.display()));
    }
    let mut camera = Camera::new(args.devices());
    if let Err(e) = camera.start(args.facing()).await {
        narrator.speak(e.user_message(), true);
        narrator.wait_idle().await;
        return Err(e.into());
    }
    let frame = camera.capture();
    camera.stop().await;
    if frame.is_none() {
        narrator.speak(SNAPSHOT_FAILED, true);
        narrator.wait_idle().await;
    }
    frame.context("camera produced no frame")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    daemon_common::init_tracing(cli.log_level);

    let settings = match &cli.voice.settings {
        Some(path) => Settings::load(path).await?,
        None => Settings::default(),
    };
    let engine: Arc<dyn SpeechEngine> = match &cli.voice.tts_url {
        Some(url) => Arc::new(CoquiSpeech::new(
            url.clone(),
            cli.voice.speaker_id.clone(),
            cli.voice.language_id.clone(),
            cli.voice.player_command(),
        )),
        None => Arc::new(ConsoleSpeech),
    };
    let narrator = Arc::new(NarrationScheduler::with_defaults(
        engine,
        settings.speak_options(cli.voice.voice_speed),
    ));

    let (frame_args, task) = match &cli.command {
        Command::Cameras { frame } => {
            let camera = Camera::new(frame.devices());
            println!("{}", serde_json::to_string_pretty(&camera.capabilities().await)?);
            return Ok(());
        }
        Command::Navigate { frame } => (frame, AnalysisTask::Navigation),
        Command::Read { frame, language } => (
            frame,
            AnalysisTask::ReadText {
                language: language.clone().unwrap_or_else(|| settings.language_hint()),
            },
        ),
    };

    let frame = acquire_frame(frame_args, &narrator).await?;
    let endpoint = ChatCompletionsClient::new(&cli.endpoint.endpoint, &cli.endpoint.model)
        .api_key(cli.endpoint.api_key.clone())
        .customer_id(cli.endpoint.customer_id.clone());
    let config = OrchestratorConfig {
        timeout: (cli.endpoint.timeout_secs > 0)
            .then(|| Duration::from_secs(cli.endpoint.timeout_secs)),
        item_gap: Duration::from_millis(cli.voice.item_gap_ms),
    };
    let orchestrator = Orchestrator::new(Arc::new(endpoint), narrator.clone(), config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupted_narrator = narrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted");
            on_interrupt.cancel();
            interrupted_narrator.stop();
        }
    });

    let result = orchestrator.analyze_until(&frame, &task, &cancel).await;
    if cli.voice.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    narrator.wait_idle().await;
    info!(source = ?result.source, "done");
    anyhow::ensure!(!result.is_failure(), "analysis failed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus::narration::RecordingSpeech;

    #[tokio::test]
    async fn unreadable_image_is_spoken() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = NarrationScheduler::new(Arc::new(engine));
        let args = FrameArgs {
            image: Some("/nonexistent/street.jpg".into()),
            ..Default::default()
        };
        assert!(acquire_frame(&args, &narrator).await.is_err());
        assert_eq!(log.last().as_deref(), Some(IMAGE_UNREADABLE));
    }

    #[tokio::test]
    async fn missing_camera_is_spoken() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = NarrationScheduler::new(Arc::new(engine));
        assert!(acquire_frame(&FrameArgs::default(), &narrator).await.is_err());
        assert_eq!(
            log.last().as_deref(),
            Some("Camera not supported on this device")
        );
    }
}
