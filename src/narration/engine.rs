use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use urlencoding::encode;

use super::Utterance;

/// Abstraction for turning text into audible speech.
///
/// `speak` resolves once playback has finished. Dropping the returned
/// future must stop playback; the scheduler relies on that to cancel.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn speak(&self, utterance: &Utterance) -> anyhow::Result<()>;
}

/// Writes each utterance to stdout (for terminal screen readers) and logs it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSpeech;

#[async_trait]
impl SpeechEngine for ConsoleSpeech {
    async fn speak(&self, utterance: &Utterance) -> anyhow::Result<()> {
        info!(rate = utterance.rate, "say: {}", utterance.text);
        println!("{}", utterance.text);
        Ok(())
    }
}

/// Engine that stores utterances for later inspection.
///
/// Useful in tests; an optional playback duration makes cancellation
/// observable through [`SpeechLog::completed`].
#[derive(Clone)]
pub struct RecordingSpeech {
    log: SpeechLog,
    duration: Duration,
}

/// Shared log returned by [`RecordingSpeech::new`].
#[derive(Clone, Default)]
pub struct SpeechLog {
    started: Arc<Mutex<Vec<Utterance>>>,
    completed: Arc<Mutex<Vec<String>>>,
}

impl SpeechLog {
    /// Every utterance that began playback, in order.
    pub fn utterances(&self) -> Vec<Utterance> {
        self.started.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Text of utterances that played to the end.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.utterances().pop().map(|u| u.text)
    }
}

impl RecordingSpeech {
    pub fn new() -> (Self, SpeechLog) {
        let log = SpeechLog::default();
        (
            Self {
                log: log.clone(),
                duration: Duration::ZERO,
            },
            log,
        )
    }

    /// Pretend every utterance takes `duration` to play.
    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration, ..self }
    }
}

#[async_trait]
impl SpeechEngine for RecordingSpeech {
    async fn speak(&self, utterance: &Utterance) -> anyhow::Result<()> {
        if let Ok(mut started) = self.log.started.lock() {
            started.push(utterance.clone());
        }
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        if let Ok(mut completed) = self.log.completed.lock() {
            completed.push(utterance.text.clone());
        }
        Ok(())
    }
}

/// Synthesises speech with a Coqui TTS server and plays it through an
/// external player process that reads WAV data on stdin.
pub struct CoquiSpeech {
    client: reqwest::Client,
    base_url: String,
    speaker_id: String,
    language_id: Option<String>,
    player: Vec<String>,
}

impl CoquiSpeech {
    /// `player` is the command line of the audio player, e.g. `["aplay", "-q"]`.
    pub fn new(
        base_url: impl Into<String>,
        speaker_id: impl Into<String>,
        language_id: Option<String>,
        player: Vec<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            speaker_id: speaker_id.into(),
            language_id,
            player,
        }
    }

    fn tts_url(&self, text: &str) -> String {
        format!(
            "{}/api/tts?text={}&speaker_id={}&style_wav=&language_id={}",
            self.base_url.trim_end_matches('/'),
            encode(text),
            self.speaker_id,
            self.language_id.as_deref().unwrap_or_default()
        )
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<bytes::Bytes> {
        let resp = self
            .client
            .get(self.tts_url(text))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?)
    }

    async fn play(&self, wav: &[u8]) -> anyhow::Result<()> {
        let (program, args) = self
            .player
            .split_first()
            .context("no audio player configured")?;
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start audio player {program}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(wav).await?;
            stdin.shutdown().await?;
        }
        let status = child.wait().await?;
        anyhow::ensure!(status.success(), "audio player exited with {status}");
        Ok(())
    }
}

#[async_trait]
impl SpeechEngine for CoquiSpeech {
    async fn speak(&self, utterance: &Utterance) -> anyhow::Result<()> {
        // Coqui has no rate control; the player receives audio at native speed.
        debug!(text = %utterance.text, "synthesising");
        let wav = self.synthesize(&utterance.text).await?;
        self.play(&wav).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tracing_test::traced_test;

    fn utterance(text: &str) -> Utterance {
        Utterance {
            text: text.into(),
            rate: 0.8,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn coqui_requests_audio_and_plays_it() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/tts")
                    .query_param("text", "door ahead")
                    .query_param("speaker_id", "p330");
                then.status(200).body("RIFFfakewav");
            })
            .await;
        let speech = CoquiSpeech::new(
            server.base_url(),
            "p330",
            None,
            vec!["sh".into(), "-c".into(), "cat > /dev/null".into()],
        );
        speech.speak(&utterance("door ahead")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failing_player_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tts");
                then.status(200).body("RIFF");
            })
            .await;
        let speech = CoquiSpeech::new(
            server.base_url(),
            "p330",
            None,
            vec!["sh".into(), "-c".into(), "cat > /dev/null; exit 3".into()],
        );
        assert!(speech.speak(&utterance("hi")).await.is_err());
    }

    #[tokio::test]
    async fn tts_server_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tts");
                then.status(500);
            })
            .await;
        let speech = CoquiSpeech::new(server.base_url(), "p330", None, vec!["true".into()]);
        assert!(speech.speak(&utterance("hi")).await.is_err());
    }

    #[traced_test]
    #[tokio::test]
    async fn console_speech_logs_text() {
        ConsoleSpeech.speak(&utterance("stairs ahead")).await.unwrap();
        assert!(logs_contain("say: stairs ahead"));
    }

    #[tokio::test]
    async fn recording_speech_keeps_order() {
        let (speech, log) = RecordingSpeech::new();
        speech.speak(&utterance("a")).await.unwrap();
        speech.speak(&utterance("b")).await.unwrap();
        assert_eq!(log.last().as_deref(), Some("b"));
        assert_eq!(log.completed(), vec!["a".to_string(), "b".to_string()]);
    }
}
