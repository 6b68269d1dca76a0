use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::endpoint::AnalysisEndpoint;
use super::parse::{parse_navigation, parse_reading};
use super::progress::ProgressTicker;
use super::{AnalysisResult, AnalysisTask, ResultSource};
use crate::error::AnalysisError;
use crate::frame::CapturedFrame;
use crate::narration::NarrationScheduler;

/// Where the orchestrator is in an analysis cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisState {
    Idle,
    Requesting,
    Parsed,
    ParsedFallback,
    Narrating,
    Failed,
}

/// Pause before each detected item is announced.
pub const DEFAULT_ITEM_GAP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Give up on the endpoint after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Silence inserted before each detected item is announced.
    pub item_gap: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            item_gap: DEFAULT_ITEM_GAP,
        }
    }
}

/// Turns a captured frame into an [`AnalysisResult`] while keeping the user
/// informed through narration and a simulated progress value.
///
/// Callers are expected not to overlap analyses; nothing here prevents it,
/// but overlapping runs share the progress and state channels.
pub struct Orchestrator {
    endpoint: Arc<dyn AnalysisEndpoint>,
    narrator: Arc<NarrationScheduler>,
    config: OrchestratorConfig,
    progress: watch::Sender<u8>,
    state: watch::Sender<AnalysisState>,
}

impl Orchestrator {
    pub fn new(
        endpoint: Arc<dyn AnalysisEndpoint>,
        narrator: Arc<NarrationScheduler>,
        config: OrchestratorConfig,
    ) -> Self {
        let (progress, _) = watch::channel(0);
        let (state, _) = watch::channel(AnalysisState::Idle);
        Self {
            endpoint,
            narrator,
            config,
            progress,
            state,
        }
    }

    /// Progress in percent. Reaches 100 only once the request settled.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<AnalysisState> {
        self.state.subscribe()
    }

    pub fn narrator(&self) -> &NarrationScheduler {
        &self.narrator
    }

    pub async fn analyze(&self, frame: &CapturedFrame, task: &AnalysisTask) -> AnalysisResult {
        self.analyze_until(frame, task, &CancellationToken::new())
            .await
    }

    /// Like [`Orchestrator::analyze`], abandoning the request once `cancel`
    /// fires. An abandoned request is reported like any other failure.
    pub async fn analyze_until(
        &self,
        frame: &CapturedFrame,
        task: &AnalysisTask,
        cancel: &CancellationToken,
    ) -> AnalysisResult {
        info!(task = ?task.kind(), provenance = ?frame.provenance(), "analysis started");
        self.state.send_replace(AnalysisState::Requesting);
        self.narrator.speak(task.start_announcement(), true);
        let (step, period) = task.progress_step();
        let ticker = ProgressTicker::start(self.progress.clone(), step, period);

        let body = match self.request(frame, task, cancel).await {
            Ok(body) => body,
            Err(e) => {
                ticker.finish();
                error!(error = %e, "analysis failed");
                self.state.send_replace(AnalysisState::Failed);
                self.narrator.speak(task.failure_message(), true);
                self.state.send_replace(AnalysisState::Idle);
                return AnalysisResult::failed(task);
            }
        };

        let result = match task {
            AnalysisTask::Navigation => parse_navigation(&body),
            AnalysisTask::ReadText { .. } => parse_reading(&body, &task.fallback_language()),
        };
        ticker.finish();
        self.state.send_replace(match result.source {
            ResultSource::Parsed => AnalysisState::Parsed,
            _ => AnalysisState::ParsedFallback,
        });
        info!(
            source = ?result.source,
            items = result.items.len(),
            "analysis complete"
        );

        self.state.send_replace(AnalysisState::Narrating);
        self.narrate(task, &result);
        self.state.send_replace(AnalysisState::Idle);
        result
    }

    async fn request(
        &self,
        frame: &CapturedFrame,
        task: &AnalysisTask,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let call = self.endpoint.analyze(task.instruction(), frame);
        let bounded = async {
            match self.config.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(res) => res,
                    Err(_) => Err(AnalysisError::Timeout(limit)),
                },
                None => call.await,
            }
        };
        tokio::select! {
            res = bounded => res,
            _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
        }
    }

    fn narrate(&self, task: &AnalysisTask, result: &AnalysisResult) {
        let opts = self.narrator.defaults();
        match task {
            AnalysisTask::Navigation => {
                self.narrator
                    .speak_with(result.primary_guidance.as_str(), opts.interrupting());
                for item in &result.items {
                    self.narrator
                        .speak_after(item.announcement(), opts.queued(), self.config.item_gap);
                }
            }
            AnalysisTask::ReadText { .. } => {
                if let Some(reading) = &result.reading {
                    self.narrator.speak_with(reading.announcement(), opts.queued());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Provenance;
    use crate::narration::RecordingSpeech;
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl AnalysisEndpoint for Canned {
        async fn analyze(&self, _: &str, _: &CapturedFrame) -> Result<String, AnalysisError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn default_config_pauses_between_items() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.item_gap, Duration::from_millis(500));
        assert!(config.timeout.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn default_gap_spaces_out_items() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = Arc::new(NarrationScheduler::new(Arc::new(engine)));
        let orchestrator = Orchestrator::new(
            Arc::new(Canned(
                r#"{"choices":[{"message":{"content":"{\"primary_guidance\":\"Slow down\",\"objects\":[{\"type\":\"curb\"},{\"type\":\"bench\"}]}"}}]}"#,
            )),
            narrator.clone(),
            OrchestratorConfig::default(),
        );
        let frame = CapturedFrame::new(&b"img"[..], "image/jpeg", Provenance::UserUpload);
        orchestrator.analyze(&frame, &AnalysisTask::Navigation).await;
        let start = tokio::time::Instant::now();
        narrator.wait_idle().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
        let said: Vec<String> = log.utterances().into_iter().map(|u| u.text).collect();
        let tail = &said[said.len() - 3..];
        assert_eq!(tail[0], "Slow down");
        assert!(tail[1].starts_with("curb detected"));
        assert!(tail[2].starts_with("bench detected"));
    }

    #[tokio::test]
    async fn returns_to_idle_after_narrating() {
        let (engine, log) = RecordingSpeech::new();
        let narrator = Arc::new(NarrationScheduler::new(Arc::new(engine)));
        let orchestrator = Orchestrator::new(
            Arc::new(Canned(r#"{"choices":[{"message":{"content":"{\"primary_guidance\":\"Clear\"}"}}]}"#)),
            narrator.clone(),
            OrchestratorConfig::default(),
        );
        let frame = CapturedFrame::new(&b"img"[..], "image/jpeg", Provenance::UserUpload);
        let result = orchestrator.analyze(&frame, &AnalysisTask::Navigation).await;
        assert_eq!(result.primary_guidance, "Clear");
        assert_eq!(*orchestrator.state().borrow(), AnalysisState::Idle);
        assert_eq!(*orchestrator.progress().borrow(), 100);
        narrator.wait_idle().await;
        assert_eq!(log.last().as_deref(), Some("Clear"));
    }
}
