//! Frame analysis: request orchestration and result parsing.

mod endpoint;
mod orchestrator;
mod parse;
mod progress;

pub use endpoint::{AnalysisEndpoint, ChatCompletionsClient};
pub use orchestrator::{AnalysisState, Orchestrator, OrchestratorConfig};
pub use parse::{completion_content, parse_navigation, parse_reading};
pub use progress::{ProgressTicker, PROGRESS_CAP};

use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Confidence reported when the model omits one.
pub const DEFAULT_CONFIDENCE: u8 = 85;
/// Readings longer than this are announced as "long text" instead of read out.
pub const LONG_TEXT_CHARS: usize = 200;

/// What the model is asked to do with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisTask {
    /// Obstacle detection and navigation guidance.
    Navigation,
    /// Text extraction. `language` is a code such as `en` or `auto`.
    ReadText { language: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Navigation,
    ReadText,
}

impl AnalysisTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            AnalysisTask::Navigation => TaskKind::Navigation,
            AnalysisTask::ReadText { .. } => TaskKind::ReadText,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            AnalysisTask::Navigation => NAVIGATION_INSTRUCTION,
            AnalysisTask::ReadText { .. } => READING_INSTRUCTION,
        }
    }

    pub fn start_announcement(&self) -> &'static str {
        match self {
            AnalysisTask::Navigation => {
                "Analyzing environment for obstacles and navigation guidance"
            }
            AnalysisTask::ReadText { .. } => "Processing image for text extraction",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            AnalysisTask::Navigation => "Analysis failed. Please try again.",
            AnalysisTask::ReadText { .. } => {
                "Text extraction failed. Please try again with a clearer image."
            }
        }
    }

    /// Progress increment and tick period of the simulated progress bar.
    pub fn progress_step(&self) -> (u8, Duration) {
        match self {
            AnalysisTask::Navigation => (10, Duration::from_millis(200)),
            AnalysisTask::ReadText { .. } => (15, Duration::from_millis(300)),
        }
    }

    /// The language to report when the model does not detect one.
    pub fn fallback_language(&self) -> String {
        match self {
            AnalysisTask::ReadText { language } if language != "auto" && !language.is_empty() => {
                language.clone()
            }
            _ => "en".into(),
        }
    }
}

const NAVIGATION_INSTRUCTION: &str = "You are ARGUS Glass, a navigation assistant for blind and \
low-vision pedestrians. Analyze this image for obstacles and give navigation guidance. Reply \
with JSON only, in this shape: {\"objects\": [{\"type\": \"person/vehicle/obstacle/stairs/pole/curb\", \
\"confidence\": 0-100, \"position\": \"left/center/right/ahead\", \"distance\": \"close/medium/far \
(meters if possible)\", \"guidance\": \"specific navigation instruction\"}], \"summary\": \
\"overall scene description\", \"primary_guidance\": \"main navigation advice\"}";

const READING_INSTRUCTION: &str = "You are the ARGUS Glass reading assistant for blind and \
low-vision users. Extract all visible text from this image. Reply with JSON only, in this shape: \
{\"extracted_text\": \"all text found\", \"text_type\": \
\"sign/document/label/menu/bus_number/shop_sign/other\", \"language\": \"detected language code\", \
\"confidence\": 0-100, \"reading_order\": \"the text in logical reading order\", \"summary\": \
\"what kind of text this is\"}";

/// How an [`AnalysisResult`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSource {
    /// The model's structured payload parsed.
    Parsed,
    /// The payload was malformed; the result was built from the raw text.
    Fallback,
    /// The request never produced a response.
    Failed,
}

/// One finding in a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedItem {
    #[serde(rename = "type")]
    pub kind: String,
    /// Always within `0..=100`.
    pub confidence: u8,
    pub position: String,
    pub distance: String,
    pub guidance: String,
}

impl DetectedItem {
    pub fn error(guidance: impl Into<String>) -> Self {
        Self {
            kind: "error".into(),
            confidence: 0,
            position: "unknown".into(),
            distance: "unknown".into(),
            guidance: guidance.into(),
        }
    }

    pub fn announcement(&self) -> String {
        format!(
            "{} detected {}, {}. {}",
            self.kind, self.position, self.distance, self.guidance
        )
    }
}

/// Text found by the reading task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextReading {
    pub text: String,
    pub language: String,
    pub category: String,
    pub confidence: u8,
}

impl TextReading {
    pub fn announcement(&self) -> String {
        let body = if self.text.chars().count() > LONG_TEXT_CHARS {
            "Long text detected."
        } else {
            self.text.as_str()
        };
        format!(
            "Text extracted successfully. Type: {}. {}",
            self.category, body
        )
    }
}

/// Outcome of analysing one frame.
///
/// An empty `items` list means nothing was detected; failures always carry
/// exactly one item of kind `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub task: TaskKind,
    pub source: ResultSource,
    pub items: Vec<DetectedItem>,
    pub primary_guidance: String,
    pub summary: Option<String>,
    pub reading: Option<TextReading>,
    pub confidence: u8,
    pub completed_at: DateTime<Local>,
}

impl AnalysisResult {
    /// Synthetic result for a request that never produced a response.
    pub fn failed(task: &AnalysisTask) -> Self {
        let (guidance, reading) = match task {
            AnalysisTask::Navigation => ("Analysis failed, please try again", None),
            AnalysisTask::ReadText { .. } => {
                let text = "OCR processing failed. Please try again.";
                (
                    text,
                    Some(TextReading {
                        text: text.into(),
                        language: "en".into(),
                        category: "error".into(),
                        confidence: 0,
                    }),
                )
            }
        };
        Self {
            task: task.kind(),
            source: ResultSource::Failed,
            items: vec![DetectedItem::error(guidance)],
            primary_guidance: task.failure_message().into(),
            summary: None,
            reading,
            confidence: 0,
            completed_at: Local::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.source == ResultSource::Failed
    }
}

/// Clamp an upstream confidence value into `0..=100`.
pub fn clamp_confidence(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_confidence() {
        assert_eq!(clamp_confidence(140.0), 100);
        assert_eq!(clamp_confidence(-3.0), 0);
        assert_eq!(clamp_confidence(72.4), 72);
        assert_eq!(clamp_confidence(f64::NAN), 0);
    }

    #[test]
    fn failed_result_has_single_error_item() {
        for task in [
            AnalysisTask::Navigation,
            AnalysisTask::ReadText {
                language: "auto".into(),
            },
        ] {
            let result = AnalysisResult::failed(&task);
            assert_eq!(result.items.len(), 1);
            assert_eq!(result.items[0].kind, "error");
            assert!(result.is_failure());
        }
    }

    #[test]
    fn long_readings_are_summarised() {
        let reading = TextReading {
            text: "x".repeat(LONG_TEXT_CHARS + 1),
            language: "en".into(),
            category: "document".into(),
            confidence: 90,
        };
        assert_eq!(
            reading.announcement(),
            "Text extracted successfully. Type: document. Long text detected."
        );
    }

    #[test]
    fn fallback_language_resolves_auto() {
        let auto = AnalysisTask::ReadText {
            language: "auto".into(),
        };
        let hindi = AnalysisTask::ReadText {
            language: "hi".into(),
        };
        assert_eq!(auto.fallback_language(), "en");
        assert_eq!(hindi.fallback_language(), "hi");
    }

    #[test]
    fn item_announcement_reads_naturally() {
        let item = DetectedItem {
            kind: "pole".into(),
            confidence: 92,
            position: "right".into(),
            distance: "1.5 meters".into(),
            guidance: "Stay left".into(),
        };
        assert_eq!(item.announcement(), "pole detected right, 1.5 meters. Stay left");
    }
}
