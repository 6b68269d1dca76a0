use chrono::Local;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    AnalysisResult, DEFAULT_CONFIDENCE, DetectedItem, ResultSource, TaskKind, TextReading,
    clamp_confidence,
};

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    content: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct NavigationPayload {
    objects: Vec<Value>,
    summary: Option<Value>,
    #[serde(alias = "primaryGuidance")]
    primary_guidance: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawItem {
    #[serde(rename = "type")]
    kind: Option<Value>,
    confidence: Option<Value>,
    position: Option<Value>,
    distance: Option<Value>,
    guidance: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TextPayload {
    extracted_text: Option<Value>,
    text_type: Option<Value>,
    language: Option<Value>,
    confidence: Option<Value>,
    reading_order: Option<Value>,
    summary: Option<Value>,
}

/// Pull the assistant message text out of a chat-completion response body.
///
/// A body that is not JSON at all is returned trimmed, so the caller can
/// still speak it. A JSON body without message content yields `""`.
pub fn completion_content(body: &str) -> String {
    match serde_json::from_str::<Envelope>(body) {
        Ok(env) => env
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(content_text)
            .unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "response is not a chat completion, using raw body");
            body.trim().to_string()
        }
    }
}

fn content_text(content: Value) -> String {
    match content {
        Value::String(s) => s,
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The outermost `{ ... }` span, which tolerates code fences and chatter
/// around the payload.
fn embedded_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn confidence(value: Option<&Value>) -> Option<u8> {
    let raw = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
        _ => return None,
    };
    Some(clamp_confidence(raw))
}

fn detected_item(value: Value) -> Option<DetectedItem> {
    let raw: RawItem = serde_json::from_value(value).ok()?;
    Some(DetectedItem {
        kind: text(raw.kind.as_ref()).unwrap_or_else(|| "obstacle".into()),
        confidence: confidence(raw.confidence.as_ref()).unwrap_or(DEFAULT_CONFIDENCE),
        position: text(raw.position.as_ref()).unwrap_or_else(|| "ahead".into()),
        distance: text(raw.distance.as_ref()).unwrap_or_else(|| "unknown distance".into()),
        guidance: text(raw.guidance.as_ref()).unwrap_or_else(|| "Proceed with caution".into()),
    })
}

fn mean_confidence(items: &[DetectedItem]) -> u8 {
    if items.is_empty() {
        return DEFAULT_CONFIDENCE;
    }
    let total: u32 = items.iter().map(|i| u32::from(i.confidence)).sum();
    clamp_confidence(f64::from(total) / items.len() as f64)
}

/// Build a navigation result from a raw endpoint response body.
///
/// Never fails: a payload that does not parse produces a
/// [`ResultSource::Fallback`] result whose guidance is the raw content.
pub fn parse_navigation(body: &str) -> AnalysisResult {
    let content = completion_content(body);
    let payload = embedded_json(&content)
        .and_then(|json| serde_json::from_str::<NavigationPayload>(json).ok());
    match payload {
        Some(p) => {
            let items: Vec<DetectedItem> = p.objects.into_iter().filter_map(detected_item).collect();
            AnalysisResult {
                task: TaskKind::Navigation,
                source: ResultSource::Parsed,
                confidence: mean_confidence(&items),
                items,
                primary_guidance: text(p.primary_guidance.as_ref())
                    .unwrap_or_else(|| "Analysis complete".into()),
                summary: text(p.summary.as_ref()),
                reading: None,
                completed_at: Local::now(),
            }
        }
        None => {
            warn!("navigation response was not structured, falling back to raw text");
            let raw = content.trim();
            AnalysisResult {
                task: TaskKind::Navigation,
                source: ResultSource::Fallback,
                items: Vec::new(),
                primary_guidance: if raw.is_empty() {
                    "Analysis complete".into()
                } else {
                    raw.to_string()
                },
                summary: None,
                reading: None,
                confidence: DEFAULT_CONFIDENCE,
                completed_at: Local::now(),
            }
        }
    }
}

/// Build a text reading result from a raw endpoint response body.
///
/// `fallback_language` is reported when the model does not name one.
pub fn parse_reading(body: &str, fallback_language: &str) -> AnalysisResult {
    let content = completion_content(body);
    let payload =
        embedded_json(&content).and_then(|json| serde_json::from_str::<TextPayload>(json).ok());
    let (source, reading, summary) = match payload {
        Some(p) => (
            ResultSource::Parsed,
            TextReading {
                text: text(p.reading_order.as_ref())
                    .or_else(|| text(p.extracted_text.as_ref()))
                    .unwrap_or_else(|| "No text detected".into()),
                language: text(p.language.as_ref()).unwrap_or_else(|| fallback_language.into()),
                category: text(p.text_type.as_ref()).unwrap_or_else(|| "unknown".into()),
                confidence: confidence(p.confidence.as_ref()).unwrap_or(DEFAULT_CONFIDENCE),
            },
            text(p.summary.as_ref()),
        ),
        None => {
            warn!("reading response was not structured, using raw text");
            let raw = content.trim();
            (
                ResultSource::Fallback,
                TextReading {
                    text: if raw.is_empty() {
                        "No text detected".into()
                    } else {
                        raw.to_string()
                    },
                    language: fallback_language.into(),
                    category: "document".into(),
                    confidence: DEFAULT_CONFIDENCE,
                },
                Some("Text extracted from image".into()),
            )
        }
    };
    AnalysisResult {
        task: TaskKind::ReadText,
        source,
        items: Vec::new(),
        primary_guidance: reading.text.clone(),
        summary,
        confidence: reading.confidence,
        reading: Some(reading),
        completed_at: Local::now(),
    }
}
