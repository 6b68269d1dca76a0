use std::path::Path;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::SettingsError;
use crate::narration::SpeakOptions;

/// Stored user preferences that influence narration and reading.
///
/// Mirrors the settings document the app persists; only the fields the
/// pipeline consumes are read and everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub accessibility: AccessibilitySettings,
    pub ocr: OcrSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessibilitySettings {
    /// Speech rate in percent of normal speed.
    pub voice_speed: u32,
    /// Speech volume in percent.
    pub voice_volume: u32,
    pub language: String,
}

impl Default for AccessibilitySettings {
    fn default() -> Self {
        Self {
            voice_speed: 80,
            voice_volume: 80,
            language: "en".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OcrSettings {
    pub auto_language_detection: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            auto_language_detection: true,
        }
    }
}

/// Coarse speed presets offered by the reading mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VoiceSpeed {
    Slow,
    Normal,
    Fast,
}

impl VoiceSpeed {
    pub fn rate(self) -> f32 {
        match self {
            VoiceSpeed::Slow => 0.6,
            VoiceSpeed::Normal => 0.8,
            VoiceSpeed::Fast => 1.2,
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        match tokio::fs::read(path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Language hint for text reading: `auto` unless detection is disabled.
    pub fn language_hint(&self) -> String {
        if self.ocr.auto_language_detection {
            "auto".into()
        } else {
            self.accessibility.language.clone()
        }
    }

    /// Narration options derived from the stored voice settings, optionally
    /// overridden by a speed preset.
    pub fn speak_options(&self, preset: Option<VoiceSpeed>) -> SpeakOptions {
        let rate = preset
            .map(VoiceSpeed::rate)
            .unwrap_or(self.accessibility.voice_speed as f32 / 100.0);
        SpeakOptions {
            interrupt: false,
            rate,
            volume: (self.accessibility.voice_volume.min(100) as f32) / 100.0,
        }
    }
}
