// TTS backend traits and the data contracts they exchange

pub mod macos_say;
pub mod model_studio;
pub mod prosody;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, VoiceError};

/// Represents an available voice
#[derive(Debug, Clone)]
pub struct Voice {
    /// Voice identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Language/locale (e.g., "en_US")
    pub language: Option<String>,
}

/// Options for local synthesis
#[derive(Debug, Clone, Default)]
pub struct TtsOptions {
    /// Speaking rate (words per minute)
    pub rate: Option<u32>,
    /// Voice to use
    pub voice: Option<String>,
}

/// Which synthesis backend a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Local voice engine, no length limit
    Say,
    /// Remote TTS API with a per-request length limit
    Api,
}

impl FromStr for Mode {
    type Err = VoiceError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "say" => Ok(Mode::Say),
            "api" => Ok(Mode::Api),
            _ => Err(VoiceError::InvalidSetting(
                "--mode must be one of: say, api".to_string(),
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Say => write!(f, "say"),
            Mode::Api => write!(f, "api"),
        }
    }
}

/// Local engine - writes one audio file per call
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize text to audio file
    async fn synthesize(&self, text: &str, output_path: &Path, options: &TtsOptions) -> Result<()>;

    /// List available voices
    async fn list_voices(&self) -> Result<Vec<Voice>>;

    /// Backend name
    fn name(&self) -> &str;
}

/// Audio reference returned by one remote synthesis call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiAudio {
    /// Downloadable location of the audio
    pub url: Option<String>,
    /// Inline base64 audio
    pub data: Option<String>,
    /// Declared format or MIME type
    pub format: Option<String>,
}

impl ApiAudio {
    /// File extension for this audio: URL suffix, then declared format, then wav
    pub fn extension(&self) -> String {
        self.url
            .as_deref()
            .and_then(extension_from_url)
            .or_else(|| self.format.as_deref().and_then(extension_from_audio_format))
            .unwrap_or_else(|| "wav".to_string())
    }
}

/// One page of the remote model catalog
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsPage {
    #[serde(default)]
    pub models: Vec<serde_json::Value>,
    #[serde(default)]
    pub total: Option<serde_json::Value>,
}

/// Remote TTS service
#[async_trait]
pub trait SpeechApi: Send + Sync {
    /// Request audio for one piece of text
    async fn synthesize(&self, text: &str) -> Result<ApiAudio>;

    /// Fetch one page of the model catalog
    async fn models_page(&self, page_no: u32, page_size: u32) -> Result<ModelsPage>;

    /// Download audio referenced by URL
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Model the requests are made against
    fn model(&self) -> &str;
}

/// Lowercased extension of the last path segment of a URL
pub fn extension_from_url(source_url: &str) -> Option<String> {
    let parsed = url::Url::parse(source_url).ok()?;
    let filename = parsed.path_segments()?.next_back()?;
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.trim().to_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Extension for a declared format such as `wav`, `.MP3` or `audio/x-wav; codecs=1`
pub fn extension_from_audio_format(raw_format: &str) -> Option<String> {
    let mut value = raw_format.trim().to_lowercase();
    value = value.trim_start_matches('.').to_string();
    if let Some((head, _)) = value.split_once(';') {
        value = head.trim().to_string();
    }
    if let Some((_, tail)) = value.rsplit_once('/') {
        value = tail.to_string();
    }

    let ext = match value.as_str() {
        "x-wav" => "wav",
        "mpeg" => "mp3",
        "x-m4a" => "m4a",
        "x-aiff" => "aiff",
        other => other,
    };
    (!ext.is_empty()).then(|| ext.to_string())
}
