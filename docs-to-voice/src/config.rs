// docs-to-voice configuration management

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VoiceError;
use crate::text::TimingWeights;
use crate::tts::Mode;
use crate::tts::model_studio::{DEFAULT_API_ENDPOINT, DEFAULT_API_MODEL, DEFAULT_API_VOICE};

static ENV_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*)$").unwrap());

/// Persisted defaults; every field may be left out of the file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend: "say" or "api"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Local engine voice (None uses system default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_voice: Option<String>,

    /// Per-request character budget; 0 disables chunking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,

    /// Playback speed multiplier applied after synthesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_rate: Option<f64>,

    /// Reading-weight constants for estimated timelines
    #[serde(default)]
    pub timing: TimingWeights,
}

impl Config {
    /// Get the config file path: ~/.config/cli-programs/docs-to-voice.toml
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("cli-programs")
            .join("docs-to-voice.toml"))
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Invalid config file {:?}", path))?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Validate and store one key, as given to `config set`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let setting = Setting::from_config_key(key).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown config key '{}'. Valid keys: {}",
                key,
                Setting::CONFIGURABLE
                    .iter()
                    .filter_map(|s| s.config_key())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;

        let text = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        match setting {
            Setting::Mode => {
                let mode: Mode = value.parse()?;
                self.mode = Some(mode.to_string());
            }
            Setting::Voice => self.voice = text,
            Setting::ApiEndpoint => self.api_endpoint = text,
            Setting::ApiModel => self.api_model = text,
            Setting::ApiVoice => self.api_voice = text,
            Setting::MaxChars => {
                self.max_chars = match validate_max_chars(value)? {
                    MaxChars::Unset => None,
                    MaxChars::Disabled => Some(0),
                    MaxChars::Limit(limit) => Some(limit),
                }
            }
            Setting::SpeechRate => self.speech_rate = validate_speech_rate(value)?,
            Setting::ApiKey => anyhow::bail!("DASHSCOPE_API_KEY is only read from the environment"),
        }
        Ok(())
    }
}

/// A value that can come from flags, env file, environment or config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Mode,
    Voice,
    ApiEndpoint,
    ApiModel,
    ApiVoice,
    ApiKey,
    MaxChars,
    SpeechRate,
}

impl Setting {
    /// Settings that can be persisted with `config set`
    pub const CONFIGURABLE: &'static [Setting] = &[
        Setting::Mode,
        Setting::Voice,
        Setting::ApiEndpoint,
        Setting::ApiModel,
        Setting::ApiVoice,
        Setting::MaxChars,
        Setting::SpeechRate,
    ];

    pub fn env_key(&self) -> &'static str {
        match self {
            Setting::Mode => "DOCS_TO_VOICE_MODE",
            Setting::Voice => "DOCS_TO_VOICE_VOICE",
            Setting::ApiEndpoint => "DOCS_TO_VOICE_API_ENDPOINT",
            Setting::ApiModel => "DOCS_TO_VOICE_API_MODEL",
            Setting::ApiVoice => "DOCS_TO_VOICE_API_VOICE",
            Setting::ApiKey => "DASHSCOPE_API_KEY",
            Setting::MaxChars => "DOCS_TO_VOICE_MAX_CHARS",
            Setting::SpeechRate => "DOCS_TO_VOICE_SPEECH_RATE",
        }
    }

    pub fn config_key(&self) -> Option<&'static str> {
        match self {
            Setting::Mode => Some("mode"),
            Setting::Voice => Some("voice"),
            Setting::ApiEndpoint => Some("api_endpoint"),
            Setting::ApiModel => Some("api_model"),
            Setting::ApiVoice => Some("api_voice"),
            Setting::ApiKey => None,
            Setting::MaxChars => Some("max_chars"),
            Setting::SpeechRate => Some("speech_rate"),
        }
    }

    pub fn from_config_key(key: &str) -> Option<Setting> {
        let key = key.trim().replace('-', "_");
        Self::CONFIGURABLE
            .iter()
            .copied()
            .find(|s| s.config_key() == Some(key.as_str()))
    }

    /// Built-in fallback, if any
    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            Setting::Mode => Some("say"),
            Setting::ApiEndpoint => Some(DEFAULT_API_ENDPOINT),
            Setting::ApiModel => Some(DEFAULT_API_MODEL),
            Setting::ApiVoice => Some(DEFAULT_API_VOICE),
            _ => None,
        }
    }

    fn from_config(&self, config: &Config) -> Option<String> {
        match self {
            Setting::Mode => config.mode.clone(),
            Setting::Voice => config.voice.clone(),
            Setting::ApiEndpoint => config.api_endpoint.clone(),
            Setting::ApiModel => config.api_model.clone(),
            Setting::ApiVoice => config.api_voice.clone(),
            Setting::ApiKey => None,
            Setting::MaxChars => config.max_chars.map(|v| v.to_string()),
            Setting::SpeechRate => config.speech_rate.map(|v| v.to_string()),
        }
    }
}

fn strip_wrapping_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && bytes[0] == bytes[bytes.len() - 1] && matches!(bytes[0], b'"' | b'\'') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parse `KEY=VALUE` lines; comments, blanks and malformed lines are skipped
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let captures = ENV_LINE.captures(line)?;
            let value = strip_wrapping_quotes(captures[2].trim());
            Some((captures[1].to_string(), value.to_string()))
        })
        .collect()
}

/// Read a `.env` style file; a missing file yields no values
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.is_file() {
        log::debug!("No env file at {}", path.display());
        return Ok(HashMap::new());
    }
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_env_file(&String::from_utf8_lossy(&content)))
}

/// Everything below the command line in the resolution order
#[derive(Debug, Clone, Default)]
pub struct SettingSources {
    pub env_file: HashMap<String, String>,
    pub process_env: HashMap<String, String>,
    pub config: Config,
}

impl SettingSources {
    /// Capture the env file, the current process environment and the config
    pub fn gather(env_file: &Path, config: Config) -> Result<Self> {
        Ok(Self {
            env_file: load_env_file(env_file)?,
            process_env: std::env::vars().collect(),
            config,
        })
    }

    /// flag > env file > environment > config > default; blank counts as unset
    pub fn resolve(&self, cli: Option<&str>, setting: Setting) -> Option<String> {
        let present = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        present(cli)
            .or_else(|| present(self.env_file.get(setting.env_key()).map(String::as_str)))
            .or_else(|| present(self.process_env.get(setting.env_key()).map(String::as_str)))
            .or_else(|| present(setting.from_config(&self.config).as_deref()))
            .or_else(|| setting.default_value().map(str::to_string))
    }
}

/// Parsed `--max-chars`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxChars {
    /// Not given: discover the limit (api) or leave unchunked (say)
    Unset,
    /// Explicit 0: never chunk, never discover
    Disabled,
    Limit(usize),
}

impl MaxChars {
    pub fn limit(&self) -> Option<usize> {
        match self {
            MaxChars::Limit(limit) => Some(*limit),
            _ => None,
        }
    }
}

pub fn validate_max_chars(raw: &str) -> crate::error::Result<MaxChars> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(MaxChars::Unset);
    }
    let invalid =
        || VoiceError::InvalidSetting("--max-chars must be a non-negative integer.".to_string());
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    match value.parse::<usize>().map_err(|_| invalid())? {
        0 => Ok(MaxChars::Disabled),
        limit => Ok(MaxChars::Limit(limit)),
    }
}

/// Speed multiplier; blank means unchanged
pub fn validate_speech_rate(raw: &str) -> crate::error::Result<Option<f64>> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(Some(rate)),
        _ => Err(VoiceError::InvalidSetting(
            "--speech-rate must be a positive number.".to_string(),
        )),
    }
}

/// Local engine words-per-minute
pub fn validate_rate(raw: &str) -> crate::error::Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(rate) if rate > 0 && raw.trim().chars().all(|c| c.is_ascii_digit()) => Ok(rate),
        _ => Err(VoiceError::InvalidSetting(
            "--rate must be a positive integer.".to_string(),
        )),
    }
}
