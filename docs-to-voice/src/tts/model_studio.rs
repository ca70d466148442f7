//! Alibaba Cloud Model Studio (DashScope) TTS provider
//!
//! Speaks the multimodal-generation protocol: one POST per text chunk,
//! answered with either a download URL or inline base64 audio.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ApiAudio, ModelsPage, SpeechApi};
use crate::error::{Result, VoiceError};

pub const DEFAULT_API_ENDPOINT: &str =
    "https://dashscope-intl.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation";
pub const DEFAULT_API_MODEL: &str = "qwen3-tts";
pub const DEFAULT_API_VOICE: &str = "Cherry";

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(300);
const CATALOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider for the Model Studio speech endpoint
pub struct ModelStudioClient {
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
    client: Client,
}

impl ModelStudioClient {
    pub fn new(endpoint: &str, api_key: &str, model: &str, voice: &str) -> Self {
        Self {
            endpoint: endpoint.trim().to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            voice: voice.to_string(),
            client: Client::new(),
        }
    }

    /// `scheme://host[:port]` of the configured endpoint
    fn base_url(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.endpoint).ok()?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        })
    }
}

// Model Studio request/response types

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    model: &'a str,
    input: SynthesisInput<'a>,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    output: Option<SynthesisOutput>,
}

#[derive(Debug, Default, Deserialize)]
struct SynthesisOutput {
    #[serde(default)]
    audio: Option<AudioPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct AudioPayload {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    output: Option<ModelsPage>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    /// Usually a string such as `InvalidParameter`, but some gateways send
    /// the HTTP status as a number
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

/// Non-empty text of a string or number field
fn scalar_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(text) => Some(text).filter(|t| !t.is_empty()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Best available diagnostic from an error body: `code: message` when the
/// body is structured, else the start of the raw text.
pub fn parse_api_error_message(raw_payload: &str) -> String {
    let raw_prefix = || raw_payload.chars().take(400).collect::<String>();
    let Ok(error) = serde_json::from_str::<ErrorResponse>(raw_payload) else {
        return raw_prefix();
    };

    let code = scalar_text(error.code);
    let message = scalar_text(error.message);
    match (code, message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (None, Some(message)) => message,
        (Some(code), None) => code,
        (None, None) => raw_prefix(),
    }
}

/// Extract the audio reference from a synthesis response body
fn parse_synthesis_response(raw_payload: &str) -> Result<ApiAudio> {
    let response: SynthesisResponse = serde_json::from_str(raw_payload)
        .map_err(|_| VoiceError::Protocol("API response is not valid JSON.".to_string()))?;

    let audio = response.output.and_then(|o| o.audio).unwrap_or_default();
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

    let url = non_empty(audio.url);
    let data = non_empty(audio.data);
    if url.is_none() && data.is_none() {
        return Err(VoiceError::Protocol(
            "API response does not contain output.audio.url or output.audio.data".to_string(),
        ));
    }

    Ok(ApiAudio {
        url,
        data,
        format: non_empty(audio.format).or_else(|| non_empty(audio.mime_type)),
    })
}

#[async_trait]
impl SpeechApi for ModelStudioClient {
    async fn synthesize(&self, text: &str) -> Result<ApiAudio> {
        let body = SynthesisRequest {
            model: &self.model,
            input: SynthesisInput {
                text,
                voice: &self.voice,
            },
        };

        let failed = |detail: String| {
            VoiceError::Synthesis(format!("Model Studio TTS request failed: {}", detail))
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(SYNTHESIS_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        let raw_payload = response.text().await.map_err(|e| failed(e.to_string()))?;

        if !status.is_success() {
            return Err(VoiceError::Synthesis(format!(
                "Model Studio TTS request failed (HTTP {}): {}",
                status.as_u16(),
                parse_api_error_message(&raw_payload)
            )));
        }

        parse_synthesis_response(&raw_payload)
    }

    async fn models_page(&self, page_no: u32, page_size: u32) -> Result<ModelsPage> {
        let base_url = self.base_url().ok_or_else(|| {
            VoiceError::InvalidSetting(format!("Invalid API endpoint: {}", self.endpoint))
        })?;
        let url = format!("{}/api/v1/models", base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("page_no", page_no), ("page_size", page_size)])
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VoiceError::Synthesis(format!("Model catalog request failed: {}", e)))?;

        let catalog: CatalogResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Protocol(format!("Invalid model catalog response: {}", e)))?;

        Ok(catalog.output.unwrap_or_default())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(SYNTHESIS_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VoiceError::Download(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
