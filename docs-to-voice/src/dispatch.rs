//! Sequential per-chunk synthesis into a scratch directory

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};

use crate::audio::read_duration_seconds;
use crate::chunker::RequestItem;
use crate::error::{Result, VoiceError};
use crate::timeline::SentenceDurations;
use crate::tts::{ApiAudio, SpeechApi, TtsBackend, TtsOptions};

/// One synthesized piece of the final audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Sentence the chunk belongs to, when synthesized per sentence
    pub sentence_index: Option<usize>,
    pub path: PathBuf,
    pub extension: String,
    /// Playback length, when measurable
    pub duration: Option<f64>,
}

/// Everything the remote backend produced for one run
#[derive(Debug)]
pub struct RemoteSynthesis {
    pub chunks: Vec<AudioChunk>,
    /// Format shared by every chunk
    pub extension: String,
    pub durations: SentenceDurations,
}

/// `part-0001.wav` style scratch file name; `number` is 1-based
pub fn chunk_path(work_dir: &Path, number: usize, extension: &str) -> PathBuf {
    work_dir.join(format!("part-{:04}.{}", number, extension.trim_start_matches('.')))
}

pub fn chunk_paths(chunks: &[AudioChunk]) -> Vec<PathBuf> {
    chunks.iter().map(|chunk| chunk.path.clone()).collect()
}

/// Pins the first chunk's format and rejects any later deviation
#[derive(Debug, Default)]
struct FormatGuard {
    expected: Option<String>,
}

impl FormatGuard {
    fn accept(&mut self, actual: String) -> Result<String> {
        match &self.expected {
            None => {
                log::debug!("Chunk audio format: {}", actual);
                self.expected = Some(actual.clone());
                Ok(actual)
            }
            Some(expected) if *expected == actual => Ok(actual),
            Some(expected) => Err(VoiceError::FormatMismatch {
                expected: expected.clone(),
                actual,
            }),
        }
    }
}

fn decode_audio_data(raw: &str) -> Result<Vec<u8>> {
    STANDARD.decode(raw.trim()).map_err(|_| {
        VoiceError::Protocol("API returned invalid output.audio.data payload.".to_string())
    })
}

async fn fetch_audio_bytes(api: &dyn SpeechApi, audio: &ApiAudio) -> Result<Vec<u8>> {
    match (&audio.url, &audio.data) {
        (Some(url), _) => api.download(url).await,
        (None, Some(data)) => decode_audio_data(data),
        (None, None) => Err(VoiceError::Protocol(
            "API response does not contain output.audio.url or output.audio.data".to_string(),
        )),
    }
}

/// Synthesize every request item in order through the remote API.
///
/// Each chunk's duration is measured and credited to its sentence. A chunk
/// whose format differs from the first aborts the run before it is written.
pub async fn synthesize_api_requests(
    api: &dyn SpeechApi,
    items: &[RequestItem],
    sentence_count: usize,
    work_dir: &Path,
    progress: &ProgressBar,
) -> Result<RemoteSynthesis> {
    let mut guard = FormatGuard::default();
    let mut chunks = Vec::with_capacity(items.len());
    let mut durations = SentenceDurations::new(sentence_count);

    for (i, item) in items.iter().enumerate() {
        let number = i + 1;
        log::debug!(
            "Requesting chunk {}/{} for sentence {} ({} chars)",
            number,
            items.len(),
            item.sentence_index + 1,
            item.text.chars().count()
        );

        let audio = api.synthesize(&item.text).await?;
        let extension = guard.accept(audio.extension())?;
        let bytes = fetch_audio_bytes(api, &audio).await?;
        if bytes.is_empty() {
            return Err(VoiceError::Synthesis(format!(
                "Failed to generate audio chunk {}.",
                number
            )));
        }

        let path = chunk_path(work_dir, number, &extension);
        tokio::fs::write(&path, &bytes).await?;

        let duration = read_duration_seconds(&path).await;
        match duration {
            Some(seconds) => log::debug!("Chunk {} lasts {:.3}s", number, seconds),
            None => log::warn!("Could not measure duration of chunk {}", number),
        }
        durations.record(item.sentence_index, duration);

        chunks.push(AudioChunk {
            sentence_index: Some(item.sentence_index),
            path,
            extension,
            duration,
        });
        progress.inc(1);
    }

    Ok(RemoteSynthesis {
        chunks,
        extension: guard.expected.unwrap_or_else(|| "wav".to_string()),
        durations,
    })
}

/// Render each text chunk with the local engine as `part-NNNN.<extension>`
pub async fn synthesize_local_chunks(
    engine: &dyn TtsBackend,
    texts: &[String],
    options: &TtsOptions,
    extension: &str,
    work_dir: &Path,
    progress: &ProgressBar,
) -> Result<Vec<AudioChunk>> {
    let mut chunks = Vec::with_capacity(texts.len());

    for (i, text) in texts.iter().enumerate() {
        let number = i + 1;
        let path = chunk_path(work_dir, number, extension);
        log::debug!("Rendering chunk {}/{} with {}", number, texts.len(), engine.name());

        engine.synthesize(text, &path, options).await?;

        let written = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(VoiceError::Synthesis(format!(
                "Failed to generate audio chunk {}.",
                number
            )));
        }

        chunks.push(AudioChunk {
            sentence_index: None,
            path,
            extension: extension.trim_start_matches('.').to_string(),
            duration: None,
        });
        progress.inc(1);
    }

    Ok(chunks)
}
