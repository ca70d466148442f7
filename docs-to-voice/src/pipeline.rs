//! End-to-end run: text in, audio plus timeline sidecars out
//!
//! All chunk audio lives in a scratch directory that is removed when the run
//! ends, successfully or not. The destination only ever receives a finished
//! file, renamed into place by the concatenator.

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};

use crate::audio::read_duration_seconds;
use crate::chunker::{
    CharCount, WeightedCount, require_chunks, split_into_sentence_requests, split_text_for_tts,
};
use crate::concat::concat_audio_files;
use crate::config::MaxChars;
use crate::discovery::discover_max_chars;
use crate::dispatch::{chunk_paths, synthesize_api_requests, synthesize_local_chunks};
use crate::error::{Result, VoiceError};
use crate::speed::{apply_speech_rate, is_unit_rate, scale_sentence_durations};
use crate::text::{TimingWeights, extract_timeline_sentences};
use crate::timeline::{
    MeasuredDurations, Timeline, TimelinePaths, build_timeline, write_timeline_files,
};
use crate::tts::prosody::build_auto_prosody_text;
use crate::tts::{SpeechApi, TtsBackend, TtsOptions};

/// Extension used for local-engine output when none is requested
pub const DEFAULT_SAY_EXTENSION: &str = "aiff";

/// The synthesis engine for a run
#[derive(Clone, Copy)]
pub enum Backend<'a> {
    Say(&'a dyn TtsBackend),
    Api(&'a dyn SpeechApi),
}

/// Fully resolved inputs of one conversion
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source_text: String,
    pub project_dir: PathBuf,
    /// Folder under `<project_dir>/audio/`; defaults to the project dir name
    pub project_name: Option<String>,
    /// File name, with or without extension; defaults to a timestamp
    pub output_name: Option<String>,
    pub max_chars: MaxChars,
    pub speech_rate: Option<f64>,
    pub auto_prosody: bool,
    pub force: bool,
    pub say_options: TtsOptions,
    pub weights: TimingWeights,
}

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub audio_path: PathBuf,
    pub sidecars: TimelinePaths,
    pub timeline: Timeline,
}

/// `voice-YYYYMMDD-HHMMSS` in local time
pub fn default_output_name() -> String {
    chrono::Local::now().format("voice-%Y%m%d-%H%M%S").to_string()
}

/// `<project_dir>/audio/<project_name>`, created if needed
pub fn prepare_output_dir(project_dir: &Path, project_name: Option<&str>) -> Result<PathBuf> {
    let project_dir = std::path::absolute(project_dir)?;
    let project_name = match project_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                VoiceError::InvalidSetting("Unable to determine project name.".to_string())
            })?,
    };

    let output_dir = project_dir.join("audio").join(project_name);
    std::fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

pub fn ensure_output_not_exists(output_path: &Path, force: bool) -> Result<()> {
    if output_path.exists() && !force {
        return Err(VoiceError::OutputExists(output_path.to_path_buf()));
    }
    Ok(())
}

fn has_extension(output_name: &str) -> bool {
    output_name.contains('.')
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Render through the local engine; returns the final audio path
async fn run_say(
    engine: &dyn TtsBackend,
    request: &RunRequest,
    output_dir: &Path,
    output_name: &str,
    work_dir: &Path,
    progress: &ProgressBar,
) -> Result<PathBuf> {
    let chunks = require_chunks(split_text_for_tts(
        &request.source_text,
        request.max_chars.limit(),
        &CharCount,
    ))?;
    let texts: Vec<String> = if request.auto_prosody {
        chunks.iter().map(|chunk| build_auto_prosody_text(chunk)).collect()
    } else {
        chunks
    };

    let output_path = if has_extension(output_name) {
        output_dir.join(output_name)
    } else {
        output_dir.join(format!("{}.{}", output_name, DEFAULT_SAY_EXTENSION))
    };
    ensure_output_not_exists(&output_path, request.force)?;

    let extension = match extension_of(&output_path) {
        ext if ext.is_empty() => DEFAULT_SAY_EXTENSION.to_string(),
        ext => ext,
    };

    log::info!("Synthesizing {} chunk(s) with {}", texts.len(), engine.name());
    progress.set_length(texts.len() as u64);
    let parts = synthesize_local_chunks(
        engine,
        &texts,
        &request.say_options,
        &extension,
        work_dir,
        progress,
    )
    .await?;

    concat_audio_files(&chunk_paths(&parts), &output_path).await?;
    Ok(output_path)
}

/// Render through the remote API; returns the final audio path and any
/// per-sentence durations that could be recovered
async fn run_api(
    api: &dyn SpeechApi,
    request: &RunRequest,
    output_dir: &Path,
    output_name: &str,
    work_dir: &Path,
    progress: &ProgressBar,
) -> Result<(PathBuf, Option<MeasuredDurations>)> {
    let limit = match request.max_chars {
        MaxChars::Limit(limit) => Some(limit),
        MaxChars::Disabled => None,
        MaxChars::Unset => discover_max_chars(api).await,
    };

    let (sentences, items) =
        split_into_sentence_requests(&request.source_text, limit, &WeightedCount)?;
    let items = require_chunks(items)?;

    if has_extension(output_name) {
        ensure_output_not_exists(&output_dir.join(output_name), request.force)?;
    }

    log::info!(
        "Synthesizing {} sentence(s) in {} request(s) with model {}",
        sentences.len(),
        items.len(),
        api.model()
    );
    progress.set_length(items.len() as u64);
    let remote =
        synthesize_api_requests(api, &items, sentences.len(), work_dir, progress).await?;

    let output_path = if has_extension(output_name) {
        output_dir.join(output_name)
    } else {
        output_dir.join(format!("{}.{}", output_name, remote.extension))
    };
    ensure_output_not_exists(&output_path, request.force)?;

    let requested = extension_of(&output_path);
    if remote.chunks.len() > 1 && !requested.is_empty() && requested != remote.extension {
        return Err(VoiceError::Protocol(format!(
            "Output extension .{} does not match chunk audio format .{}.",
            requested, remote.extension
        )));
    }

    concat_audio_files(&chunk_paths(&remote.chunks), &output_path).await?;

    let output_total = if remote.durations.has_unknown() {
        read_duration_seconds(&output_path).await
    } else {
        None
    };
    let measured = remote
        .durations
        .resolve(&sentences, output_total, &request.weights);
    if measured.is_none() {
        log::warn!("Chunk durations incomplete; timeline will be apportioned by text weight");
    }

    Ok((output_path, measured))
}

/// Sentence durations as heard after playback is sped up by `rate`
fn rescale_measured(measured: Option<MeasuredDurations>, rate: f64) -> Option<MeasuredDurations> {
    measured.map(|durations| MeasuredDurations {
        values: scale_sentence_durations(&durations.values, rate),
        mode: durations.mode,
    })
}

/// Convert `request.source_text` to audio with `backend` and write the
/// `.timeline.json` and `.srt` sidecars next to it.
pub async fn run(
    request: &RunRequest,
    backend: Backend<'_>,
    progress: &ProgressBar,
) -> Result<RunOutput> {
    if request.source_text.trim().is_empty() {
        return Err(VoiceError::NoContent("conversion"));
    }

    let output_dir = prepare_output_dir(&request.project_dir, request.project_name.as_deref())?;
    let output_name = request
        .output_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(default_output_name);

    let work_dir = tempfile::Builder::new().prefix("docs-to-voice-").tempdir()?;

    let (audio_path, mut measured) = match backend {
        Backend::Say(engine) => {
            let path =
                run_say(engine, request, &output_dir, &output_name, work_dir.path(), progress)
                    .await?;
            (path, None)
        }
        Backend::Api(api) => {
            run_api(api, request, &output_dir, &output_name, work_dir.path(), progress).await?
        }
    };
    drop(work_dir);

    let written = std::fs::metadata(&audio_path).map(|m| m.len()).unwrap_or(0);
    if written == 0 {
        return Err(VoiceError::Synthesis("Failed to generate audio file.".to_string()));
    }

    if let Some(rate) = request.speech_rate.filter(|rate| !is_unit_rate(*rate)) {
        log::info!("Applying speech rate {}", rate);
        apply_speech_rate(&audio_path, rate).await?;
        measured = rescale_measured(measured, rate);
    }

    let sentences = extract_timeline_sentences(&request.source_text)?;
    let total = read_duration_seconds(&audio_path).await;
    let timeline = build_timeline(&sentences, measured.as_ref(), total, &request.weights);
    let sidecars = write_timeline_files(&audio_path, &timeline)?;

    log::info!(
        "Wrote {} ({} sentences, {:.3}s, {})",
        audio_path.display(),
        timeline.entries.len(),
        timeline.duration_seconds,
        timeline.mode
    );

    Ok(RunOutput {
        audio_path,
        sidecars,
        timeline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{EchoEngine, QueuedApi, inline, wav_bytes};
    use crate::process::find_tool;
    use crate::timeline::TimingMode;
    use std::collections::HashMap;
    use std::fs;

    fn request(project_dir: &Path, text: &str) -> RunRequest {
        RunRequest {
            source_text: text.to_string(),
            project_dir: project_dir.to_path_buf(),
            project_name: Some("demo".to_string()),
            output_name: Some("voice".to_string()),
            max_chars: MaxChars::Unset,
            speech_rate: None,
            auto_prosody: true,
            force: false,
            say_options: TtsOptions::default(),
            weights: TimingWeights::default(),
        }
    }

    fn entry_ms(output: &RunOutput) -> Vec<(u64, u64)> {
        output
            .timeline
            .entries
            .iter()
            .map(|e| (e.start_ms, e.end_ms))
            .collect()
    }

    #[test]
    fn test_default_output_name_shape() {
        let name = default_output_name();
        assert!(name.starts_with("voice-"));
        assert_eq!(name.len(), "voice-20240101-120000".len());
    }

    #[test]
    fn test_prepare_output_dir_uses_project_name() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("my-talk");

        let output_dir = prepare_output_dir(&project, None).unwrap();
        assert_eq!(output_dir, project.join("audio").join("my-talk"));
        assert!(output_dir.is_dir());

        let output_dir = prepare_output_dir(&project, Some("episode-1")).unwrap();
        assert_eq!(output_dir, project.join("audio").join("episode-1"));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), " \n\t ");
        let err = run(&req, Backend::Say(&EchoEngine), &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No text content found for conversion.");
        assert!(!dir.path().join("audio").exists());
    }

    #[tokio::test]
    async fn test_say_run_writes_audio_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(
            &request(dir.path(), "Hello, world. Second line!"),
            Backend::Say(&EchoEngine),
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();

        let expected = dir.path().join("audio").join("demo").join("voice.aiff");
        assert_eq!(output.audio_path, expected);
        let spoken = fs::read_to_string(&expected).unwrap();
        assert!(spoken.contains("[[slnc 120]]"));

        assert!(output.sidecars.json.is_file());
        assert!(output.sidecars.srt.is_file());
        assert_eq!(output.timeline.entries.len(), 2);
        // Local chunks carry no per-sentence durations
        assert_ne!(output.timeline.mode, TimingMode::SentenceAudio);
    }

    #[tokio::test]
    async fn test_say_run_without_prosody_sends_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "Hello, world.");
        req.auto_prosody = false;

        let output = run(&req, Backend::Say(&EchoEngine), &ProgressBar::hidden()).await.unwrap();
        assert_eq!(fs::read_to_string(&output.audio_path).unwrap(), "Hello, world.");
    }

    #[tokio::test]
    async fn test_existing_output_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("audio").join("demo");
        fs::create_dir_all(&output_dir).unwrap();
        fs::write(output_dir.join("voice.aiff"), b"keep me").unwrap();

        let req = request(dir.path(), "Hello.");
        let err = run(&req, Backend::Say(&EchoEngine), &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::OutputExists(_)));
        assert_eq!(fs::read(output_dir.join("voice.aiff")).unwrap(), b"keep me");

        let mut req = request(dir.path(), "Hello.");
        req.force = true;
        run(&req, Backend::Say(&EchoEngine), &ProgressBar::hidden()).await.unwrap();
        assert_ne!(fs::read(output_dir.join("voice.aiff")).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_api_run_builds_sentence_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let api = QueuedApi::new(
            vec![
                Ok(inline(&wav_bytes(8000, 4000), Some("wav"))),
                Ok(inline(&wav_bytes(8000, 8000), Some("wav"))),
            ],
            HashMap::new(),
        );
        let mut req = request(dir.path(), "第一句。第二句。");
        req.max_chars = MaxChars::Limit(600);

        let output = run(&req, Backend::Api(&api), &ProgressBar::hidden()).await.unwrap();

        let expected = dir.path().join("audio").join("demo").join("voice.wav");
        assert_eq!(output.audio_path, expected);
        assert_eq!(output.timeline.mode, TimingMode::SentenceAudio);
        assert_eq!(entry_ms(&output), vec![(0, 500), (500, 1500)]);
        assert_eq!(*api.requests.lock().unwrap(), vec!["第一句。", "第二句。"]);
    }

    #[tokio::test]
    async fn test_api_run_rejects_mismatched_output_extension() {
        let dir = tempfile::tempdir().unwrap();
        let api = QueuedApi::new(
            vec![
                Ok(inline(&wav_bytes(8000, 800), None)),
                Ok(inline(&wav_bytes(8000, 800), None)),
            ],
            HashMap::new(),
        );
        let mut req = request(dir.path(), "One. Two.");
        req.max_chars = MaxChars::Disabled;
        req.output_name = Some("voice.mp3".to_string());

        let err = run(&req, Backend::Api(&api), &ProgressBar::hidden()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Output extension .mp3 does not match chunk audio format .wav."
        );
        assert!(!dir.path().join("audio").join("demo").join("voice.mp3").exists());
    }

    #[test]
    fn test_rescale_measured_divides_by_rate() {
        let measured = Some(MeasuredDurations {
            values: vec![0.5, 1.0],
            mode: TimingMode::SentenceAudioMixed,
        });

        let faster = rescale_measured(measured.clone(), 2.0).unwrap();
        assert_eq!(faster.values, vec![0.25, 0.5]);
        assert_eq!(faster.mode, TimingMode::SentenceAudioMixed);
        assert_eq!(rescale_measured(measured.clone(), 1.0), measured);
        assert_eq!(rescale_measured(None, 2.0), None);
    }

    #[tokio::test]
    async fn test_api_run_mixes_measured_and_unmeasured_chunks() {
        let dir = tempfile::tempdir().unwrap();
        // The second sentence is split in two; its last piece has no frames
        // and cannot be measured
        let api = QueuedApi::new(
            vec![
                Ok(inline(&wav_bytes(8000, 4000), Some("wav"))),
                Ok(inline(&wav_bytes(8000, 8000), Some("wav"))),
                Ok(inline(&wav_bytes(8000, 0), Some("wav"))),
            ],
            HashMap::new(),
        );
        let mut req = request(dir.path(), "甲。乙丙丁戊。");
        req.max_chars = MaxChars::Limit(6);

        let output = run(&req, Backend::Api(&api), &ProgressBar::hidden()).await.unwrap();

        assert_eq!(*api.requests.lock().unwrap(), vec!["甲。", "乙丙丁", "戊。"]);
        assert_eq!(output.timeline.mode, TimingMode::SentenceAudioMixed);
        assert_eq!(output.timeline.duration_seconds, 1.5);
        // Measured 0.5s vs 1.0s partial + 1.0s remaining, stretched onto 1.5s
        assert_eq!(entry_ms(&output), vec![(0, 300), (300, 1500)]);
    }

    #[tokio::test]
    async fn test_api_run_applies_speech_rate() {
        if find_tool("ffmpeg").is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let api = QueuedApi::new(
            vec![
                Ok(inline(&wav_bytes(8000, 4000), Some("wav"))),
                Ok(inline(&wav_bytes(8000, 12000), Some("wav"))),
            ],
            HashMap::new(),
        );
        let mut req = request(dir.path(), "第一句。第二句。");
        req.max_chars = MaxChars::Limit(600);
        req.speech_rate = Some(2.0);

        let output = run(&req, Backend::Api(&api), &ProgressBar::hidden()).await.unwrap();

        assert_eq!(output.timeline.mode, TimingMode::SentenceAudio);
        let total = output.timeline.duration_seconds;
        assert!((total - 1.0).abs() < 0.05, "{}", total);
        let entries = entry_ms(&output);
        // 0.5s : 1.5s keeps its 1:3 split after the speed-up
        let split = entries[0].1 as f64 / entries[1].1 as f64;
        assert!((split - 0.25).abs() < 0.02, "{:?}", entries);
        assert_eq!(entries[0].1, entries[1].0);
    }
}
