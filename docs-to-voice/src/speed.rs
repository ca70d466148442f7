//! Global speed change for the final audio and its timeline

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::error::{Result, VoiceError};
use crate::process::{require_tool, run_tool};

/// ffmpeg's atempo stage only accepts factors in this range
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Rates this close to 1.0 leave audio and timings untouched
pub fn is_unit_rate(rate: f64) -> bool {
    (rate - 1.0).abs() < 1e-9
}

/// Decompose `rate` into in-range stage factors whose product is `rate`
pub fn atempo_factors(rate: f64) -> Vec<f64> {
    let mut factors = Vec::new();
    let mut remaining = rate;

    while remaining < ATEMPO_MIN {
        factors.push(ATEMPO_MIN);
        remaining /= ATEMPO_MIN;
    }
    while remaining > ATEMPO_MAX {
        factors.push(ATEMPO_MAX);
        remaining /= ATEMPO_MAX;
    }
    factors.push(remaining);
    factors
}

/// Up to six decimals, trailing zeros trimmed, always with a decimal point
fn format_factor(factor: f64) -> String {
    let text = format!("{:.6}", factor);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.contains('.') {
        trimmed.to_string()
    } else {
        format!("{}.0", trimmed)
    }
}

/// ffmpeg `-filter:a` value, e.g. `atempo=2.0,atempo=1.5` for 3x
pub fn build_atempo_filter_chain(rate: f64) -> String {
    atempo_factors(rate)
        .into_iter()
        .map(|factor| format!("atempo={}", format_factor(factor)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Sentence durations after playback is sped up by `rate`
pub fn scale_sentence_durations(durations: &[f64], rate: f64) -> Vec<f64> {
    if is_unit_rate(rate) {
        return durations.to_vec();
    }
    durations.iter().map(|value| value.max(0.0) / rate).collect()
}

/// Re-render `audio_path` at `rate` times its speed, replacing it in place
pub async fn apply_speech_rate(audio_path: &Path, rate: f64) -> Result<()> {
    if is_unit_rate(rate) {
        return Ok(());
    }

    let ffmpeg = require_tool("ffmpeg", "--speech-rate requires ffmpeg to be installed.")?;

    let dir = match audio_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let suffix = audio_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix("docs-to-voice-rate-")
        .suffix(&suffix)
        .tempfile_in(dir)?;

    let filter = build_atempo_filter_chain(rate);
    log::debug!("Applying speech rate {} with filter {}", rate, filter);

    let args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        audio_path.into(),
        "-filter:a".into(),
        filter.into(),
        staged.path().into(),
    ];
    run_tool("ffmpeg", ffmpeg.as_os_str(), &args, None, FFMPEG_TIMEOUT).await?;

    replace_with_rendered(staged, audio_path)
}

/// Move the re-rendered file over the original; an empty render leaves it alone
fn replace_with_rendered(staged: NamedTempFile, audio_path: &Path) -> Result<()> {
    if fs::metadata(staged.path())?.len() == 0 {
        return Err(VoiceError::ToolFailed {
            tool: "ffmpeg",
            detail: "Failed to apply --speech-rate to output audio.".to_string(),
        });
    }

    staged
        .persist(audio_path)
        .map_err(|e| VoiceError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::write_test_wav;
    use crate::audio::wav_duration;
    use crate::process::find_tool;

    #[test]
    fn test_filter_chain_within_range() {
        assert_eq!(build_atempo_filter_chain(1.25), "atempo=1.25");
        assert_eq!(build_atempo_filter_chain(0.5), "atempo=0.5");
        assert_eq!(build_atempo_filter_chain(2.0), "atempo=2.0");
    }

    #[test]
    fn test_filter_chain_above_range() {
        assert_eq!(build_atempo_filter_chain(4.0), "atempo=2.0,atempo=2.0");
        assert_eq!(build_atempo_filter_chain(3.0), "atempo=2.0,atempo=1.5");
    }

    #[test]
    fn test_filter_chain_below_range() {
        assert_eq!(build_atempo_filter_chain(0.25), "atempo=0.5,atempo=0.5");
    }

    #[test]
    fn test_factors_compose_to_rate() {
        for rate in [0.1, 0.3, 0.75, 1.0, 2.5, 7.0, 12.3] {
            let factors = atempo_factors(rate);
            assert!(factors.iter().all(|f| (ATEMPO_MIN..=ATEMPO_MAX).contains(f)));
            let product: f64 = factors.iter().product();
            assert!((product - rate).abs() < 1e-9, "{} != {}", product, rate);
        }
    }

    #[test]
    fn test_format_factor() {
        assert_eq!(format_factor(1.0), "1.0");
        assert_eq!(format_factor(1.3333333), "1.333333");
        assert_eq!(format_factor(0.75), "0.75");
    }

    #[test]
    fn test_scale_sentence_durations() {
        assert_eq!(scale_sentence_durations(&[1.2, 0.8], 2.0), vec![0.6, 0.4]);
        assert_eq!(scale_sentence_durations(&[1.2, 0.8], 1.0), vec![1.2, 0.8]);
        assert_eq!(scale_sentence_durations(&[-1.0, 1.0], 0.5), vec![0.0, 2.0]);
        assert!(scale_sentence_durations(&[], 2.0).is_empty());
    }

    #[tokio::test]
    async fn test_unit_rate_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.mp3");
        fs::write(&path, b"audio").unwrap();
        apply_speech_rate(&path, 1.0).await.unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"audio");
    }

    #[test]
    fn test_empty_render_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        fs::write(&path, b"original").unwrap();
        let staged = tempfile::NamedTempFile::new_in(dir.path()).unwrap();

        let err = replace_with_rendered(staged, &path).unwrap_err();
        assert!(err.to_string().contains("--speech-rate"));
        assert_eq!(fs::read(&path).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_render_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        fs::write(&path, b"original").unwrap();
        let staged = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        fs::write(staged.path(), b"faster").unwrap();

        replace_with_rendered(staged, &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"faster");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_double_rate_halves_duration() {
        if find_tool("ffmpeg").is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        write_test_wav(&path, 16000, 1, 16000);

        apply_speech_rate(&path, 2.0).await.unwrap();

        let seconds = wav_duration(&path).unwrap();
        assert!((seconds - 0.5).abs() < 0.05, "{}", seconds);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("docs-to-voice-rate-"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
