//! Audio duration measurement
//!
//! WAV and AIFF headers are read in-process; other formats go through
//! `ffprobe`, then macOS `afinfo`.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use crate::aiff::aiff_duration;
use crate::process::{find_tool, run_tool};

/// Probing a file should be quick; anything longer counts as unknown
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

static AFINFO_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"estimated duration:\s*([0-9.]+)\s*sec",
        r"duration:\s*([0-9.]+)\s*sec",
        r"duration:\s*([0-9.]+)",
    ]
    .iter()
    .map(|p| RegexBuilder::new(p).case_insensitive(true).build().unwrap())
    .collect()
});

fn positive(seconds: f64) -> Option<f64> {
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

/// Whether the path has a `.wav` extension (any case)
pub fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

/// Whether the path has an `.aiff`, `.aif` or `.aifc` extension (any case)
pub fn is_aiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ["aiff", "aif", "aifc"].iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Duration from the WAV header: frames / sample rate
pub fn wav_duration(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }
    positive(reader.duration() as f64 / sample_rate as f64)
}

/// Parse `ffprobe -of json -show_entries format=duration` output
fn parse_ffprobe_duration(stdout: &[u8]) -> Option<f64> {
    let json: serde_json::Value = serde_json::from_slice(stdout).ok()?;
    let raw = json["format"]["duration"].as_str()?;
    positive(raw.trim().parse().ok()?)
}

/// Parse the duration line of macOS `afinfo` output
fn parse_afinfo_duration(output: &str) -> Option<f64> {
    AFINFO_PATTERNS.iter().find_map(|pattern| {
        let captures = pattern.captures(output)?;
        positive(captures[1].parse().ok()?)
    })
}

async fn ffprobe_duration(path: &Path) -> Option<f64> {
    let ffprobe = find_tool("ffprobe")?;
    let args = [
        OsStr::new("-v"),
        OsStr::new("error"),
        OsStr::new("-print_format"),
        OsStr::new("json"),
        OsStr::new("-show_entries"),
        OsStr::new("format=duration"),
        path.as_os_str(),
    ];
    let output = run_tool("ffprobe", ffprobe.as_os_str(), args, None, PROBE_TIMEOUT)
        .await
        .ok()?;
    parse_ffprobe_duration(&output.stdout)
}

async fn afinfo_duration(path: &Path) -> Option<f64> {
    let afinfo = find_tool("afinfo")?;
    let output = run_tool("afinfo", afinfo.as_os_str(), [path.as_os_str()], None, PROBE_TIMEOUT)
        .await
        .ok()?;
    let payload = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_afinfo_duration(&payload)
}

/// Playback duration of an audio file in seconds, or `None` when no reader
/// can measure it. Zero-length results also count as unknown.
pub async fn read_duration_seconds(path: &Path) -> Option<f64> {
    if is_wav(path) {
        if let Some(seconds) = wav_duration(path) {
            return Some(seconds);
        }
    } else if is_aiff(path) {
        if let Some(seconds) = aiff_duration(path) {
            return Some(seconds);
        }
    }

    if let Some(seconds) = ffprobe_duration(path).await {
        return Some(seconds);
    }

    let seconds = afinfo_duration(path).await;
    if seconds.is_none() {
        log::debug!("Could not measure duration of {}", path.display());
    }
    seconds
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Write a 16-bit PCM WAV of `frames` frames
    pub(crate) fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample(((i % 200) as i16) * 100).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_wav_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 2, 12000);
        assert_eq!(wav_duration(&path), Some(1.5));
    }

    #[test]
    fn test_empty_wav_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_test_wav(&path, 8000, 1, 0);
        assert_eq!(wav_duration(&path), None);
    }

    #[tokio::test]
    async fn test_read_duration_of_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.WAV");
        write_test_wav(&path, 16000, 1, 8000);
        assert_eq!(read_duration_seconds(&path).await, Some(0.5));
    }

    #[tokio::test]
    async fn test_read_duration_of_aiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.aif");
        crate::aiff::tests::write_test_aiff(&path, 8000, 2, 6000);
        assert!(is_aiff(&path));
        assert!(!is_aiff(Path::new("voice.wav")));
        assert_eq!(read_duration_seconds(&path).await, Some(0.75));
    }

    #[tokio::test]
    async fn test_missing_file_is_unknown() {
        let path = PathBuf::from("/nonexistent/dir/voice.wav");
        assert_eq!(read_duration_seconds(&path).await, None);
    }

    #[test]
    fn test_parse_ffprobe_duration() {
        let stdout = br#"{"format": {"duration": "12.345000"}}"#;
        assert_eq!(parse_ffprobe_duration(stdout), Some(12.345));
        assert_eq!(parse_ffprobe_duration(br#"{"format": {}}"#), None);
        assert_eq!(parse_ffprobe_duration(b"not json"), None);
    }

    #[test]
    fn test_parse_afinfo_duration() {
        let output = "File:           voice.aiff\n\
                      File type ID:   AIFF\n\
                      estimated duration: 3.250000 sec\n";
        assert_eq!(parse_afinfo_duration(output), Some(3.25));
        assert_eq!(parse_afinfo_duration("duration: 2.5"), Some(2.5));
        assert_eq!(parse_afinfo_duration("no timing here"), None);
    }
}
