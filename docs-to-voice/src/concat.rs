//! Format-preserving audio concatenation
//!
//! Strategies are picked from a small table keyed by output extension and
//! tried in order. The in-process WAV and AIFF merges copy sample data
//! verbatim and refuse chunks whose format differs from the first; ffmpeg
//! stream-copy is the universal fallback. Output is staged in a temporary file next to the
//! destination and renamed into place only on success.

use std::ffi::OsString;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::aiff::{merge_aiff_parts, write_aiff};
use crate::error::{Result, VoiceError};
use crate::process::{require_tool, run_tool};

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One way of merging chunk files into a single stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    /// Append raw WAV frames after checking every chunk's format
    Wav,
    /// Append raw AIFF / AIFF-C sound data after checking every chunk's format
    Aiff,
    /// `ffmpeg -f concat` with a list file
    Ffmpeg,
}

/// Strategies to attempt for an output extension, in order
pub fn strategies_for(extension: &str) -> &'static [ConcatStrategy] {
    match extension.to_lowercase().as_str() {
        "wav" => &[ConcatStrategy::Wav, ConcatStrategy::Ffmpeg],
        "aiff" | "aif" | "aifc" => &[ConcatStrategy::Aiff, ConcatStrategy::Ffmpeg],
        _ => &[ConcatStrategy::Ffmpeg],
    }
}

fn output_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

/// Temporary file in the destination's directory, sharing its extension
fn staging_file(output_path: &Path) -> Result<NamedTempFile> {
    let dir = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let suffix = match output_extension(output_path) {
        ext if ext.is_empty() => String::new(),
        ext => format!(".{}", ext),
    };
    Ok(tempfile::Builder::new()
        .prefix(".docs-to-voice-")
        .suffix(&suffix)
        .tempfile_in(dir)?)
}

fn persist(staged: NamedTempFile, output_path: &Path) -> Result<()> {
    staged
        .persist(output_path)
        .map_err(|e| VoiceError::Io(e.error))?;
    Ok(())
}

/// Check that every chunk shares the first chunk's WAV format
fn verify_wav_specs(part_paths: &[PathBuf]) -> Result<hound::WavSpec> {
    let mut canonical: Option<hound::WavSpec> = None;

    for path in part_paths {
        let reader = hound::WavReader::open(path).map_err(|e| {
            VoiceError::ToolFailed {
                tool: "wav merge",
                detail: format!("{}: {}", path.display(), e),
            }
        })?;
        let spec = reader.spec();

        match canonical {
            None => canonical = Some(spec),
            Some(expected) if expected != spec => {
                return Err(VoiceError::AudioFormat(format!(
                    "Chunk WAV formats do not match; cannot concatenate \
                     ({} has {} ch/{} bit/{} Hz/{:?}, expected {} ch/{} bit/{} Hz/{:?}).",
                    path.display(),
                    spec.channels,
                    spec.bits_per_sample,
                    spec.sample_rate,
                    spec.sample_format,
                    expected.channels,
                    expected.bits_per_sample,
                    expected.sample_rate,
                    expected.sample_format,
                )));
            }
            Some(_) => {}
        }
    }

    canonical.ok_or_else(|| VoiceError::AudioFormat("No WAV chunks to concatenate.".to_string()))
}

fn wav_error(e: hound::Error) -> VoiceError {
    VoiceError::ToolFailed {
        tool: "wav merge",
        detail: e.to_string(),
    }
}

/// Append the sample data of every chunk into one WAV file
pub fn concat_wav_files(part_paths: &[PathBuf], output_path: &Path) -> Result<()> {
    let spec = verify_wav_specs(part_paths)?;

    let staged = staging_file(output_path)?;
    {
        let file = staged.reopen()?;
        let mut writer = hound::WavWriter::new(BufWriter::new(file), spec).map_err(wav_error)?;

        for path in part_paths {
            let mut reader = hound::WavReader::open(path).map_err(wav_error)?;
            match spec.sample_format {
                hound::SampleFormat::Int => {
                    for sample in reader.samples::<i32>() {
                        writer.write_sample(sample.map_err(wav_error)?).map_err(wav_error)?;
                    }
                }
                hound::SampleFormat::Float => {
                    for sample in reader.samples::<f32>() {
                        writer.write_sample(sample.map_err(wav_error)?).map_err(wav_error)?;
                    }
                }
            }
        }

        writer.finalize().map_err(wav_error)?;
    }

    persist(staged, output_path)
}

/// Append the sound data of every AIFF chunk into one file
pub fn concat_aiff_files(part_paths: &[PathBuf], output_path: &Path) -> Result<()> {
    let (template, frames, sound) = merge_aiff_parts(part_paths)?;

    let staged = staging_file(output_path)?;
    {
        let mut out = BufWriter::new(staged.reopen()?);
        write_aiff(&mut out, &template, frames, &sound)?;
        out.flush()?;
    }

    persist(staged, output_path)
}

/// Quote a path for an ffmpeg concat list
fn concat_list_entry(path: &Path) -> String {
    let escaped = path.display().to_string().replace('\'', "'\\''");
    format!("file '{}'\n", escaped)
}

/// Re-encode to the container's native PCM so the result stays uncompressed
fn codec_args(extension: &str) -> &'static [&'static str] {
    match extension {
        "wav" => &["-c:a", "pcm_s16le"],
        "aiff" | "aif" | "aifc" => &["-c:a", "pcm_s16be"],
        _ => &["-c", "copy"],
    }
}

/// List file naming every chunk in order, in ffmpeg concat demuxer syntax
fn write_concat_list(part_paths: &[PathBuf]) -> Result<NamedTempFile> {
    let mut list_file = tempfile::Builder::new()
        .prefix("docs-to-voice-concat-")
        .suffix(".txt")
        .tempfile()?;
    for path in part_paths {
        list_file.write_all(concat_list_entry(path).as_bytes())?;
    }
    list_file.flush()?;
    Ok(list_file)
}

fn ffmpeg_concat_args(list_path: &Path, extension: &str, staged_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(list_path.into());
    args.extend(codec_args(extension).iter().map(OsString::from));
    args.push(staged_path.into());
    args
}

/// Merge chunks with `ffmpeg -f concat`
pub async fn concat_with_ffmpeg(part_paths: &[PathBuf], output_path: &Path) -> Result<()> {
    let ffmpeg = require_tool(
        "ffmpeg",
        "ffmpeg is required for concatenating this audio format.",
    )?;

    let list_file = write_concat_list(part_paths)?;
    let staged = staging_file(output_path)?;
    let extension = output_extension(output_path);
    let args = ffmpeg_concat_args(list_file.path(), &extension, staged.path());

    run_tool("ffmpeg", ffmpeg.as_os_str(), &args, None, FFMPEG_TIMEOUT).await?;

    if fs::metadata(staged.path())?.len() == 0 {
        return Err(VoiceError::ToolFailed {
            tool: "ffmpeg",
            detail: "concatenation produced an empty file".to_string(),
        });
    }
    persist(staged, output_path)
}

/// Merge ordered chunk files into `output_path`.
///
/// A single chunk is copied as-is. Incompatible chunk formats abort
/// immediately; other failures move on to the next strategy.
pub async fn concat_audio_files(part_paths: &[PathBuf], output_path: &Path) -> Result<()> {
    let Some(first) = part_paths.first() else {
        return Err(VoiceError::Protocol(
            "No chunk audio generated for concatenation.".to_string(),
        ));
    };

    if part_paths.len() == 1 {
        let staged = staging_file(output_path)?;
        fs::copy(first, staged.path())?;
        return persist(staged, output_path);
    }

    let extension = output_extension(output_path);
    let mut last_error = None;

    for strategy in strategies_for(&extension) {
        let result = match strategy {
            ConcatStrategy::Wav => concat_wav_files(part_paths, output_path),
            ConcatStrategy::Aiff => concat_aiff_files(part_paths, output_path),
            ConcatStrategy::Ffmpeg => concat_with_ffmpeg(part_paths, output_path).await,
        };

        match result {
            Ok(()) => {
                log::debug!(
                    "Concatenated {} chunks into {} via {:?}",
                    part_paths.len(),
                    output_path.display(),
                    strategy
                );
                return Ok(());
            }
            Err(e) if e.is_fatal_mismatch() => return Err(e),
            Err(e) => {
                log::warn!("{:?} concatenation failed: {}", strategy, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        VoiceError::Protocol("No concatenation strategy available.".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::write_test_wav;
    use crate::aiff::read_aiff;
    use crate::aiff::tests::{aiff_bytes, write_test_aiff};
    use crate::audio::wav_duration;
    use crate::process::find_tool;

    fn staging_leftovers(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".docs-to-voice-"))
            .count()
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(
            strategies_for("WAV"),
            &[ConcatStrategy::Wav, ConcatStrategy::Ffmpeg]
        );
        assert_eq!(strategies_for("mp3"), &[ConcatStrategy::Ffmpeg]);
        assert_eq!(
            strategies_for("AIF"),
            &[ConcatStrategy::Aiff, ConcatStrategy::Ffmpeg]
        );
        assert_eq!(strategies_for("aifc")[0], ConcatStrategy::Aiff);
    }

    #[test]
    fn test_concat_list_entry_escapes_quotes() {
        assert_eq!(
            concat_list_entry(Path::new("/tmp/it's/part-0001.mp3")),
            "file '/tmp/it'\\''s/part-0001.mp3'\n"
        );
    }

    #[test]
    fn test_codec_args() {
        assert_eq!(codec_args("wav"), &["-c:a", "pcm_s16le"]);
        assert_eq!(codec_args("aif"), &["-c:a", "pcm_s16be"]);
        assert_eq!(codec_args("mp3"), &["-c", "copy"]);
    }

    #[test]
    fn test_concat_wav_appends_frames() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.wav");
        let second = dir.path().join("part-0002.wav");
        write_test_wav(&first, 8000, 1, 8000);
        write_test_wav(&second, 8000, 1, 4000);

        let output = dir.path().join("voice.wav");
        concat_wav_files(&[first.clone(), second.clone()], &output).unwrap();

        assert_eq!(wav_duration(&output), Some(1.5));

        let merged: Vec<i16> = hound::WavReader::open(&output)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        let mut expected: Vec<i16> = Vec::new();
        for path in [&first, &second] {
            expected.extend(
                hound::WavReader::open(path)
                    .unwrap()
                    .samples::<i16>()
                    .map(|s| s.unwrap()),
            );
        }
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_mismatched_wav_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.wav");
        let second = dir.path().join("part-0002.wav");
        write_test_wav(&first, 8000, 1, 800);
        write_test_wav(&second, 16000, 1, 800);

        let output = dir.path().join("voice.wav");
        let err = concat_audio_files(&[first, second], &output).await.unwrap_err();

        assert!(matches!(err, VoiceError::AudioFormat(_)));
        assert!(!output.exists());
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_concat_list_names_every_part() {
        let parts = vec![PathBuf::from("/a/part-0001.mp3"), PathBuf::from("/a/part-0002.mp3")];
        let list = write_concat_list(&parts).unwrap();
        assert_eq!(
            fs::read_to_string(list.path()).unwrap(),
            "file '/a/part-0001.mp3'\nfile '/a/part-0002.mp3'\n"
        );
    }

    #[test]
    fn test_ffmpeg_concat_args() {
        let args = ffmpeg_concat_args(Path::new("list.txt"), "mp3", Path::new("out.mp3"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input - 4..input], ["-f", "concat", "-safe", "0"]);
        assert_eq!(args[input + 1], "list.txt");
        assert_eq!(args[input + 2..], ["-c", "copy", "out.mp3"]);

        let args = ffmpeg_concat_args(Path::new("list.txt"), "wav", Path::new("out.wav"));
        assert!(args.iter().any(|a| a == "pcm_s16le"));
    }

    #[tokio::test]
    async fn test_concat_with_ffmpeg_merges_wav() {
        if find_tool("ffmpeg").is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.wav");
        let second = dir.path().join("part-0002.wav");
        write_test_wav(&first, 8000, 1, 8000);
        write_test_wav(&second, 8000, 1, 4000);

        let output = dir.path().join("voice.wav");
        concat_with_ffmpeg(&[first, second], &output).await.unwrap();

        let seconds = wav_duration(&output).unwrap();
        assert!((seconds - 1.5).abs() < 0.01, "{}", seconds);
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_concat_aiff_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.aiff");
        let second = dir.path().join("part-0002.aiff");
        write_test_aiff(&first, 8000, 1, 8000);
        write_test_aiff(&second, 8000, 1, 4000);

        let output = dir.path().join("voice.aiff");
        concat_audio_files(&[first.clone(), second.clone()], &output).await.unwrap();

        let merged = read_aiff(&output).unwrap();
        assert_eq!(merged.frames, 12000);
        assert_eq!(merged.duration_seconds(), Some(1.5));
        let mut expected = read_aiff(&first).unwrap().sound;
        expected.extend(read_aiff(&second).unwrap().sound);
        assert_eq!(merged.sound, expected);
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_concat_aifc_keeps_compression_type() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.aifc");
        let second = dir.path().join("part-0002.aifc");
        fs::write(&first, aiff_bytes(16000, 1, 1600, Some(b"sowt"))).unwrap();
        fs::write(&second, aiff_bytes(16000, 1, 800, Some(b"sowt"))).unwrap();

        let output = dir.path().join("voice.aifc");
        concat_aiff_files(&[first, second], &output).unwrap();

        let merged = read_aiff(&output).unwrap();
        assert_eq!(merged.format.compression, Some(*b"sowt"));
        assert_eq!(merged.frames, 2400);
    }

    #[tokio::test]
    async fn test_mismatched_aiff_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.aiff");
        let second = dir.path().join("part-0002.aiff");
        write_test_aiff(&first, 8000, 1, 800);
        write_test_aiff(&second, 22050, 1, 800);

        let output = dir.path().join("voice.aiff");
        let err = concat_audio_files(&[first, second], &output).await.unwrap_err();

        assert!(matches!(err, VoiceError::AudioFormat(_)));
        assert!(err.to_string().contains("Chunk AIFF formats do not match"));
        assert!(!output.exists());
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_compressed_aiff_is_not_merged_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("part-0001.aifc");
        let second = dir.path().join("part-0002.aifc");
        fs::write(&first, aiff_bytes(8000, 1, 80, Some(b"ima4"))).unwrap();
        fs::write(&second, aiff_bytes(8000, 1, 80, Some(b"ima4"))).unwrap();

        let output = dir.path().join("voice.aifc");
        let err = concat_aiff_files(&[first, second], &output).unwrap_err();
        assert!(!err.is_fatal_mismatch());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_single_chunk_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("part-0001.mp3");
        fs::write(&part, b"ID3fake-mp3-bytes").unwrap();

        let output = dir.path().join("voice.mp3");
        concat_audio_files(&[part], &output).await.unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"ID3fake-mp3-bytes");
    }

    #[tokio::test]
    async fn test_no_chunks_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("voice.wav");
        assert!(concat_audio_files(&[], &output).await.is_err());
        assert!(!output.exists());
    }
}
