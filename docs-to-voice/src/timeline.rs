//! Sentence timeline reconstruction and sidecar output
//!
//! Timestamps come from real per-sentence audio durations when every (or
//! almost every) sentence was measured, and fall back to apportioning the
//! total duration by reading weight otherwise. The result always carries
//! the [`TimingMode`] that produced it.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::text::TimingWeights;

/// How the timestamps of a timeline were derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingMode {
    /// Every sentence duration was measured
    SentenceAudio,
    /// Some sentences measured, the rest apportioned by weight
    SentenceAudioMixed,
    /// Total duration measured, sentences apportioned by weight
    DurationWeighted,
    /// Nothing measured; duration derived from weights alone
    Estimated,
}

impl TimingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingMode::SentenceAudio => "sentence-audio",
            TimingMode::SentenceAudioMixed => "sentence-audio-mixed",
            TimingMode::DurationWeighted => "duration-weighted",
            TimingMode::Estimated => "estimated",
        }
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sentence's place in the audio
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    /// 1-based position
    pub index: usize,
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub start_ms: u64,
    pub end_ms: u64,
}

fn round_millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

fn round3(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

impl TimelineEntry {
    fn new(index: usize, text: &str, start: f64, end: f64) -> Self {
        Self {
            index,
            text: text.to_string(),
            start_seconds: round3(start),
            end_seconds: round3(end),
            start_ms: round_millis(start),
            end_ms: round_millis(end),
        }
    }
}

/// Ordered, contiguous sentence timestamps plus how they were derived
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub mode: TimingMode,
    /// Duration the last entry ends at
    pub duration_seconds: f64,
    pub entries: Vec<TimelineEntry>,
}

/// Per-sentence durations resolved from chunk measurements
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredDurations {
    pub values: Vec<f64>,
    pub mode: TimingMode,
}

/// Accumulates chunk durations onto the sentences they belong to.
///
/// A sentence is known only if every one of its chunks was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceDurations {
    values: Vec<f64>,
    known: Vec<bool>,
}

impl SentenceDurations {
    pub fn new(sentence_count: usize) -> Self {
        Self {
            values: vec![0.0; sentence_count],
            known: vec![true; sentence_count],
        }
    }

    /// Add one chunk's duration; `None` or a non-positive value marks the
    /// sentence as unmeasured.
    pub fn record(&mut self, sentence_index: usize, duration: Option<f64>) {
        let Some(value) = self.values.get_mut(sentence_index) else {
            log::warn!("Chunk refers to unknown sentence {}", sentence_index);
            return;
        };
        match duration.filter(|d| d.is_finite() && *d > 0.0) {
            Some(seconds) => *value += seconds,
            None => self.known[sentence_index] = false,
        }
    }

    pub fn has_unknown(&self) -> bool {
        self.known.iter().any(|known| !known)
    }

    /// Turn the accumulated measurements into sentence durations.
    ///
    /// With everything measured the raw values are used. Otherwise the part
    /// of `output_total` not covered by measured sentences is split across
    /// the unmeasured ones by reading weight. Returns `None` when neither is
    /// possible or no sentence was fully measured, leaving the timeline to
    /// weight-based modes.
    pub fn resolve(
        &self,
        sentences: &[String],
        output_total: Option<f64>,
        weights: &TimingWeights,
    ) -> Option<MeasuredDurations> {
        if !self.has_unknown() {
            let sum: f64 = self.values.iter().sum();
            return (sum > 0.0).then(|| MeasuredDurations {
                values: self.values.clone(),
                mode: TimingMode::SentenceAudio,
            });
        }
        if self.known.iter().all(|known| !known) {
            return None;
        }

        let known_total: f64 = self
            .values
            .iter()
            .zip(&self.known)
            .filter(|(_, known)| **known)
            .map(|(value, _)| value)
            .sum();
        let remaining = output_total
            .filter(|total| *total > known_total)
            .map(|total| total - known_total)?;

        let unknown: Vec<(usize, f64)> = self
            .known
            .iter()
            .enumerate()
            .filter(|(_, known)| !**known)
            .map(|(i, _)| {
                let weight = sentences.get(i).map_or(0.0, |s| weights.sentence_weight(s));
                (i, weight)
            })
            .collect();
        let unknown_weight: f64 = unknown.iter().map(|(_, w)| w).sum();
        if unknown_weight <= 0.0 {
            return None;
        }

        let mut values = self.values.clone();
        for (index, weight) in unknown {
            values[index] += remaining * (weight / unknown_weight);
        }
        Some(MeasuredDurations {
            values,
            mode: TimingMode::SentenceAudioMixed,
        })
    }
}

/// Assign cumulative start/end times; the last entry ends at `duration`.
fn lay_out(sentences: &[String], spans: &[f64], duration: f64) -> Vec<TimelineEntry> {
    let last = sentences.len().saturating_sub(1);
    let mut cursor: f64 = 0.0;
    let mut entries = Vec::with_capacity(sentences.len());

    for (i, (sentence, span)) in sentences.iter().zip(spans).enumerate() {
        let end = if i == last { duration } else { cursor + span };
        let end = end.max(cursor);
        entries.push(TimelineEntry::new(i + 1, sentence, cursor, end));
        cursor = end;
    }

    if let Some(entry) = entries.last_mut() {
        entry.end_seconds = round3(duration);
        entry.end_ms = round_millis(duration);
    }
    entries
}

/// Build the timeline for `sentences`.
///
/// `total` is the measured duration of the final audio, if any. Measured
/// sentence durations are only used when there is one per sentence and they
/// sum to something positive; they are then stretched to fill `total`.
pub fn build_timeline(
    sentences: &[String],
    measured: Option<&MeasuredDurations>,
    total: Option<f64>,
    weights: &TimingWeights,
) -> Timeline {
    let total = total.filter(|t| t.is_finite() && *t > 0.0);

    if let Some(measured) = measured.filter(|m| m.values.len() == sentences.len()) {
        let values: Vec<f64> = measured.values.iter().map(|v| v.max(0.0)).collect();
        let sum: f64 = values.iter().sum();
        if sum > 0.0 {
            let duration = total.unwrap_or(sum);
            let scale = duration / sum;
            let spans: Vec<f64> = values.iter().map(|v| v * scale).collect();
            return Timeline {
                mode: measured.mode,
                duration_seconds: duration,
                entries: lay_out(sentences, &spans, duration),
            };
        }
    }

    let sentence_weights: Vec<f64> = sentences.iter().map(|s| weights.sentence_weight(s)).collect();
    let mut total_weight: f64 = sentence_weights.iter().sum();
    if total_weight <= 0.0 {
        total_weight = sentences.len() as f64;
    }

    let (mode, duration) = match total {
        Some(total) => (TimingMode::DurationWeighted, total),
        None => (TimingMode::Estimated, weights.estimated_duration(total_weight)),
    };
    let spans: Vec<f64> = sentence_weights
        .iter()
        .map(|w| duration * (w / total_weight))
        .collect();

    Timeline {
        mode,
        duration_seconds: duration,
        entries: lay_out(sentences, &spans, duration),
    }
}

/// `HH:MM:SS,mmm` subtitle timestamp
pub fn srt_time(seconds: f64) -> String {
    let total_ms = round_millis(seconds);
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Subtitle document with one block per entry
pub fn render_srt(entries: &[TimelineEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() * 4);
    for entry in entries {
        lines.push(entry.index.to_string());
        lines.push(format!(
            "{} --> {}",
            srt_time(entry.start_seconds),
            srt_time(entry.end_seconds)
        ));
        lines.push(entry.text.clone());
        lines.push(String::new());
    }
    format!("{}\n", lines.join("\n").trim())
}

#[derive(Serialize)]
struct TimelineDocument<'a> {
    audio_file: String,
    audio_path: String,
    audio_duration_seconds: f64,
    timing_mode: TimingMode,
    generated_at: String,
    sentences: &'a [TimelineEntry],
}

/// Sidecar files written next to the audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePaths {
    pub json: PathBuf,
    pub srt: PathBuf,
}

/// `<dir>/<stem><suffix>` for an audio file
fn sidecar_path(audio_path: &Path, suffix: &str) -> PathBuf {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    audio_path.with_file_name(format!("{}{}", stem, suffix))
}

/// Write `<stem>.timeline.json` and `<stem>.srt` beside `audio_path`
pub fn write_timeline_files(audio_path: &Path, timeline: &Timeline) -> Result<TimelinePaths> {
    let paths = TimelinePaths {
        json: sidecar_path(audio_path, ".timeline.json"),
        srt: sidecar_path(audio_path, ".srt"),
    };

    let document = TimelineDocument {
        audio_file: audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        audio_path: audio_path.display().to_string(),
        audio_duration_seconds: round3(timeline.duration_seconds),
        timing_mode: timeline.mode,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        sentences: &timeline.entries,
    };

    let mut json = serde_json::to_string_pretty(&document)?;
    json.push('\n');
    fs::write(&paths.json, json)?;
    fs::write(&paths.srt, render_srt(&timeline.entries))?;

    log::debug!(
        "Wrote {} timeline entries ({}) to {}",
        timeline.entries.len(),
        timeline.mode,
        paths.json.display()
    );
    Ok(paths)
}
