//! Sentence segmentation and reading-weight estimation

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceError};

/// Punctuation that always ends a sentence
const SENTENCE_ENDINGS: &[char] = &['。', '！', '？', '!', '?', '；', ';'];

/// Comma-class punctuation that only adds a short pause
const PAUSE_MARKS: &[char] = &['，', ',', '、', ':', '：'];

/// Sentence-final punctuation as counted by the weight estimator
const TERMINAL_MARKS: &[char] = &['。', '.', '!', '！', '?', '？', ';', '；'];

/// Whether `ch` falls in the CJK Unified Ideographs block
pub fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

/// An ASCII period ends a sentence unless it sits inside a token like
/// `3.14` or `example.com`.
fn ends_sentence(ch: char, next: Option<char>) -> bool {
    if SENTENCE_ENDINGS.contains(&ch) {
        return true;
    }
    ch == '.' && !next.is_some_and(|n| n.is_ascii_alphanumeric())
}

/// Split text into sentences, line by line.
///
/// Lines without a terminator become one sentence each. Blank lines are
/// skipped, so all-whitespace input yields an empty vector.
pub fn split_sentences(raw_text: &str) -> Vec<String> {
    let mut sentences = Vec::new();

    for raw_line in raw_text.split('\n') {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            current.push(ch);
            if ends_sentence(ch, chars.peek().copied()) {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }

        let tail = current.trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }

    sentences
}

/// Sentences for a timeline, treating unterminated text as a single sentence.
///
/// # Errors
///
/// Returns [`VoiceError::NoContent`] when the text is blank.
pub fn extract_timeline_sentences(source_text: &str) -> Result<Vec<String>> {
    let mut sentences = split_sentences(source_text);
    if sentences.is_empty() {
        let stripped = source_text.trim();
        if !stripped.is_empty() {
            sentences.push(stripped.to_string());
        }
    }

    if sentences.is_empty() {
        return Err(VoiceError::NoContent("timeline generation"));
    }
    Ok(sentences)
}

/// Per-character reading costs used when no real audio duration is known.
///
/// These are empirical tuning values; they can be overridden from the
/// `[timing]` table of the user config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingWeights {
    /// ASCII letter or digit
    pub latin: f64,
    /// CJK ideograph
    pub cjk: f64,
    /// Comma-class punctuation
    pub pause: f64,
    /// Sentence-final punctuation
    pub terminal: f64,
    /// Anything else
    pub other: f64,
    /// Floor for a single sentence's weight
    pub min_weight: f64,
    /// Seconds per weight unit when the audio duration is unknown
    pub seconds_per_weight: f64,
    /// Floor for a synthesized total duration
    pub min_estimated_seconds: f64,
}

impl Default for TimingWeights {
    fn default() -> Self {
        Self {
            latin: 0.55,
            cjk: 1.0,
            pause: 0.25,
            terminal: 0.45,
            other: 0.65,
            min_weight: 1.0,
            seconds_per_weight: 0.26,
            min_estimated_seconds: 0.4,
        }
    }
}

impl TimingWeights {
    fn char_weight(&self, ch: char) -> f64 {
        if ch.is_ascii_alphanumeric() {
            self.latin
        } else if is_cjk(ch) {
            self.cjk
        } else if PAUSE_MARKS.contains(&ch) {
            self.pause
        } else if TERMINAL_MARKS.contains(&ch) {
            self.terminal
        } else {
            self.other
        }
    }

    /// Estimated reading weight of one sentence, never below `min_weight`
    pub fn sentence_weight(&self, sentence: &str) -> f64 {
        let total: f64 = sentence
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| self.char_weight(ch))
            .sum();
        total.max(self.min_weight)
    }

    /// Duration to assume when the audio length cannot be measured
    pub fn estimated_duration(&self, total_weight: f64) -> f64 {
        (total_weight * self.seconds_per_weight).max(self.min_estimated_seconds)
    }
}
