//! Budgeted text chunking
//!
//! Both backends share one splitting algorithm; what differs is how many
//! budget units a character costs, supplied through [`UnitCounter`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, VoiceError};
use crate::text::{extract_timeline_sentences, is_cjk};

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());

/// Characters after which the whole-text chunker may cut
const CHUNK_BOUNDARIES: &[char] = &['。', '！', '？', '!', '?', '；', ';', '.'];

/// Cost model for a backend's length limit
pub trait UnitCounter {
    /// Units charged for one character (values below 1 count as 1)
    fn char_units(&self, ch: char) -> usize;

    /// Units charged for a whole string
    fn count(&self, text: &str) -> usize {
        text.chars().map(|ch| self.char_units(ch).max(1)).sum()
    }
}

/// One unit per character, used for the local engine
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCount;

impl UnitCounter for CharCount {
    fn char_units(&self, _ch: char) -> usize {
        1
    }
}

/// CJK ideographs cost two units, everything else one; matches how the
/// remote API measures input length.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedCount;

impl UnitCounter for WeightedCount {
    fn char_units(&self, ch: char) -> usize {
        if is_cjk(ch) { 2 } else { 1 }
    }
}

/// One synthesis request, tagged with the 0-based sentence it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestItem {
    pub sentence_index: usize,
    pub text: String,
}

/// Hard-split `raw_text` so that no piece exceeds `max_units`.
///
/// Pieces are trimmed and empty pieces dropped.
pub fn split_oversized_text(
    raw_text: &str,
    max_units: usize,
    counter: &dyn UnitCounter,
) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_units = 0;

    let mut flush = |current: &mut String| {
        let piece = current.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        current.clear();
    };

    for ch in raw_text.chars() {
        let units = counter.char_units(ch).max(1);
        if !current.is_empty() && current_units + units > max_units {
            flush(&mut current);
            current_units = 0;
        }
        current.push(ch);
        current_units += units;
    }

    if !current.is_empty() {
        flush(&mut current);
    }

    pieces
}

/// Build one request per sentence, hard-splitting any sentence over budget.
///
/// Returns the sentences alongside the request items so that per-sentence
/// durations can be accumulated from chunk results.
pub fn split_into_sentence_requests(
    source_text: &str,
    max_units: Option<usize>,
    counter: &dyn UnitCounter,
) -> Result<(Vec<String>, Vec<RequestItem>)> {
    let sentences = extract_timeline_sentences(source_text)?;
    let mut items = Vec::new();

    for (sentence_index, sentence) in sentences.iter().enumerate() {
        let mut parts = match max_units {
            Some(max) if counter.count(sentence) > max => {
                split_oversized_text(sentence, max, counter)
            }
            _ => vec![sentence.clone()],
        };
        if parts.is_empty() {
            parts.push(sentence.clone());
        }

        items.extend(parts.into_iter().map(|text| RequestItem {
            sentence_index,
            text,
        }));
    }

    Ok((sentences, items))
}

/// Split at sentence boundaries, keeping the terminator with its sentence
fn split_after_boundaries(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in paragraph.chars() {
        current.push(ch);
        if CHUNK_BOUNDARIES.contains(&ch) {
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
    sentences
}

/// Split a whole document into as few chunks as the budget allows.
///
/// Works paragraph by paragraph, merging neighbouring sentences while they
/// fit and hard-splitting any single sentence that does not.
pub fn split_text_for_tts(
    source_text: &str,
    max_units: Option<usize>,
    counter: &dyn UnitCounter,
) -> Vec<String> {
    let normalized = source_text.replace("\r\n", "\n").replace('\r', "\n");
    let text = normalized.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let max = match max_units {
        Some(max) if counter.count(text) > max => max,
        _ => return vec![text.to_string()],
    };

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in PARAGRAPH_BREAK.split(text).map(str::trim).filter(|p| !p.is_empty()) {
        let mut sentences = split_after_boundaries(paragraph);
        if sentences.is_empty() {
            sentences.push(paragraph.to_string());
        }

        for sentence in sentences {
            if counter.count(&sentence) > max {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current.clear();
                }
                chunks.extend(split_oversized_text(&sentence, max, counter));
                continue;
            }

            if current.is_empty() {
                current = sentence;
                continue;
            }

            let candidate = format!("{} {}", current, sentence);
            if counter.count(&candidate) <= max {
                current = candidate;
            } else {
                chunks.push(current.trim().to_string());
                current = sentence;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Fail with a "no content" error when chunking produced nothing
pub fn require_chunks<T>(chunks: Vec<T>) -> Result<Vec<T>> {
    if chunks.is_empty() {
        return Err(VoiceError::NoContent("conversion"));
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_count_cjk_as_two_units() {
        assert_eq!(WeightedCount.count("AB測試!"), 7);
        assert_eq!(WeightedCount.count("測"), 2);
        assert_eq!(WeightedCount.count("a"), 1);
    }

    #[test]
    fn test_char_count_is_identity() {
        assert_eq!(CharCount.count("AB測試!"), 5);
    }

    #[test]
    fn test_split_text_respects_weighted_units() {
        let text = "測".repeat(301);
        let chunks = split_text_for_tts(&text, Some(600), &WeightedCount);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "測".repeat(300));
        assert_eq!(chunks[1], "測");
    }

    #[test]
    fn test_split_text_without_budget_is_single_chunk() {
        let chunks = split_text_for_tts("  One. Two.  ", None, &CharCount);
        assert_eq!(chunks, vec!["One. Two."]);
    }

    #[test]
    fn test_split_text_merges_sentences_that_fit() {
        let text = "Aa. Bb. Cc.\n\nDd.";
        let chunks = split_text_for_tts(text, Some(8), &CharCount);
        assert_eq!(chunks, vec!["Aa. Bb.", "Cc. Dd."]);
        for chunk in &chunks {
            assert!(CharCount.count(chunk) <= 8);
        }
    }

    #[test]
    fn test_split_text_blank_input() {
        assert!(split_text_for_tts(" \r\n ", Some(10), &CharCount).is_empty());
    }

    #[test]
    fn test_one_request_per_sentence_by_default() {
        let (sentences, items) =
            split_into_sentence_requests("第一句。第二句！第三句？", None, &WeightedCount).unwrap();
        assert_eq!(sentences, vec!["第一句。", "第二句！", "第三句？"]);
        let indexes: Vec<usize> = items.iter().map(|i| i.sentence_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        let texts: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, sentences);
    }

    #[test]
    fn test_oversized_sentence_keeps_sentence_index() {
        let text = "測".repeat(301);
        let (sentences, items) =
            split_into_sentence_requests(&text, Some(600), &WeightedCount).unwrap();
        assert_eq!(sentences, vec![text.clone()]);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.sentence_index == 0));
        assert_eq!(items[0].text, "測".repeat(300));
        assert_eq!(items[1].text, "測");
    }

    #[test]
    fn test_pieces_reconstruct_sentence_within_budget() {
        let source = "Alpha beta gamma delta epsilon zeta eta theta; 一二三四五六七八九十。";
        for budget in [3, 5, 7, 11] {
            let (sentences, items) =
                split_into_sentence_requests(source, Some(budget), &WeightedCount).unwrap();
            for (index, sentence) in sentences.iter().enumerate() {
                let pieces: Vec<&RequestItem> =
                    items.iter().filter(|i| i.sentence_index == index).collect();
                for piece in &pieces {
                    assert!(WeightedCount.count(&piece.text) <= budget);
                }
                let rebuilt: String = pieces.iter().map(|p| p.text.as_str()).collect();
                let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
                assert_eq!(squash(&rebuilt), squash(sentence));
            }
        }
    }

    #[test]
    fn test_empty_text_is_an_error() {
        let result = split_into_sentence_requests("   \n", Some(600), &WeightedCount);
        assert!(matches!(result, Err(VoiceError::NoContent(_))));
    }

    #[test]
    fn test_require_chunks() {
        assert!(require_chunks(Vec::<String>::new()).is_err());
        assert_eq!(require_chunks(vec![1]).unwrap(), vec![1]);
    }
}
