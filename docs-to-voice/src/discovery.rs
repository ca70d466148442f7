//! Backend input-limit discovery
//!
//! The remote API does not document a fixed request size, so the limit is
//! learned at runtime. Sources are tried in [`DISCOVERY_ORDER`]; the first
//! one that yields a number wins. When none does, chunking stays disabled.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::tts::SpeechApi;

/// Catalog page size used while looking for the active model
pub const CATALOG_PAGE_SIZE: u32 = 100;

/// Length of the deliberately oversized probe request
pub const PROBE_LENGTH: usize = 5000;

static LIMIT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"range of input length should be \[\s*\d+\s*,\s*([\d,]+)\s*\]",
        concat!(
            r"max(?:imum)?\s*(?:input\s*)?(?:text\s*)?(?:length|characters?|chars?)",
            r"\s*(?:is|:|=)\s*([\d,]+)",
        ),
        concat!(
            r"(?:cannot exceed|must be less than or equal to|must be <=?|up to)",
            r"\s*([\d,]+)\s*(?:characters?|chars?)",
        ),
        r"(?:不超過|不能超過|上限為|上限为)\s*([\d,]+)\s*(?:個?字元|個?字符|字元|字符)",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap()
    })
    .collect()
});

/// Field names that may carry a model's input limit
const LIMIT_FIELDS: &[&str] = &[
    "max_input_chars",
    "max_input_characters",
    "max_input_length",
    "max_text_length",
];

/// Where an input limit can be learned from, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSource {
    /// Declared limit in the model catalog entry
    Catalog,
    /// Error message of an intentionally oversized request
    Probe,
}

pub const DISCOVERY_ORDER: &[LimitSource] = &[LimitSource::Catalog, LimitSource::Probe];

impl LimitSource {
    async fn discover(self, api: &dyn SpeechApi) -> Option<usize> {
        match self {
            LimitSource::Catalog => fetch_model_max_chars(api).await,
            LimitSource::Probe => probe_max_chars(api).await,
        }
    }
}

/// Parse a strictly positive integer from a JSON number or digit string
/// (thousands separators allowed). Booleans and other types are rejected.
pub fn parse_positive_int(raw: &Value) -> Option<usize> {
    match raw {
        Value::Number(n) => {
            let value = n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 1.0).map(|f| f as u64))?;
            (value > 0).then_some(value as usize)
        }
        Value::String(s) => {
            let digits = s.trim().replace(',', "");
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            digits.parse::<usize>().ok().filter(|v| *v > 0)
        }
        _ => None,
    }
}

/// Find a stated character limit in free text such as an error message
pub fn extract_max_chars_from_text(raw_text: &str) -> Option<usize> {
    if raw_text.is_empty() {
        return None;
    }
    LIMIT_PATTERNS.iter().find_map(|pattern| {
        let captures = pattern.captures(raw_text)?;
        parse_positive_int(&Value::String(captures[1].to_string()))
    })
}

/// Input limit declared on one catalog entry
pub fn extract_model_entry_max_chars(entry: &Value) -> Option<usize> {
    let field = |container: &Value, name: &str| container.get(name).and_then(parse_positive_int);

    let null = Value::Null;
    let model_info = entry.get("model_info").unwrap_or(&null);
    let inference = entry.get("inference_metadata").unwrap_or(&null);

    LIMIT_FIELDS
        .iter()
        .find_map(|name| field(entry, name))
        .or_else(|| LIMIT_FIELDS.iter().find_map(|name| field(model_info, name)))
        .or_else(|| field(model_info, "max_input_tokens"))
        .or_else(|| field(inference, "max_input_chars"))
        .or_else(|| field(inference, "max_input_length"))
        .or_else(|| {
            entry
                .get("description")
                .and_then(Value::as_str)
                .and_then(extract_max_chars_from_text)
        })
}

/// Walk the model catalog until the active model is found
pub async fn fetch_model_max_chars(api: &dyn SpeechApi) -> Option<usize> {
    let mut page_no = 1;
    loop {
        let page = match api.models_page(page_no, CATALOG_PAGE_SIZE).await {
            Ok(page) => page,
            Err(e) => {
                log::debug!("Model catalog lookup failed: {}", e);
                return None;
            }
        };

        let target = page.models.iter().find(|entry| {
            entry.get("model").and_then(Value::as_str).map(str::trim) == Some(api.model())
        });
        if let Some(entry) = target {
            return extract_model_entry_max_chars(entry);
        }

        let total = page.total.as_ref().and_then(parse_positive_int).unwrap_or(0);
        if total == 0 || (page_no * CATALOG_PAGE_SIZE) as usize >= total {
            log::debug!("Model '{}' not found in catalog", api.model());
            return None;
        }
        page_no += 1;
    }
}

/// Send an oversized request and read the limit from its rejection
pub async fn probe_max_chars(api: &dyn SpeechApi) -> Option<usize> {
    let probe_text = "測".repeat(PROBE_LENGTH);
    match api.synthesize(&probe_text).await {
        Ok(_) => None,
        Err(e) => {
            log::debug!("Probe request rejected: {}", e);
            extract_max_chars_from_text(&e.to_string())
        }
    }
}

/// Learn the backend's input limit, or `None` if no source reveals it
pub async fn discover_max_chars(api: &dyn SpeechApi) -> Option<usize> {
    for source in DISCOVERY_ORDER {
        if let Some(limit) = source.discover(api).await {
            log::info!("Discovered API input limit {} via {:?}", limit, source);
            return Some(limit);
        }
    }
    log::warn!("Could not discover API input limit; chunking disabled");
    None
}
