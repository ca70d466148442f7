// Pause insertion for the macOS say engine

use once_cell::sync::Lazy;
use regex::Regex;

/// Embedded `[[...]]` speech commands are passed through untouched
static EMBEDDED_COMMAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[[\s\S]*?\]\]").unwrap());
static REPEATED_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Silence (ms) to insert after a punctuation mark, if any
fn pause_after(ch: char) -> Option<u32> {
    match ch {
        '，' | '、' | ',' | ':' | ';' | '：' | '；' => Some(120),
        '。' | '.' => Some(180),
        '？' | '?' => Some(190),
        '！' | '!' => Some(150),
        _ => None,
    }
}

fn apply_plaintext_rules(segment: &str) -> String {
    let mut output = String::with_capacity(segment.len() * 2);
    let mut chars = segment.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            let mut newlines = 1;
            while chars.next_if_eq(&'\n').is_some() {
                newlines += 1;
            }
            let pause = if newlines >= 2 { 260 } else { 90 };
            output.push_str(&format!("[[slnc {}]] ", pause));
            continue;
        }

        match pause_after(ch) {
            Some(pause) => output.push_str(&format!("{} [[slnc {}]] ", ch, pause)),
            None => output.push(ch),
        }
    }

    REPEATED_BLANKS.replace_all(&output, " ").into_owned()
}

/// Add punctuation-driven pauses to text destined for `say`
pub fn build_auto_prosody_text(raw_text: &str) -> String {
    let mut converted = String::with_capacity(raw_text.len() * 2);
    let mut last = 0;

    for command in EMBEDDED_COMMAND.find_iter(raw_text) {
        converted.push_str(&apply_plaintext_rules(&raw_text[last..command.start()]));
        converted.push_str(command.as_str());
        last = command.end();
    }
    converted.push_str(&apply_plaintext_rules(&raw_text[last..]));

    converted
}
