//! Poll extraction from raw provider output.
//!
//! Two accepted encodings, tried in order:
//! 1. an explicit `<POLL_JSON>…</POLL_JSON>` delimited JSON block
//! 2. a natural-language fallback: a markdown heading followed by numbered
//!    (`1.`) or lettered (`A)`) list items
//!
//! Anything invalid or out of bounds is rejected and the caller treats the
//! output as plain text; a malformed poll is never a hard failure.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use stamm_core::PollSpec;

/// Bounds on the number of poll options.
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 15;

static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<POLL_JSON>(.*?)</POLL_JSON>").expect("poll json block regex")
});

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*#{1,6}\s+(.+?)\s*$").expect("heading regex"));

static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d{1,2}[.)]|[A-Za-z][.)])\s+(.+?)\s*$").expect("list item regex")
});

#[derive(Deserialize)]
struct RawPoll {
    question: String,
    options: Vec<String>,
    #[serde(default, alias = "multiSelect")]
    multi_select: bool,
}

/// Extract a validated poll from provider text, if one is present.
pub fn parse_poll(text: &str) -> Option<PollSpec> {
    parse_json_block(text).or_else(|| parse_natural_language(text))
}

fn parse_json_block(text: &str) -> Option<PollSpec> {
    let captures = JSON_BLOCK.captures(text)?;
    let raw: RawPoll = serde_json::from_str(captures.get(1)?.as_str()).ok()?;
    validate(raw.question, raw.options, raw.multi_select)
}

fn parse_natural_language(text: &str) -> Option<PollSpec> {
    let heading = HEADING.captures(text)?;
    let question = heading.get(1)?.as_str().to_string();
    let after_heading = &text[heading.get(0)?.end()..];

    let mut options = Vec::new();
    for line in after_heading.lines() {
        if let Some(item) = LIST_ITEM.captures(line) {
            if let Some(option) = item.get(1) {
                options.push(option.as_str().to_string());
            }
        } else if !options.is_empty() && !line.trim().is_empty() {
            // The list ended; trailing prose does not belong to the poll.
            break;
        }
    }

    validate(question, options, false)
}

/// Bounds, distinctness, and non-emptiness checks shared by both decoders.
fn validate(question: String, options: Vec<String>, multi_select: bool) -> Option<PollSpec> {
    let question = question.trim().to_string();
    if question.is_empty() {
        return None;
    }

    let options: Vec<String> = options
        .into_iter()
        .map(|o| o.trim().to_string())
        .collect();
    if options.len() < MIN_OPTIONS || options.len() > MAX_OPTIONS {
        return None;
    }
    if options.iter().any(|o| o.is_empty()) {
        return None;
    }
    // Case-sensitive exact-match distinctness after trim.
    for (i, option) in options.iter().enumerate() {
        if options[..i].contains(option) {
            return None;
        }
    }

    Some(PollSpec {
        question,
        options,
        multi_select,
    })
}
