//! Best-effort GIF request intent detection.
//!
//! Phrase heuristics in German and English. This is intentionally a
//! classifier of convenience, not a parser: false negatives fall through to
//! the normal generation path, which is harmless.

use once_cell::sync::Lazy;
use regex::Regex;

static TRIGGERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // "such mir ein gif von katzen raus", "suche ein gif mit hunden"
        r"(?i)\bsuch(?:e|st)?\b.*\bgif\b",
        // "schick mir ein gif von ...", "zeig mal ein gif ..."
        r"(?i)\b(?:schick|zeig|sende)\w*\b.*\bgif\b",
        // "a gif for mondays", "send a gif of a cat", "find me a gif"
        r"(?i)\b(?:a|an|the|send|find|show)\b.*\bgif\b",
        // "gif von katzen", "gif of cats"
        r"(?i)\bgif\s+(?:von|of|for|mit)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("gif intent regex"))
    .collect()
});

/// Words stripped from the matched text to leave a usable search query.
static FILLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(such(?:e|st)?|schick\w*|zeig\w*|sende|mir|mal|ein(?:e[nms]?)?|bitte|raus|send|find|show|me|a|an|the|gif|von|of|for|mit|und)\b",
    )
    .expect("gif filler regex")
});

/// Detect a GIF request and extract the search query.
///
/// Returns `None` when the text does not look like a GIF request or when
/// stripping the trigger words leaves no query at all.
pub fn detect_gif_query(text: &str) -> Option<String> {
    if !TRIGGERS.iter().any(|t| t.is_match(text)) {
        return None;
    }

    let stripped = FILLER.replace_all(text, " ");
    let query = stripped
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .collect::<Vec<_>>()
        .join(" ");
    let query = query.trim_matches(|c: char| !c.is_alphanumeric()).trim();

    if query.is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}
