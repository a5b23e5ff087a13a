//! Tag normalization, the category taxonomy, and deterministic tone signals.
//!
//! Tags arrive as free-form strings from an LLM and from user behavior. All
//! comparison and storage goes through [`normalize_tag`] so that casing,
//! surrounding whitespace, and inner whitespace runs never cause spurious
//! mismatches between otherwise identical tags.
//!
//! The taxonomy is a fixed partition: a tag is assigned to **at most one**
//! category bucket, by keyword matching against a curated vocabulary. On
//! ties the highest-priority category wins (themes > humor > art > tone >
//! topics/objects). This exclusivity keeps downstream similarity math from
//! double-counting a tag.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::models::ScoredTag;

/// Message/image category buckets, in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagCategory {
    Themes,
    Humor,
    Art,
    Tone,
    /// `topics` for messages, `objects` for images.
    Topics,
}

impl TagCategory {
    /// All categories, highest priority first.
    pub const PRIORITY: [TagCategory; 5] = [
        TagCategory::Themes,
        TagCategory::Humor,
        TagCategory::Art,
        TagCategory::Tone,
        TagCategory::Topics,
    ];
}

/// Normalize a tag for comparison and storage.
///
/// Trim, Unicode-aware lowercase, collapse inner whitespace runs to a single
/// space. `"Frühstück  ÄÖÜß"` and `" frühstück äöüß "` produce the same key.
pub fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generic/meta words that describe the *interaction* rather than the
/// *content*. These must never appear as output tags.
static GENERIC_DENYLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "request", "command", "username", "user", "mention", "message", "chat", "conversation",
        "prompt", "reply", "bot", "anfrage", "befehl", "benutzername", "nutzer", "nachricht",
        "erwähnung", "unterhaltung", "antwort",
    ]
    .into_iter()
    .collect()
});

/// Returns true if the (already normalized) tag is a generic interaction
/// descriptor that should be filtered out.
pub fn is_generic_tag(normalized: &str) -> bool {
    GENERIC_DENYLIST.contains(normalized)
}

/// Curated keyword vocabulary per category.
///
/// Keywords are matched by containment against the normalized tag, and the
/// categories are checked in bucket priority order; the first category with
/// a matching keyword wins. `"katzenfoto"` therefore lands in Art via `foto`
/// before Topics ever sees `katze`.
static THEMES_KEYWORDS: &[&str] = &[
    "essen",
    "food",
    "frühstück",
    "kochen",
    "reise",
    "travel",
    "urlaub",
    "musik",
    "music",
    "sport",
    "fitness",
    "arbeit",
    "work",
    "büro",
    "familie",
    "family",
    "wetter",
    "weather",
    "natur",
    "nature",
    "technik",
    "technology",
    "gaming",
    "spiel",
    "party",
    "feier",
    "wochenende",
];

static HUMOR_KEYWORDS: &[&str] = &[
    "witz", "joke", "meme", "ironie", "irony", "sarkasmus", "sarcasm", "lustig", "funny", "humor",
    "wortspiel", "pun", "absurd", "schadenfreude", "comedy",
];

static ART_KEYWORDS: &[&str] = &[
    "foto",
    "photo",
    "zeichnung",
    "drawing",
    "illustration",
    "screenshot",
    "video",
    "gif",
    "kunst",
    "art",
    "malerei",
    "painting",
    "comic",
    "design",
    "collage",
];

static TONE_KEYWORDS: &[&str] = &[
    "freundlich",
    "friendly",
    "wütend",
    "angry",
    "fröhlich",
    "cheerful",
    "ernst",
    "serious",
    "entspannt",
    "relaxed",
    "aufgeregt",
    "excited",
    "nostalgisch",
    "nostalgic",
    "sarkastisch",
    "sarcastic",
    "herzlich",
    "melancholisch",
];

static TOPICS_KEYWORDS: &[&str] = &[
    "politik",
    "politics",
    "nachrichten",
    "news",
    "fußball",
    "football",
    "film",
    "movie",
    "serie",
    "series",
    "buch",
    "book",
    "wissenschaft",
    "science",
    "geschichte",
    "history",
    "auto",
    "tier",
    "hund",
    "katze",
    "geld",
    "finanzen",
];

/// Assign a normalized tag to its taxonomy category, if any keyword matches.
///
/// Categories are checked in priority order; the first match wins, which
/// implements "highest-priority category wins on ties".
pub fn category_for_tag(normalized: &str) -> Option<TagCategory> {
    let tables: [(TagCategory, &[&str]); 5] = [
        (TagCategory::Themes, THEMES_KEYWORDS),
        (TagCategory::Humor, HUMOR_KEYWORDS),
        (TagCategory::Art, ART_KEYWORDS),
        (TagCategory::Tone, TONE_KEYWORDS),
        (TagCategory::Topics, TOPICS_KEYWORDS),
    ];
    for (category, keywords) in tables {
        if keywords.iter().any(|kw| normalized.contains(kw)) {
            return Some(category);
        }
    }
    None
}

/// German function words used for cheap language detection.
static GERMAN_MARKERS: &[&str] = &[
    "der", "die", "das", "und", "ich", "nicht", "ist", "ein", "eine", "mit", "für", "auf", "auch",
    "aber", "wir", "ihr", "schon", "noch", "mal", "doch",
];

/// English function words used for cheap language detection.
static ENGLISH_MARKERS: &[&str] = &[
    "the", "and", "you", "not", "with", "for", "this", "that", "have", "are", "what", "but",
    "just", "your", "about",
];

/// Deterministic language tone signal for the given text.
///
/// Best-effort stopword counting, good enough for a tone bucket signal that
/// must never be empty. Umlauts/ß count toward German.
pub fn detect_language_tag(text: &str) -> ScoredTag {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != 'ä' && c != 'ö' && c != 'ü' && c != 'ß')
        .filter(|w| !w.is_empty())
        .collect();

    let mut german = lower
        .chars()
        .filter(|c| matches!(c, 'ä' | 'ö' | 'ü' | 'ß'))
        .count()
        * 2;
    let mut english = 0usize;
    for word in &words {
        if GERMAN_MARKERS.contains(word) {
            german += 1;
        }
        if ENGLISH_MARKERS.contains(word) {
            english += 1;
        }
    }

    let tag = if german == 0 && english == 0 {
        "sprache:unbestimmt"
    } else if german >= english {
        "sprache:deutsch"
    } else {
        "sprache:englisch"
    };
    ScoredTag::new(tag, 1.0)
}

/// Deterministic complexity/length tier signal for the given text.
pub fn complexity_tier_tag(text: &str) -> ScoredTag {
    let word_count = text.split_whitespace().count();
    let tag = if word_count < 8 {
        "länge:kurz"
    } else if word_count < 40 {
        "länge:mittel"
    } else {
        "länge:ausführlich"
    };
    ScoredTag::new(tag, 1.0)
}
