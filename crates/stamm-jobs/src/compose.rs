//! Deterministic composition of the tagging payload from raw model output.
//!
//! The vision provider returns free-form JSON; everything here is the
//! post-processing that turns it into the payload written onto a message:
//! normalization, the confidence floor, the generic-word denylist, the tag
//! cap, category bucket assembly with cross-bucket exclusivity, and the
//! synthetic tone signals that guarantee the tone bucket is never empty.
//!
//! Given the same raw output this module always produces the same payload.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use stamm_core::defaults::{TAG_CAP, TAG_CONFIDENCE_FLOOR};
use stamm_core::tags::{
    category_for_tag, complexity_tier_tag, detect_language_tag, is_generic_tag, normalize_tag,
    TagCategory,
};
use stamm_core::{
    Error, ImageTagAnalysis, ImageTagCategories, Result, ScoredTag, TagCategories, TaggingPayload,
};

/// Raw classification as emitted by the vision provider. Every field is
/// optional; a model that omits sections still yields a valid payload.
#[derive(Debug, Default, Deserialize)]
pub struct RawClassification {
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub categories: RawCategories,
    #[serde(default)]
    pub images: Vec<RawImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub tag: String,
    #[serde(default, alias = "confidence")]
    pub score: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCategories {
    #[serde(default)]
    pub themes: Vec<RawTag>,
    #[serde(default)]
    pub humor: Vec<RawTag>,
    #[serde(default)]
    pub art: Vec<RawTag>,
    #[serde(default)]
    pub tone: Vec<RawTag>,
    #[serde(default)]
    pub topics: Vec<RawTag>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawImage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub categories: RawImageCategories,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawImageCategories {
    #[serde(default)]
    pub themes: Vec<RawTag>,
    #[serde(default)]
    pub humor: Vec<RawTag>,
    #[serde(default)]
    pub art: Vec<RawTag>,
    #[serde(default)]
    pub tone: Vec<RawTag>,
    #[serde(default)]
    pub objects: Vec<RawTag>,
}

/// Parse the provider's classification output.
///
/// Models occasionally wrap the JSON in prose or markdown fences despite the
/// JSON response format, so this extracts the outermost `{...}` span before
/// deserializing.
pub fn parse_classification(text: &str) -> Result<RawClassification> {
    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(Error::Serialization(
                "classification output contains no JSON object".into(),
            ))
        }
    };
    Ok(serde_json::from_str(json)?)
}

/// Normalize, filter, deduplicate, and order a raw tag list.
///
/// Drops empty and generic tags and anything below the confidence floor,
/// clamps scores to 1.0, keeps the highest score per normalized key, and
/// orders by score descending with the tag name as tiebreak.
fn sanitize(raw: &[RawTag]) -> Vec<ScoredTag> {
    let mut best: BTreeMap<String, f64> = BTreeMap::new();
    for entry in raw {
        let tag = normalize_tag(&entry.tag);
        if tag.is_empty() || is_generic_tag(&tag) {
            continue;
        }
        if !entry.score.is_finite() || entry.score < TAG_CONFIDENCE_FLOOR {
            continue;
        }
        let score = entry.score.min(1.0);
        let slot = best.entry(tag).or_insert(score);
        if score > *slot {
            *slot = score;
        }
    }

    let mut tags: Vec<ScoredTag> = best
        .into_iter()
        .map(|(tag, score)| ScoredTag::new(tag, score))
        .collect();
    tags.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    tags
}

/// Assemble one category bucket.
///
/// The model's own assignment wins when it survives filtering; an empty
/// bucket is backfilled from the flat tag list by taxonomy lookup. The
/// `used` set enforces that a tag lands in at most one bucket, so buckets
/// must be filled in priority order.
fn fill_bucket(
    model: &[RawTag],
    category: TagCategory,
    flat: &[ScoredTag],
    used: &mut HashSet<String>,
) -> Vec<ScoredTag> {
    let mut bucket = Vec::new();
    for tag in sanitize(model) {
        if used.insert(tag.tag.clone()) {
            bucket.push(tag);
        }
    }
    if bucket.is_empty() {
        for tag in flat {
            if category_for_tag(&tag.tag) == Some(category) && used.insert(tag.tag.clone()) {
                bucket.push(tag.clone());
            }
        }
    }
    bucket
}

fn raw_image_for<'a>(raws: &'a [RawImage], url: &str, index: usize) -> Option<&'a RawImage> {
    raws.iter()
        .find(|r| r.url.as_deref() == Some(url))
        // Positional fallback only for entries the model left unlabelled; an
        // entry carrying a URL binds to that URL alone.
        .or_else(|| raws.get(index).filter(|r| r.url.is_none()))
}

fn compose_image(url: &str, raw: Option<&RawImage>) -> ImageTagAnalysis {
    let Some(raw) = raw else {
        return ImageTagAnalysis {
            url: url.to_string(),
            ..Default::default()
        };
    };

    let tags = sanitize(&raw.tags);
    let mut used = HashSet::new();
    let categories = ImageTagCategories {
        themes: fill_bucket(&raw.categories.themes, TagCategory::Themes, &tags, &mut used),
        humor: fill_bucket(&raw.categories.humor, TagCategory::Humor, &tags, &mut used),
        art: fill_bucket(&raw.categories.art, TagCategory::Art, &tags, &mut used),
        tone: fill_bucket(&raw.categories.tone, TagCategory::Tone, &tags, &mut used),
        objects: fill_bucket(&raw.categories.objects, TagCategory::Topics, &tags, &mut used),
    };

    ImageTagAnalysis {
        url: url.to_string(),
        tags,
        categories,
    }
}

/// Compose the final tagging payload for a message.
///
/// `image_urls` are the attachments of the originating message, in input
/// order; the output carries exactly one analysis per URL even when the model
/// skipped or reordered images (matched by URL first, position second).
pub fn compose_payload(
    message_text: &str,
    image_urls: &[String],
    raw: &RawClassification,
) -> TaggingPayload {
    let mut tags = sanitize(&raw.tags);
    tags.truncate(TAG_CAP);

    let mut used = HashSet::new();
    let mut categories = TagCategories {
        themes: fill_bucket(&raw.categories.themes, TagCategory::Themes, &tags, &mut used),
        humor: fill_bucket(&raw.categories.humor, TagCategory::Humor, &tags, &mut used),
        art: fill_bucket(&raw.categories.art, TagCategory::Art, &tags, &mut used),
        tone: fill_bucket(&raw.categories.tone, TagCategory::Tone, &tags, &mut used),
        topics: fill_bucket(&raw.categories.topics, TagCategory::Topics, &tags, &mut used),
    };

    // The deterministic tone signals are computed from the message text, not
    // the model output, so the tone bucket is populated even on an empty
    // classification.
    for signal in [
        detect_language_tag(message_text),
        complexity_tier_tag(message_text),
    ] {
        if used.insert(signal.tag.clone()) {
            categories.tone.push(signal);
        }
    }

    let images = image_urls
        .iter()
        .enumerate()
        .map(|(index, url)| compose_image(url, raw_image_for(&raw.images, url, index)))
        .collect();

    TaggingPayload {
        tags,
        categories,
        images,
    }
}
