//! Calibrated predicted-like score between a taste profile and a message.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stamm_core::defaults::{
    FRESHNESS_HALF_LIFE_HOURS, LIKE_BASELINE, LIKE_FALLBACK_WEIGHT_FRESHNESS,
    LIKE_FALLBACK_WEIGHT_REACTIONS, LIKE_WEIGHT_FRESHNESS, LIKE_WEIGHT_REACTIONS, LIKE_WEIGHT_TAGS,
};
use stamm_core::models::{TaggingPayload, TaggingStatus, TasteProfile};
use stamm_core::tags::normalize_tag;

use crate::sparse::SparseVector;

/// Snapshot of the message-side inputs to the like score.
#[derive(Debug, Clone, Default)]
pub struct MessageSignals {
    /// Tagging lifecycle state on the message.
    pub tagging_status: Option<TaggingStatus>,
    /// Completed tagging payload, when present.
    pub tagging: Option<TaggingPayload>,
    /// Current reaction counts on the message, by reaction type.
    pub reactions: BTreeMap<String, i64>,
    pub created_at: DateTime<Utc>,
}

/// Which signal mix produced the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeState {
    /// Tagging complete, tag-match signal included in the blend.
    Ready,
    /// Tagging in flight; fallback blend, expect a recompute later.
    Pending,
    /// No usable tag signal (absent, failed, or empty payload).
    Fallback,
}

/// The calibrated affinity estimate shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LikeScore {
    /// Shown percentage, always within `[35, 100]`.
    pub percent: u8,
    pub state: LikeState,
    /// Raw blended quality in `[0, 1]`, before calibration.
    pub quality: f64,
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Exponential freshness decay of message age, 72-hour half-life.
fn freshness_score(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_secs = (now - created_at).num_seconds().max(0) as f64;
    let age_hours = age_secs / 3600.0;
    0.5_f64.powf(age_hours / FRESHNESS_HALF_LIFE_HOURS)
}

/// Sparse tag vector for the profile side: top tags weighted by score.
fn profile_tag_vector(profile: &TasteProfile) -> SparseVector {
    let mut v = SparseVector::new();
    for scored in &profile.top_tags {
        let key = normalize_tag(&scored.tag);
        if !key.is_empty() && scored.score > 0.0 {
            v.add(key, scored.score);
        }
    }
    v
}

/// Sparse tag vector for the message side.
///
/// Message tags, all category tags, all image tags, and image category tags
/// contribute additively; a tag repeated across levels accumulates weight.
fn message_tag_vector(payload: &TaggingPayload) -> SparseVector {
    let mut v = SparseVector::new();
    let mut push = |v: &mut SparseVector, tag: &str, score: f64| {
        let key = normalize_tag(tag);
        if !key.is_empty() && score > 0.0 {
            v.add(key, score);
        }
    };

    for scored in &payload.tags {
        push(&mut v, &scored.tag, scored.score);
    }
    for scored in payload.categories.all_tags() {
        push(&mut v, &scored.tag, scored.score);
    }
    for image in &payload.images {
        for scored in &image.tags {
            push(&mut v, &scored.tag, scored.score);
        }
        for scored in image.categories.all_tags() {
            push(&mut v, &scored.tag, scored.score);
        }
    }
    v
}

/// Compute the predicted-like score for a message against a taste profile.
///
/// Pure and re-run-stable: identical inputs always yield identical output,
/// so callers can recompute on every read and key UI updates by message id.
pub fn compute_message_like_score(
    profile: &TasteProfile,
    signals: &MessageSignals,
    now: DateTime<Utc>,
) -> LikeScore {
    let freshness = freshness_score(signals.created_at, now);

    let reaction_profile = SparseVector::from_counts(&profile.reactions);
    let reaction_message = SparseVector::from_counts(&signals.reactions);
    let reaction_match = reaction_profile.cosine_similarity(&reaction_message);

    let completed_payload = match signals.tagging_status {
        Some(TaggingStatus::Completed) => signals.tagging.as_ref(),
        _ => None,
    };
    let message_tags = completed_payload.map(message_tag_vector);

    let (state, quality) = match message_tags {
        Some(ref tags) if !tags.is_empty() => {
            let tag_match = profile_tag_vector(profile).cosine_similarity(tags);
            let quality = LIKE_WEIGHT_TAGS * tag_match
                + LIKE_WEIGHT_REACTIONS * reaction_match
                + LIKE_WEIGHT_FRESHNESS * freshness;
            (LikeState::Ready, quality)
        }
        _ => {
            let state = match signals.tagging_status {
                Some(TaggingStatus::Pending) | Some(TaggingStatus::Processing) => {
                    LikeState::Pending
                }
                _ => LikeState::Fallback,
            };
            let quality = LIKE_FALLBACK_WEIGHT_REACTIONS * reaction_match
                + LIKE_FALLBACK_WEIGHT_FRESHNESS * freshness;
            (state, quality)
        }
    };

    let quality = clamp01(quality);
    let shown = LIKE_BASELINE + (1.0 - LIKE_BASELINE) * quality;
    let percent = (shown * 100.0).round() as u8;

    LikeScore {
        percent,
        state,
        quality,
    }
}
