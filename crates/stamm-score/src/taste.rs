//! Taste profile aggregation over append-only behavior events.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use stamm_core::defaults::TASTE_TOP_TAGS;
use stamm_core::models::{BehaviorEvent, BehaviorEventKind, ScoredTag, TasteProfile, TasteWindow};
use stamm_core::tags::normalize_tag;

/// Fold raw behavior events into a windowed taste profile.
///
/// Events outside the window are ignored. The reaction distribution counts
/// reactions the user's content *received*; the tag affinity accumulates
/// over content the user actively reacted to or engaged with. Idempotent:
/// recomputing over the same event rows yields the same profile.
pub fn aggregate_profile(
    events: &[BehaviorEvent],
    window: TasteWindow,
    now: DateTime<Utc>,
) -> TasteProfile {
    let cutoff = window.days().map(|d| now - Duration::days(d));

    let mut reactions: BTreeMap<String, i64> = BTreeMap::new();
    let mut tag_scores: BTreeMap<String, f64> = BTreeMap::new();

    for event in events {
        if let Some(cutoff) = cutoff {
            if event.occurred_at < cutoff {
                continue;
            }
        }

        match event.kind {
            BehaviorEventKind::ReactionReceived => {
                if let Some(reaction) = &event.reaction {
                    let key = normalize_tag(reaction);
                    if !key.is_empty() {
                        *reactions.entry(key).or_insert(0) += 1;
                    }
                }
            }
            BehaviorEventKind::ReactionGiven | BehaviorEventKind::ContentEngaged => {
                for scored in &event.tags {
                    let key = normalize_tag(&scored.tag);
                    if !key.is_empty() && scored.score > 0.0 {
                        *tag_scores.entry(key).or_insert(0.0) += scored.score;
                    }
                }
            }
        }
    }

    let mut top_tags: Vec<ScoredTag> = tag_scores
        .into_iter()
        .map(|(tag, score)| ScoredTag { tag, score })
        .collect();
    // Descending by score, tag name breaks ties for determinism.
    top_tags.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    top_tags.truncate(TASTE_TOP_TAGS);

    TasteProfile { reactions, top_tags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stamm_core::new_v7;
    use uuid::Uuid;

    fn event(
        kind: BehaviorEventKind,
        reaction: Option<&str>,
        tags: &[(&str, f64)],
        occurred_at: DateTime<Utc>,
    ) -> BehaviorEvent {
        BehaviorEvent {
            id: new_v7(),
            user_id: Uuid::nil(),
            kind,
            reaction: reaction.map(str::to_string),
            tags: tags.iter().map(|(t, s)| ScoredTag::new(*t, *s)).collect(),
            occurred_at,
        }
    }

    #[test]
    fn received_reactions_feed_the_distribution() {
        let now = Utc::now();
        let events = vec![
            event(BehaviorEventKind::ReactionReceived, Some("heart"), &[], now),
            event(BehaviorEventKind::ReactionReceived, Some("heart"), &[], now),
            event(BehaviorEventKind::ReactionReceived, Some("laugh"), &[], now),
            // Given reactions do not count into the received mix.
            event(BehaviorEventKind::ReactionGiven, Some("heart"), &[], now),
        ];
        let profile = aggregate_profile(&events, TasteWindow::AllTime, now);
        assert_eq!(profile.reactions.get("heart"), Some(&2));
        assert_eq!(profile.reactions.get("laugh"), Some(&1));
    }

    #[test]
    fn tags_accumulate_and_sort_descending() {
        let now = Utc::now();
        let events = vec![
            event(
                BehaviorEventKind::ReactionGiven,
                Some("heart"),
                &[("katze", 0.9)],
                now,
            ),
            event(
                BehaviorEventKind::ContentEngaged,
                None,
                &[("katze", 0.8), ("wetter", 0.7)],
                now,
            ),
        ];
        let profile = aggregate_profile(&events, TasteWindow::AllTime, now);
        assert_eq!(profile.top_tags.len(), 2);
        assert_eq!(profile.top_tags[0].tag, "katze");
        assert!((profile.top_tags[0].score - 1.7).abs() < 1e-9);
        assert_eq!(profile.top_tags[1].tag, "wetter");
    }

    #[test]
    fn tags_dedupe_on_normalized_key() {
        let now = Utc::now();
        let events = vec![event(
            BehaviorEventKind::ContentEngaged,
            None,
            &[("Katze", 0.5), (" katze ", 0.5)],
            now,
        )];
        let profile = aggregate_profile(&events, TasteWindow::AllTime, now);
        assert_eq!(profile.top_tags.len(), 1);
        assert!((profile.top_tags[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn window_excludes_older_events() {
        let now = Utc::now();
        let events = vec![
            event(
                BehaviorEventKind::ReactionReceived,
                Some("heart"),
                &[],
                now - Duration::days(2),
            ),
            event(
                BehaviorEventKind::ReactionReceived,
                Some("laugh"),
                &[],
                now - Duration::days(20),
            ),
        ];

        let week = aggregate_profile(&events, TasteWindow::Days7, now);
        assert_eq!(week.reactions.len(), 1);
        assert!(week.reactions.contains_key("heart"));

        let month = aggregate_profile(&events, TasteWindow::Days30, now);
        assert_eq!(month.reactions.len(), 2);
    }

    #[test]
    fn top_tags_capped_at_window_limit() {
        let now = Utc::now();
        let tags: Vec<(String, f64)> = (0..TASTE_TOP_TAGS + 10)
            .map(|i| (format!("tag{i:03}"), 1.0 + i as f64 * 0.01))
            .collect();
        let borrowed: Vec<(&str, f64)> = tags.iter().map(|(t, s)| (t.as_str(), *s)).collect();
        let events = vec![event(BehaviorEventKind::ContentEngaged, None, &borrowed, now)];
        let profile = aggregate_profile(&events, TasteWindow::AllTime, now);
        assert_eq!(profile.top_tags.len(), TASTE_TOP_TAGS);
        // Highest accumulated score survives the cap.
        assert_eq!(profile.top_tags[0].tag, format!("tag{:03}", TASTE_TOP_TAGS + 9));
    }

    #[test]
    fn recomputation_is_idempotent() {
        let now = Utc::now();
        let events = vec![
            event(
                BehaviorEventKind::ReactionReceived,
                Some("heart"),
                &[],
                now,
            ),
            event(
                BehaviorEventKind::ReactionGiven,
                Some("laugh"),
                &[("wetter", 0.6)],
                now,
            ),
        ];
        let a = aggregate_profile(&events, TasteWindow::Days30, now);
        let b = aggregate_profile(&events, TasteWindow::Days30, now);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_events_yield_empty_profile() {
        let profile = aggregate_profile(&[], TasteWindow::AllTime, Utc::now());
        assert!(profile.is_empty());
    }
}
