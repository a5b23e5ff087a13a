//! Member score decay, rank resolution, and upgrade detection.

use chrono::{DateTime, Utc};

use stamm_core::defaults::SCORE_HALF_LIFE_DAYS;
use stamm_core::models::{MemberProgress, MemberScoreRow, Rank};

/// Apply exponential half-life decay to a raw score.
///
/// `decayed = round(max(0, raw) * 0.5^(days_since_last_active / 45))`.
/// Without a `last_active_at` timestamp no decay applies; the raw score
/// stands. Decay only ever reduces the score.
pub fn decayed_score(raw_score: i64, last_active_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let raw = raw_score.max(0);
    let Some(last_active) = last_active_at else {
        return raw;
    };

    let elapsed_secs = (now - last_active).num_seconds().max(0) as f64;
    let days = elapsed_secs / 86_400.0;
    let factor = 0.5_f64.powf(days / SCORE_HALF_LIFE_DAYS);
    (raw as f64 * factor).round() as i64
}

/// Resolve the highest rank whose threshold is ≤ the decayed score.
pub fn rank_for_score(score: i64) -> Rank {
    let mut rank = Rank::Bronze;
    for candidate in Rank::ALL {
        if candidate.threshold() <= score {
            rank = candidate;
        } else {
            break;
        }
    }
    rank
}

/// Points missing to the next rank, None at the top of the ladder.
pub fn points_to_next(score: i64) -> Option<i64> {
    rank_for_score(score)
        .next()
        .map(|next| next.threshold() - score)
}

/// A rank change counts as an upgrade only when the new rank's order index
/// is strictly greater. Recomputation never fires an upgrade notification on
/// a downgrade or no-op.
pub fn is_upgrade(previous: Rank, current: Rank) -> bool {
    current.order_index() > previous.order_index()
}

/// Assemble the derived member progress from the persisted score row.
pub fn member_progress(row: &MemberScoreRow, now: DateTime<Utc>) -> MemberProgress {
    let score = decayed_score(row.raw_score, row.last_active_at, now);
    let rank = rank_for_score(score);
    MemberProgress {
        score,
        rank,
        next_rank: rank.next(),
        points_to_next: points_to_next(score),
    }
}

/// Daily AI-bot interaction budget per rank, consumed by the chat layer's
/// admission checks.
pub fn bot_limit_for_rank(rank: Rank) -> i64 {
    match rank {
        Rank::Bronze => 5,
        Rank::Silber => 10,
        Rank::Gold => 20,
        Rank::Platin => 35,
        Rank::Diamant => 50,
        Rank::Onyx => 75,
        Rank::Titan => 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn at_days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        now - Duration::days(days)
    }

    #[test]
    fn no_last_active_means_no_decay() {
        let now = Utc::now();
        assert_eq!(decayed_score(1000, None, now), 1000);
    }

    #[test]
    fn negative_raw_score_clamps_to_zero() {
        let now = Utc::now();
        assert_eq!(decayed_score(-50, None, now), 0);
        assert_eq!(decayed_score(-50, Some(at_days_ago(now, 10)), now), 0);
    }

    #[test]
    fn one_half_life_halves_the_score() {
        let now = Utc::now();
        let decayed = decayed_score(1000, Some(at_days_ago(now, 45)), now);
        assert_eq!(decayed, 500);
    }

    #[test]
    fn two_half_lives_quarter_the_score() {
        let now = Utc::now();
        let decayed = decayed_score(1000, Some(at_days_ago(now, 90)), now);
        assert_eq!(decayed, 250);
    }

    #[test]
    fn decay_is_monotonic_in_elapsed_days() {
        let now = Utc::now();
        let mut previous = i64::MAX;
        for days in [0, 1, 7, 30, 45, 90, 180, 365] {
            let decayed = decayed_score(4200, Some(at_days_ago(now, days)), now);
            assert!(
                decayed <= previous,
                "decay must not increase: {} days -> {}",
                days,
                decayed
            );
            previous = decayed;
        }
    }

    #[test]
    fn future_last_active_does_not_inflate() {
        let now = Utc::now();
        let decayed = decayed_score(1000, Some(now + Duration::days(3)), now);
        assert_eq!(decayed, 1000);
    }

    #[test]
    fn rank_resolution_at_thresholds() {
        assert_eq!(rank_for_score(0), Rank::Bronze);
        assert_eq!(rank_for_score(299), Rank::Bronze);
        assert_eq!(rank_for_score(300), Rank::Silber);
        assert_eq!(rank_for_score(900), Rank::Gold);
        assert_eq!(rank_for_score(1800), Rank::Platin);
        assert_eq!(rank_for_score(4200), Rank::Diamant);
        assert_eq!(rank_for_score(9000), Rank::Onyx);
        assert_eq!(rank_for_score(18000), Rank::Titan);
        assert_eq!(rank_for_score(1_000_000), Rank::Titan);
    }

    #[test]
    fn points_to_next_at_boundaries() {
        assert_eq!(points_to_next(0), Some(300));
        assert_eq!(points_to_next(299), Some(1));
        assert_eq!(points_to_next(300), Some(600));
        assert_eq!(points_to_next(18000), None);
    }

    #[test]
    fn upgrade_detection() {
        assert!(is_upgrade(Rank::Bronze, Rank::Silber));
        assert!(!is_upgrade(Rank::Silber, Rank::Bronze));
        assert!(!is_upgrade(Rank::Gold, Rank::Gold));
        assert!(is_upgrade(Rank::Bronze, Rank::Titan));
    }

    #[test]
    fn member_progress_assembly() {
        let now = Utc::now();
        let row = MemberScoreRow {
            user_id: Uuid::nil(),
            raw_score: 1000,
            last_active_at: Some(at_days_ago(now, 45)),
        };
        let progress = member_progress(&row, now);
        assert_eq!(progress.score, 500);
        assert_eq!(progress.rank, Rank::Silber);
        assert_eq!(progress.next_rank, Some(Rank::Gold));
        assert_eq!(progress.points_to_next, Some(400));
    }

    #[test]
    fn member_progress_at_max_rank_has_no_next() {
        let now = Utc::now();
        let row = MemberScoreRow {
            user_id: Uuid::nil(),
            raw_score: 20_000,
            last_active_at: None,
        };
        let progress = member_progress(&row, now);
        assert_eq!(progress.rank, Rank::Titan);
        assert_eq!(progress.next_rank, None);
        assert_eq!(progress.points_to_next, None);
    }

    #[test]
    fn bot_limits_increase_with_rank() {
        let mut previous = 0;
        for rank in Rank::ALL {
            let limit = bot_limit_for_rank(rank);
            assert!(limit > previous);
            previous = limit;
        }
    }
}
