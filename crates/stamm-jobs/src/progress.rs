//! Member progress updates and taste profile refresh.
//!
//! Bridges the persisted rows to the pure scoring functions: points land in
//! `raw_score`, everything displayed is recomputed on read, and a rank-up is
//! announced only when the decayed score crosses a threshold upward.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use stamm_core::{
    BehaviorEvent, EventBus, MemberProgress, MemberRepository, MemberScoreRow, Result, ServerEvent,
    TasteProfile, TasteRepository, TasteWindow,
};
use stamm_score::{
    aggregate_profile, bot_limit_for_rank, decayed_score, is_upgrade, member_progress,
    rank_for_score,
};

pub struct ProgressService {
    members: Arc<dyn MemberRepository>,
    taste: Arc<dyn TasteRepository>,
    events: Arc<EventBus>,
}

impl ProgressService {
    pub fn new(
        members: Arc<dyn MemberRepository>,
        taste: Arc<dyn TasteRepository>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            members,
            taste,
            events,
        }
    }

    /// Award points for an activity and return the updated progress.
    ///
    /// Publishes a `rank.up` event when the member's effective rank rises.
    /// Downgrades happen silently through decay and are never announced.
    pub async fn award_points(&self, user_id: Uuid, points: i64) -> Result<MemberProgress> {
        let now = Utc::now();
        let previous_rank = match self.members.score_row(user_id).await? {
            Some(row) => rank_for_score(decayed_score(row.raw_score, row.last_active_at, now)),
            None => rank_for_score(0),
        };

        let row = self.members.add_points(user_id, points).await?;
        let progress = member_progress(&row, now);

        if is_upgrade(previous_rank, progress.rank) {
            info!(
                subsystem = "jobs",
                component = "progress",
                %user_id,
                rank = progress.rank.display_name(),
                previous = previous_rank.display_name(),
                "Member ranked up"
            );
            self.events.publish(ServerEvent::RankUp {
                user_id,
                rank: progress.rank,
                previous: previous_rank,
            });
        }
        Ok(progress)
    }

    /// Current progress, recomputed from the persisted row. A member without
    /// a row is a fresh Bronze.
    pub async fn progress(&self, user_id: Uuid) -> Result<MemberProgress> {
        let row = self
            .members
            .score_row(user_id)
            .await?
            .unwrap_or(MemberScoreRow {
                user_id,
                raw_score: 0,
                last_active_at: None,
            });
        Ok(member_progress(&row, Utc::now()))
    }

    /// Daily bot interaction budget at the member's current rank.
    pub async fn bot_limit(&self, user_id: Uuid) -> Result<i64> {
        let progress = self.progress(user_id).await?;
        Ok(bot_limit_for_rank(progress.rank))
    }

    /// Append one behavior event to the taste log.
    pub async fn record_event(&self, event: &BehaviorEvent) -> Result<()> {
        self.taste.append_event(event).await
    }

    /// Recompute a user's taste aggregate for one window from the raw event
    /// log and store it.
    pub async fn refresh_taste_profile(
        &self,
        user_id: Uuid,
        window: TasteWindow,
    ) -> Result<TasteProfile> {
        let events = self.taste.events_for_user(user_id, window).await?;
        let profile = aggregate_profile(&events, window, Utc::now());
        self.taste.store_profile(user_id, window, &profile).await?;
        debug!(
            subsystem = "jobs",
            component = "progress",
            %user_id,
            ?window,
            events = events.len(),
            top_tags = profile.top_tags.len(),
            "Taste profile refreshed"
        );
        self.events.publish(ServerEvent::TasteUpdated { user_id });
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryMembers, InMemoryTaste};
    use stamm_core::{new_v7, BehaviorEventKind, Rank, ScoredTag};

    fn service() -> (ProgressService, Arc<InMemoryMembers>, Arc<EventBus>) {
        let members = Arc::new(InMemoryMembers::new());
        let taste = Arc::new(InMemoryTaste::new());
        let events = Arc::new(EventBus::new(32));
        let service = ProgressService::new(members.clone(), taste, events.clone());
        (service, members, events)
    }

    #[tokio::test]
    async fn first_points_create_a_bronze_row() {
        let (service, _, _) = service();
        let user_id = new_v7();

        let progress = service.award_points(user_id, 50).await.unwrap();
        assert_eq!(progress.score, 50);
        assert_eq!(progress.rank, Rank::Bronze);
        assert_eq!(progress.next_rank, Some(Rank::Silber));
        assert_eq!(progress.points_to_next, Some(250));
    }

    #[tokio::test]
    async fn crossing_a_threshold_publishes_rank_up() {
        let (service, _, events) = service();
        let user_id = new_v7();
        let mut rx = events.subscribe();

        service.award_points(user_id, 250).await.unwrap();
        let progress = service.award_points(user_id, 100).await.unwrap();
        assert_eq!(progress.rank, Rank::Silber);

        let event = rx.try_recv().unwrap();
        match event {
            ServerEvent::RankUp {
                user_id: id,
                rank,
                previous,
            } => {
                assert_eq!(id, user_id);
                assert_eq!(rank, Rank::Silber);
                assert_eq!(previous, Rank::Bronze);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // Only the crossing publishes; the first award stayed Bronze.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn points_within_a_rank_stay_silent() {
        let (service, _, events) = service();
        let user_id = new_v7();
        let mut rx = events.subscribe();

        service.award_points(user_id, 10).await.unwrap();
        service.award_points(user_id, 10).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_member_reads_as_fresh_bronze() {
        let (service, _, _) = service();
        let progress = service.progress(new_v7()).await.unwrap();
        assert_eq!(progress.score, 0);
        assert_eq!(progress.rank, Rank::Bronze);
    }

    #[tokio::test]
    async fn bot_limit_follows_rank() {
        let (service, members, _) = service();
        let user_id = new_v7();
        members.seed(MemberScoreRow {
            user_id,
            raw_score: 1000,
            last_active_at: Some(Utc::now()),
        });
        assert_eq!(service.bot_limit(user_id).await.unwrap(), 20);
        assert_eq!(service.bot_limit(new_v7()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn taste_refresh_aggregates_and_publishes() {
        let (service, _, events) = service();
        let user_id = new_v7();
        let mut rx = events.subscribe();

        service
            .record_event(&BehaviorEvent {
                id: new_v7(),
                user_id,
                kind: BehaviorEventKind::ReactionGiven,
                reaction: Some("heart".into()),
                tags: vec![ScoredTag::new("fußball", 0.9)],
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();

        let profile = service
            .refresh_taste_profile(user_id, TasteWindow::Days7)
            .await
            .unwrap();
        assert_eq!(profile.top_tags[0].tag, "fußball");
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::TasteUpdated { .. }
        ));
    }
}
