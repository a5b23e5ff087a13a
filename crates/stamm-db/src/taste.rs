//! Behavior event log and taste profile aggregates.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use stamm_core::{
    BehaviorEvent, BehaviorEventKind, Error, Result, TasteProfile, TasteRepository, TasteWindow,
};

/// PostgreSQL implementation of [`TasteRepository`].
///
/// `behavior_events` is append-only; `taste_profiles` holds one derived
/// aggregate per `(user_id, window)` and is overwritten on recomputation.
pub struct PgTasteRepository {
    pool: Pool<Postgres>,
}

impl PgTasteRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert BehaviorEventKind to string for database.
    fn kind_to_str(kind: BehaviorEventKind) -> &'static str {
        match kind {
            BehaviorEventKind::ReactionGiven => "reaction_given",
            BehaviorEventKind::ReactionReceived => "reaction_received",
            BehaviorEventKind::ContentEngaged => "content_engaged",
        }
    }

    /// Convert string from database to BehaviorEventKind.
    fn str_to_kind(s: &str) -> BehaviorEventKind {
        match s {
            "reaction_given" => BehaviorEventKind::ReactionGiven,
            "reaction_received" => BehaviorEventKind::ReactionReceived,
            _ => BehaviorEventKind::ContentEngaged, // fallback
        }
    }

    /// Convert TasteWindow to string for database.
    fn window_to_str(window: TasteWindow) -> &'static str {
        match window {
            TasteWindow::Days7 => "7d",
            TasteWindow::Days30 => "30d",
            TasteWindow::AllTime => "all",
        }
    }

    fn parse_event_row(row: PgRow) -> Result<BehaviorEvent> {
        let kind: String = row.get("kind");
        let tags: serde_json::Value = row.get("tags");
        Ok(BehaviorEvent {
            id: row.get("id"),
            user_id: row.get("user_id"),
            kind: Self::str_to_kind(&kind),
            reaction: row.get("reaction"),
            tags: serde_json::from_value(tags)?,
            occurred_at: row.get("occurred_at"),
        })
    }
}

#[async_trait]
impl TasteRepository for PgTasteRepository {
    async fn append_event(&self, event: &BehaviorEvent) -> Result<()> {
        let tags_json = serde_json::to_value(&event.tags)?;
        sqlx::query(
            "INSERT INTO behavior_events (id, user_id, kind, reaction, tags, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(Self::kind_to_str(event.kind))
        .bind(&event.reaction)
        .bind(&tags_json)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn events_for_user(
        &self,
        user_id: Uuid,
        window: TasteWindow,
    ) -> Result<Vec<BehaviorEvent>> {
        let cutoff = window.days().map(|d| Utc::now() - Duration::days(d));

        let rows = sqlx::query(
            "SELECT id, user_id, kind, reaction, tags, occurred_at
             FROM behavior_events
             WHERE user_id = $1
               AND ($2::timestamptz IS NULL OR occurred_at >= $2)
             ORDER BY occurred_at ASC",
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_event_row).collect()
    }

    async fn store_profile(
        &self,
        user_id: Uuid,
        window: TasteWindow,
        profile: &TasteProfile,
    ) -> Result<()> {
        let profile_json = serde_json::to_value(profile)?;
        sqlx::query(
            "INSERT INTO taste_profiles (user_id, time_window, profile, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, time_window)
             DO UPDATE SET profile = EXCLUDED.profile, updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(Self::window_to_str(window))
        .bind(&profile_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn profile(&self, user_id: Uuid, window: TasteWindow) -> Result<Option<TasteProfile>> {
        let row: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT profile FROM taste_profiles
             WHERE user_id = $1 AND time_window = $2",
        )
        .bind(user_id)
        .bind(Self::window_to_str(window))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|v| serde_json::from_value(v).map_err(Error::from))
            .transpose()
    }
}
