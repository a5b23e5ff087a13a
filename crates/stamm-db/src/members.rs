//! Persisted member score state.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use stamm_core::{Error, MemberRepository, MemberScoreRow, Result};

/// PostgreSQL implementation of [`MemberRepository`].
///
/// Only `raw_score` and `last_active_at` are persisted; displayed scores and
/// ranks are always derived on read by the score engine.
pub struct PgMemberRepository {
    pool: Pool<Postgres>,
}

impl PgMemberRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberRepository for PgMemberRepository {
    async fn score_row(&self, user_id: Uuid) -> Result<Option<MemberScoreRow>> {
        let row = sqlx::query(
            "SELECT user_id, raw_score, last_active_at
             FROM member_scores WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| MemberScoreRow {
            user_id: r.get("user_id"),
            raw_score: r.get("raw_score"),
            last_active_at: r.get("last_active_at"),
        }))
    }

    async fn add_points(&self, user_id: Uuid, points: i64) -> Result<MemberScoreRow> {
        let row = sqlx::query(
            "INSERT INTO member_scores (user_id, raw_score, last_active_at)
             VALUES ($1, GREATEST($2, 0), $3)
             ON CONFLICT (user_id)
             DO UPDATE SET raw_score = GREATEST(member_scores.raw_score + $2, 0),
                           last_active_at = EXCLUDED.last_active_at
             RETURNING user_id, raw_score, last_active_at",
        )
        .bind(user_id)
        .bind(points)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(MemberScoreRow {
            user_id: row.get("user_id"),
            raw_score: row.get("raw_score"),
            last_active_at: row.get("last_active_at"),
        })
    }
}
