//! Postgres advisory-lock coordination for queue draining.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use stamm_core::{CoordinationLock, Error, Result};

/// Named advisory locks backed by `pg_try_advisory_lock(hashtext(name))`.
///
/// Advisory locks are session-scoped, so the connection that acquired a lock
/// is pinned out of the pool until release. Holding the lock throttles the
/// drain procedure across process boundaries; it is not what makes row
/// claiming safe (that is `FOR UPDATE SKIP LOCKED` in the job repositories).
pub struct PgCoordinationLock {
    pool: PgPool,
    /// Connections pinned per held lock name.
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgCoordinationLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CoordinationLock for PgCoordinationLock {
    async fn try_acquire(&self, name: &str) -> Result<bool> {
        let mut held = self.held.lock().await;
        if held.contains_key(name) {
            // Already held by this instance; treat as contended.
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(Error::Database)?;

        if acquired {
            debug!(
                subsystem = "db",
                component = "advisory",
                op = "acquire",
                lock = name,
                "Advisory lock acquired"
            );
            held.insert(name.to_string(), conn);
        } else {
            debug!(
                subsystem = "db",
                component = "advisory",
                op = "acquire",
                lock = name,
                "Advisory lock contended, skipping"
            );
        }
        Ok(acquired)
    }

    async fn release(&self, name: &str) -> Result<()> {
        let mut held = self.held.lock().await;
        let Some(mut conn) = held.remove(name) else {
            warn!(
                subsystem = "db",
                component = "advisory",
                op = "release",
                lock = name,
                "Release requested for a lock this instance does not hold"
            );
            return Ok(());
        };

        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(Error::Database)?;

        if released {
            debug!(
                subsystem = "db",
                component = "advisory",
                op = "release",
                lock = name,
                "Advisory lock released"
            );
        } else {
            // The session did not hold it server-side; dropping the pinned
            // connection still ends the session's claim.
            warn!(
                subsystem = "db",
                component = "advisory",
                op = "release",
                lock = name,
                "Advisory unlock reported no lock held"
            );
        }
        Ok(())
    }
}
