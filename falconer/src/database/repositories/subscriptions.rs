//! Subscription repository.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::Subscription;
use crate::{Error, Result};

#[derive(Clone)]
pub struct SubscriptionsRepository {
    pool: SqlitePool,
}

impl SubscriptionsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a subscription, assigning an id when the caller left it empty.
    pub async fn submit(&self, mut sub: Subscription) -> Result<Subscription> {
        if sub.id.is_empty() {
            sub.id = Uuid::new_v4().to_string();
        }

        let body = serde_json::to_string(&sub)?;
        sqlx::query(
            "INSERT INTO subscriptions (id, body) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(&sub.id)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(sub)
    }

    pub async fn get(&self, id: &str) -> Result<Subscription> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let body = body.ok_or_else(|| Error::not_found("subscription", id))?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn list(&self) -> Result<Vec<Subscription>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT body FROM subscriptions")
            .fetch_all(&self.pool)
            .await?;

        let mut subs = Vec::with_capacity(rows.len());
        for row in rows {
            subs.push(serde_json::from_str(&row)?);
        }
        Ok(subs)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_cursor(&self, id: &str) -> Result<i64> {
        Ok(self.get(id).await?.cursor)
    }

    /// Advance the fan-out cursor; it never moves backwards.
    pub async fn set_cursor(&self, id: &str, cursor: i64) -> Result<()> {
        let mut sub = self.get(id).await?;
        if cursor <= sub.cursor {
            return Ok(());
        }
        sub.cursor = cursor;
        self.submit(sub).await?;
        Ok(())
    }
}
