//! Download snapshot repository.

use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::domain::ProcessSnapshot;

/// Persisted process snapshots, keyed by handle id.
#[derive(Clone)]
pub struct DownloadsRepository {
    pool: SqlitePool,
}

impl DownloadsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, snapshot: &ProcessSnapshot) -> Result<()> {
        let body = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT INTO downloads (id, snapshot) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot",
        )
        .bind(&snapshot.id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert a whole registry snapshot in one transaction; this is the 15 s
    /// snapshotter's write path.
    pub async fn upsert_all(&self, snapshots: &[ProcessSnapshot]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            let body = serde_json::to_string(snapshot)?;
            sqlx::query(
                "INSERT INTO downloads (id, snapshot) VALUES (?, ?) \
                 ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot",
            )
            .bind(&snapshot.id)
            .bind(body)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Every persisted snapshot; undecodable rows are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<ProcessSnapshot>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT snapshot FROM downloads")
            .fetch_all(&self.pool)
            .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<ProcessSnapshot>(&row) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(err = %e, "skipping undecodable download snapshot"),
            }
        }
        Ok(snapshots)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
