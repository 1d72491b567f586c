//! Pipeline template repository.

use sqlx::SqlitePool;

use crate::domain::PipelineTemplate;
use crate::{Error, Result};

#[derive(Clone)]
pub struct PipelinesRepository {
    pool: SqlitePool,
}

impl PipelinesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, template: &PipelineTemplate) -> Result<()> {
        let body = serde_json::to_string(template)?;
        sqlx::query(
            "INSERT INTO pipelines (id, body) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(&template.id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<PipelineTemplate> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let body = body.ok_or_else(|| Error::not_found("pipeline", id))?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn list(&self) -> Result<Vec<PipelineTemplate>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT body FROM pipelines")
            .fetch_all(&self.pool)
            .await?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            templates.push(serde_json::from_str(&row)?);
        }
        Ok(templates)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
