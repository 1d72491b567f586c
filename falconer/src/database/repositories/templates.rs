//! Custom argument-template repository.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::CustomTemplate;
use crate::{Error, Result};

#[derive(Clone)]
pub struct TemplatesRepository {
    pool: SqlitePool,
}

impl TemplatesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, mut template: CustomTemplate) -> Result<CustomTemplate> {
        if template.id.is_empty() {
            template.id = Uuid::new_v4().to_string();
        }

        let body = serde_json::to_string(&template)?;
        sqlx::query(
            "INSERT INTO templates (id, body) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(&template.id)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(template)
    }

    pub async fn get(&self, id: &str) -> Result<CustomTemplate> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let body = body.ok_or_else(|| Error::not_found("template", id))?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn list(&self) -> Result<Vec<CustomTemplate>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT body FROM templates")
            .fetch_all(&self.pool)
            .await?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            templates.push(serde_json::from_str(&row)?);
        }
        Ok(templates)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;

    #[tokio::test]
    async fn save_assigns_id_and_round_trips() {
        let repo = TemplatesRepository::new(memory_pool().await);

        let stored = repo
            .save(CustomTemplate {
                id: String::new(),
                name: "audio only".to_string(),
                content: "-f bestaudio -x".to_string(),
            })
            .await
            .expect("save");
        assert!(!stored.id.is_empty());

        let found = repo.get(&stored.id).await.expect("get");
        assert_eq!(found.content, "-f bestaudio -x");

        repo.delete(&stored.id).await.expect("delete");
        assert!(repo.list().await.expect("list").is_empty());
    }
}
