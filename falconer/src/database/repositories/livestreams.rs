//! Watched live-stream urls. The url is the whole record; drivers are
//! rebuilt on restore.

use sqlx::SqlitePool;

use crate::Result;

#[derive(Clone)]
pub struct LivestreamsRepository {
    pool: SqlitePool,
}

impl LivestreamsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn put(&self, url: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO livestreams (url) VALUES (?)")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM livestreams WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let urls = sqlx::query_scalar("SELECT url FROM livestreams")
            .fetch_all(&self.pool)
            .await?;
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;

    #[tokio::test]
    async fn put_is_idempotent() {
        let repo = LivestreamsRepository::new(memory_pool().await);

        repo.put("https://twitch.tv/u").await.expect("put");
        repo.put("https://twitch.tv/u").await.expect("put again");

        assert_eq!(repo.list().await.expect("list"), vec!["https://twitch.tv/u"]);

        repo.delete("https://twitch.tv/u").await.expect("delete");
        assert!(repo.list().await.expect("list").is_empty());
    }
}
