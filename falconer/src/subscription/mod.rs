//! Cron-scheduled subscriptions.
//!
//! Each subscription gets its own task evaluating the cron expression; on
//! every tick the subscription url is expanded and items past the stored
//! cursor are published.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::database::repositories::SubscriptionsRepository;
use crate::domain::Subscription;
use crate::downloader::{Downloader, DriverConfig, GenericDownloader};
use crate::playlist;
use crate::queue::MessageQueue;
use crate::registry::Registry;
use crate::{Error, Result};

pub struct TaskRunner {
    repo: SubscriptionsRepository,
    registry: Arc<Registry>,
    queue: Arc<MessageQueue>,
    driver_cfg: DriverConfig,
    tasks: Mutex<HashMap<String, CancellationToken>>,
    token: CancellationToken,
}

impl TaskRunner {
    pub fn new(
        repo: SubscriptionsRepository,
        registry: Arc<Registry>,
        queue: Arc<MessageQueue>,
        driver_cfg: DriverConfig,
        token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            registry,
            queue,
            driver_cfg,
            tasks: Mutex::new(HashMap::new()),
            token,
        })
    }

    /// Spawn one cron task per stored subscription.
    pub async fn spawn_all(self: Arc<Self>) -> Result<()> {
        for sub in self.repo.list().await? {
            self.clone().spawn(sub);
        }
        Ok(())
    }

    /// Validate, store and schedule a subscription.
    pub async fn submit(self: Arc<Self>, mut sub: Subscription) -> Result<Subscription> {
        parse_cron(&sub.cron_expr)?;

        if sub.id.is_empty() {
            // Nothing processed yet; index 0 must still be published.
            sub.cursor = -1;
        }

        let stored = self.repo.submit(sub).await?;
        self.spawn(stored.clone());
        Ok(stored)
    }

    /// Unschedule and delete a subscription.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if let Some(task) = self.tasks.lock().remove(id) {
            task.cancel();
        }
        self.repo.delete(id).await
    }

    fn spawn(self: Arc<Self>, sub: Subscription) {
        let schedule = match parse_cron(&sub.cron_expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(id = %sub.id, err = %e, "skipping subscription with invalid cron");
                return;
            }
        };

        let task_token = self.token.child_token();
        if let Some(previous) = self
            .tasks
            .lock()
            .insert(sub.id.clone(), task_token.clone())
        {
            previous.cancel();
        }

        let runner = self;
        tokio::spawn(async move {
            info!(id = %sub.id, url = %sub.url, cron = %sub.cron_expr, "scheduling subscription");

            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let delay = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);

                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                if let Err(e) = runner.run_once(&sub.id).await {
                    warn!(id = %sub.id, err = %e, "subscription tick failed");
                }
            }
        });
    }

    /// One tick: expand the subscription url and publish everything past the
    /// cursor.
    pub async fn run_once(&self, id: &str) -> Result<()> {
        let sub = self.repo.get(id).await?;

        let tree =
            playlist::fetch_tree(&sub.url, &sub.params, &self.driver_cfg.downloader_path).await?;

        let entries = if tree.is_playlist() {
            playlist::expand_entries(tree.entries.clone().unwrap_or_default(), &sub.params)?
        } else {
            let mut single = tree.clone();
            if single.url.is_empty() {
                single.url = sub.url.clone();
            }
            vec![single]
        };

        let pending = indices_to_publish(entries.len(), sub.cursor);
        let Some(&last) = pending.last() else {
            return Ok(());
        };

        for &i in &pending {
            let entry = &entries[i];
            let driver = GenericDownloader::new(
                entry.url.clone(),
                sub.params.clone(),
                self.driver_cfg.clone(),
                self.registry.completion_sender(),
            );
            driver.set_metadata(entry.clone());

            self.registry.set(driver.clone());
            self.queue.publish(driver).await;
        }

        let last = last as i64;
        self.repo.set_cursor(id, last).await?;
        info!(id = %id, published = pending.len(), cursor = last, "subscription advanced");

        Ok(())
    }
}

/// Items with index strictly past the cursor, in order.
fn indices_to_publish(len: usize, cursor: i64) -> Vec<usize> {
    (0..len).filter(|&i| i as i64 > cursor).collect()
}

/// Parse a cron expression, accepting the classic 5-field form by
/// normalising it with a seconds field.
fn parse_cron(expr: &str) -> Result<Schedule> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| Error::validation(format!("invalid cron expression '{expr}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn five_field_expressions_are_accepted() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn publishes_strictly_past_the_cursor() {
        assert_eq!(indices_to_publish(10, 3), vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(indices_to_publish(10, -1).len(), 10);
        assert!(indices_to_publish(10, 9).is_empty());
        assert!(indices_to_publish(0, -1).is_empty());
    }

    fn fake_playlist_downloader(count: usize) -> (tempfile::TempDir, String) {
        let entries: Vec<String> = (0..count)
            .map(|i| format!(r#"{{"url":"https://y/v{i}"}}"#))
            .collect();
        let json = format!(
            r#"{{"_type":"playlist","playlist_title":"T","entries":[{}]}}"#,
            entries.join(",")
        );

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake-dl");
        let mut f = std::fs::File::create(&path).expect("create script");
        writeln!(f, "#!/bin/sh\necho '{json}'").expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        (dir, path.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn tick_publishes_past_cursor_and_advances() {
        let (_dir, bin) = fake_playlist_downloader(10);

        let pool = memory_pool().await;
        let repo = SubscriptionsRepository::new(pool);
        let registry = Registry::new();
        let queue = MessageQueue::new(8, bin.clone(), CancellationToken::new()).expect("queue");

        let stored = repo
            .submit(Subscription {
                url: "https://y/playlist".to_string(),
                cron_expr: "*/5 * * * *".to_string(),
                cursor: 3,
                ..Default::default()
            })
            .await
            .expect("submit");

        let runner = TaskRunner::new(
            repo.clone(),
            registry.clone(),
            queue,
            DriverConfig {
                downloader_path: bin,
                download_dir: "/dl".into(),
            },
            CancellationToken::new(),
        );

        runner.run_once(&stored.id).await.expect("tick");

        assert_eq!(registry.len(), 6);
        assert_eq!(repo.get_cursor(&stored.id).await.expect("cursor"), 9);

        // A second tick with nothing new publishes nothing.
        runner.run_once(&stored.id).await.expect("tick");
        assert_eq!(registry.len(), 6);
    }
}
