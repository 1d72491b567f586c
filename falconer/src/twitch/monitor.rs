//! Edge-triggered liveness monitor.
//!
//! One task polls every monitored user on an interval; poll results fan in
//! over the live channel and the handler fires only on the offline-to-live
//! edge.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{AuthenticationManager, Client, StreamInfo};
use crate::downloader::{DriverConfig, LiveStreamDownloader};
use crate::pipeline;
use crate::queue::MessageQueue;
use crate::registry::Registry;
use crate::Result;

/// Buffered fan-in of poll results.
const LIVE_CHANNEL_CAPACITY: usize = 16;

/// Watch-list file in the session directory.
const PERSIST_FILE: &str = "twitch-monitor.dat";

pub struct Monitor {
    monitored: RwLock<HashMap<String, Arc<Client>>>,
    last_state: Mutex<HashMap<String, bool>>,
    live_tx: mpsc::Sender<StreamInfo>,
    live_rx: Mutex<Option<mpsc::Receiver<StreamInfo>>>,
    auth: Arc<AuthenticationManager>,
    session_dir: PathBuf,
}

impl Monitor {
    pub fn new(auth: Arc<AuthenticationManager>, session_dir: PathBuf) -> Arc<Self> {
        let (live_tx, live_rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
        Arc::new(Self {
            monitored: RwLock::new(HashMap::new()),
            last_state: Mutex::new(HashMap::new()),
            live_tx,
            live_rx: Mutex::new(Some(live_rx)),
            auth,
            session_dir,
        })
    }

    pub fn add(&self, user: &str) {
        self.monitored
            .write()
            .insert(user.to_string(), Arc::new(Client::new(self.auth.clone())));
        info!(user = %user, "added user to twitch monitor");
    }

    pub fn delete_user(&self, user: &str) {
        self.monitored.write().remove(user);
        self.last_state.lock().remove(user);
    }

    pub fn monitored_users(&self) -> Vec<String> {
        self.monitored.read().keys().cloned().collect()
    }

    /// Record the latest liveness report; true when the handler must fire.
    ///
    /// Fires only on the false-to-true edge of `is_live`.
    fn observe_edge(&self, info: &StreamInfo) -> bool {
        let mut last_state = self.last_state.lock();
        let was_live = last_state
            .get(&info.user_name)
            .copied()
            .unwrap_or(false);
        last_state.insert(info.user_name.clone(), info.is_live);
        info.is_live && !was_live
    }

    /// Poll loop. Runs until the token is cancelled; poll failures are
    /// logged per tick and skipped.
    pub async fn run<H>(&self, token: CancellationToken, interval: Duration, handler: H)
    where
        H: Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync,
    {
        let Some(mut live_rx) = self.live_rx.lock().take() else {
            error!("twitch monitor already running");
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let monitored: Vec<(String, Arc<Client>)> = self
                        .monitored
                        .read()
                        .iter()
                        .map(|(user, client)| (user.clone(), client.clone()))
                        .collect();

                    for (user, client) in monitored {
                        let live_tx = self.live_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = client.poll_stream(&user, &live_tx).await {
                                error!(user = %user, err = %e, "polling failed");
                            }
                        });
                    }
                }

                info = live_rx.recv() => {
                    let Some(info) = info else { break };
                    if self.observe_edge(&info) {
                        info!(user = %info.user_name, "stream went live");
                        if let Err(e) = handler(info.user_name.clone()).await {
                            error!(user = %info.user_name, err = %e, "handler failed");
                        }
                    }
                }

                _ = token.cancelled() => {
                    info!("stopping twitch monitor");
                    break;
                }
            }
        }
    }

    /// Write the watch list to the session directory.
    pub async fn persist(&self) -> Result<()> {
        let users = self.monitored_users();
        let body = serde_json::to_vec(&users)?;
        tokio::fs::write(self.session_dir.join(PERSIST_FILE), body).await?;
        Ok(())
    }

    /// Re-add every persisted user; a missing file is an empty watch list.
    pub async fn restore(&self) -> Result<()> {
        let path = self.session_dir.join(PERSIST_FILE);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let users: Vec<String> = serde_json::from_slice(&body)?;
        for user in users {
            self.add(&user);
        }
        Ok(())
    }
}

/// The stock "went live" reaction: capture the stream through the default
/// live pipeline and hand the driver to the queue.
pub fn default_download_handler(
    registry: Arc<Registry>,
    queue: Arc<MessageQueue>,
    driver_cfg: DriverConfig,
) -> impl Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync {
    move |user: String| {
        let registry = registry.clone();
        let queue = queue.clone();
        let driver_cfg = driver_cfg.clone();

        Box::pin(async move {
            let url = format!("https://www.twitch.tv/{user}");
            let template =
                pipeline::default_live_template(&driver_cfg.download_dir, &user);
            let pipes = pipeline::build(&template);

            let driver = LiveStreamDownloader::new(
                url,
                pipes,
                driver_cfg,
                None,
                registry.completion_sender(),
            );

            registry.set(driver.clone());
            queue.publish(driver).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> Arc<Monitor> {
        Monitor::new(
            Arc::new(AuthenticationManager::new("cid", "secret")),
            std::env::temp_dir(),
        )
    }

    fn report(user: &str, is_live: bool) -> StreamInfo {
        StreamInfo {
            user_name: user.to_string(),
            is_live,
            ..Default::default()
        }
    }

    #[test]
    fn handler_fires_only_on_the_live_edge() {
        let m = monitor();

        assert!(!m.observe_edge(&report("u", false)));
        assert!(m.observe_edge(&report("u", true)));
        assert!(!m.observe_edge(&report("u", true)));
        assert!(!m.observe_edge(&report("u", false)));
        assert!(m.observe_edge(&report("u", true)));
    }

    #[test]
    fn edges_are_tracked_per_user() {
        let m = monitor();

        assert!(m.observe_edge(&report("a", true)));
        assert!(m.observe_edge(&report("b", true)));
        assert!(!m.observe_edge(&report("a", true)));
    }

    #[test]
    fn delete_user_forgets_the_edge_state() {
        let m = monitor();
        m.add("u");

        assert!(m.observe_edge(&report("u", true)));
        m.delete_user("u");
        assert!(m.monitored_users().is_empty());

        // Re-adding starts from a clean slate.
        assert!(m.observe_edge(&report("u", true)));
    }

    #[tokio::test]
    async fn watch_list_round_trips_through_the_session_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let auth = Arc::new(AuthenticationManager::new("cid", "secret"));

        let m = Monitor::new(auth.clone(), dir.path().to_path_buf());
        m.add("alpha");
        m.add("beta");
        m.persist().await.expect("persist");

        let restored = Monitor::new(auth, dir.path().to_path_buf());
        restored.restore().await.expect("restore");

        let mut users = restored.monitored_users();
        users.sort();
        assert_eq!(users, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn restore_without_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let m = Monitor::new(
            Arc::new(AuthenticationManager::new("cid", "secret")),
            dir.path().to_path_buf(),
        );

        m.restore().await.expect("restore");
        assert!(m.monitored_users().is_empty());
    }
}
