//! Helix streams client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::AuthenticationManager;
use crate::{Error, Result};

/// Production API base.
const API_BASE: &str = "https://api.twitch.tv/helix";

/// Liveness report for one polled user.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub id: String,
    pub user_name: String,
    pub title: String,
    pub game_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub is_live: bool,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    data: Vec<StreamData>,
}

#[derive(Debug, Deserialize)]
struct StreamData {
    id: String,
    user_name: String,
    title: String,
    game_name: String,
    started_at: String,
}

pub struct Client {
    auth: Arc<AuthenticationManager>,
    http: reqwest::Client,
    api_base: String,
}

impl Client {
    pub fn new(auth: Arc<AuthenticationManager>) -> Self {
        Self::with_endpoint(auth, API_BASE)
    }

    /// Point at a different API base (tests).
    pub fn with_endpoint(auth: Arc<AuthenticationManager>, api_base: impl Into<String>) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    /// Query the streams endpoint for one user and report the result on the
    /// live channel. An absent stream is an explicit "not live" report; the
    /// monitor needs both edges.
    pub async fn poll_stream(
        &self,
        user: &str,
        live_tx: &mpsc::Sender<StreamInfo>,
    ) -> Result<()> {
        let token = self.auth.access_token().await?;

        let response = self
            .http
            .get(format!("{}/streams", self.api_base))
            .query(&[("user_login", user)])
            .header("Client-Id", self.auth.client_id())
            .bearer_auth(&token.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Monitor(format!(
                "streams endpoint returned {}",
                response.status()
            )));
        }

        let streams: StreamsResponse = response.json().await?;

        let info = match streams.data.into_iter().next() {
            None => StreamInfo {
                user_name: user.to_string(),
                ..Default::default()
            },
            Some(stream) => StreamInfo {
                id: stream.id,
                user_name: stream.user_name,
                title: stream.title,
                game_name: stream.game_name,
                started_at: DateTime::parse_from_rfc3339(&stream.started_at)
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
                is_live: true,
            },
        };

        live_tx
            .send(info)
            .await
            .map_err(|_| Error::Monitor("live channel closed".to_string()))?;
        Ok(())
    }
}
