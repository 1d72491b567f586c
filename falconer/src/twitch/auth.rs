//! OAuth client-credentials token cache.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Production token endpoint.
const AUTH_URL: &str = "https://id.twitch.tv/oauth2/token";

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: i64,
    #[allow(dead_code)]
    token_type: String,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

impl AccessToken {
    fn is_valid(&self) -> bool {
        self.expiry > Utc::now()
    }
}

/// Caches the app access token and refreshes it lazily once expired.
///
/// The cache lock also serialises refreshes, so a burst of polls costs one
/// token request.
pub struct AuthenticationManager {
    client_id: String,
    client_secret: String,
    auth_url: String,
    http: reqwest::Client,
    token: Mutex<Option<AccessToken>>,
}

impl AuthenticationManager {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::with_endpoint(client_id, client_secret, AUTH_URL)
    }

    /// Point at a different token endpoint (tests).
    pub fn with_endpoint(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: auth_url.into(),
            http: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Cached token, refetched when past expiry.
    pub async fn access_token(&self) -> Result<AccessToken> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_valid()
        {
            return Ok(token.clone());
        }

        let response = self
            .http
            .post(&self.auth_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Monitor(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let auth: AuthResponse = response.json().await?;
        let token = AccessToken {
            token: auth.access_token,
            expiry: Utc::now() + chrono::Duration::seconds(auth.expires_in),
        };

        *cached = Some(token.clone());
        Ok(token)
    }
}
