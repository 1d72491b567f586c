//! Application configuration.
//!
//! Loaded once at startup from a YAML file with `APP_`-prefixed environment
//! overrides, then frozen behind a process-wide accessor. Treat the instance
//! as immutable after startup.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default Twitch polling interval in seconds.
const DEFAULT_TWITCH_CHECK_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub authentication: AuthConfig,
    #[serde(default)]
    pub openid: OpenIdConfig,
    #[serde(default)]
    pub auto_archive: bool,
    #[serde(default)]
    pub twitch: TwitchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub host: String,
    pub port: u16,
    pub queue_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            host: "0.0.0.0".to_string(),
            port: 3033,
            queue_size: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub download_path: String,
    pub downloader_path: String,
    pub local_database_path: String,
    pub session_file_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_path: ".".to_string(),
            downloader_path: "yt-dlp".to_string(),
            local_database_path: ".".to_string(),
            session_file_path: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_path: String,
    pub enable_file_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_path: "falconer.log".to_string(),
            enable_file_logging: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub username: String,
    /// bcrypt hash of the password.
    #[serde(default, rename = "password")]
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OpenIdConfig {
    #[serde(default)]
    pub use_openid: bool,
    #[serde(default)]
    pub openid_provider_url: String,
    #[serde(default)]
    pub openid_client_id: String,
    #[serde(default)]
    pub openid_client_secret: String,
    #[serde(default)]
    pub openid_redirect_url: String,
    #[serde(default)]
    pub openid_email_whitelist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Polling interval in seconds.
    pub check_interval: u64,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            check_interval: DEFAULT_TWITCH_CHECK_INTERVAL_SECS,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file (if present) with `APP_` environment overrides.
    ///
    /// Nested keys map as `APP_SERVER__QUEUE_SIZE`, `APP_PATHS__DOWNLOAD_PATH`
    /// and so on.
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg = builder
            .build()
            .map_err(|e| Error::config(e.to_string()))?
            .try_deserialize::<AppConfig>()
            .map_err(|e| Error::config(e.to_string()))?;

        Ok(cfg)
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.download_path)
    }

    pub fn database_file(&self) -> PathBuf {
        PathBuf::from(&self.paths.local_database_path).join("falconer.db")
    }

    pub fn session_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.session_file_path)
    }

    pub fn twitch_check_interval(&self) -> Duration {
        Duration::from_secs(self.twitch.check_interval)
    }
}

static INSTANCE: OnceLock<AppConfig> = OnceLock::new();

/// Freeze the loaded configuration for the lifetime of the process.
pub fn init(cfg: AppConfig) -> &'static AppConfig {
    INSTANCE.get_or_init(|| cfg)
}

/// Process-wide accessor. Falls back to defaults when `init` was never
/// called (tests).
pub fn instance() -> &'static AppConfig {
    INSTANCE.get_or_init(AppConfig::default)
}
