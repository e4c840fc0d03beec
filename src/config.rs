//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::checkpoint::DedupPolicy;
use crate::{AppError, Result};

/// Keychain service name holding the session cookie.
pub const KEYRING_SERVICE: &str = "brambles-stream";

/// Environment variable consulted when the keychain has no session cookie.
pub const SESSION_COOKIE_ENV: &str = "BRAMBLES_SESSION_COOKIE";

/// Stream handling knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Silence on an open stream before it is treated as stalled.
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    /// TCP/TLS connect timeout for stream requests.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Duplicate suppression rule applied to incoming words.
    #[serde(default)]
    pub dedup: DedupPolicy,
    /// Checkpoints older than this are discarded on startup; 0 disables.
    #[serde(default = "default_checkpoint_ttl_hours")]
    pub checkpoint_ttl_hours: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            dedup: DedupPolicy::default(),
            checkpoint_ttl_hours: default_checkpoint_ttl_hours(),
        }
    }
}

fn default_inactivity_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_checkpoint_ttl_hours() -> u64 {
    24
}

/// Resume attempt policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Consecutive failures tolerated before giving up; 0 means unlimited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second consecutive attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_session_key() -> String {
    "default".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// API root the chat endpoints hang off (e.g. `http://localhost:8080/api/v1`).
    pub base_url: String,
    /// Checkpoint database location; defaults under the home directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Checkpoint slot owned by this client.
    #[serde(default = "default_session_key")]
    pub session_key: String,
    /// Stream handling knobs.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Resume attempt policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Session cookie (populated at runtime, never read from TOML).
    #[serde(skip)]
    pub session_cookie: Option<String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the session cookie from the OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither the keychain nor
    /// `BRAMBLES_SESSION_COOKIE` provides a cookie.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.session_cookie = Some(load_credential("session_cookie", SESSION_COOKIE_ENV).await?);
        Ok(())
    }

    /// API root without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Effective checkpoint database path.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
            Some(home) => PathBuf::from(home).join(".brambles").join("stream.db"),
            None => PathBuf::from("brambles-stream.db"),
        }
    }

    /// Watchdog deadline.
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.stream.inactivity_timeout_ms)
    }

    /// Transport connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.stream.connect_timeout_ms)
    }

    /// Age beyond which a persisted checkpoint is not resumed.
    #[must_use]
    pub fn checkpoint_ttl(&self) -> Option<chrono::Duration> {
        match self.stream.checkpoint_ttl_hours {
            0 => None,
            hours => i64::try_from(hours).ok().map(chrono::Duration::hours),
        }
    }

    fn validate(&mut self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|err| AppError::Config(format!("base_url invalid: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "base_url must use http or https, got {}",
                url.scheme()
            )));
        }

        if self.session_key.trim().is_empty() {
            return Err(AppError::Config("session_key must not be empty".into()));
        }

        if self.stream.inactivity_timeout_ms == 0 {
            return Err(AppError::Config(
                "inactivity_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(AppError::Config(
                "max_backoff_ms must not be less than initial_backoff_ms".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
