// Author: Jacques Murray

//! Client configuration.
//!
//! A plain struct handed to [`Client::new`](crate::Client::new). It can be
//! built in code or loaded from TOML:
//!
//! ```toml
//! api_base_url = "https://sandbox.bca.co.id"
//! client_id = "b095ac9d-2d21-42a3-a70c-4781f4570704"
//! client_secret = "bedd1f8d-3bd6-4d4a-8cb4-e61db41691c9"
//! api_key = "dcc99ba6-3b2f-479b-9f85-86a09ccaaacf"
//! api_secret = "5e636b16-df7f-4a53-afbe-497e6fe07edc"
//! origin = "yourdomain.com"
//!
//! [log]
//! path = "/var/log/bca/bca.log"
//! max_size_mb = 500
//!
//! [retry]
//! max_retries = 2
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::backoff::{self, Backoff};
use crate::classify::{ErrorClassifier, INVALID_TOKEN_CODE};
use crate::error::Error;
use crate::MAX_RETRY_ATTEMPTS;

/// Remote endpoint, credentials and the nested log/retry settings.
#[derive(Clone, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
    pub api_secret: String,
    /// Sent as the `Origin` header on business calls.
    #[serde(default)]
    pub origin: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks the fields a client cannot work without.
    pub fn validate(&self) -> Result<(), Error> {
        Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("api_base_url {:?}: {}", self.api_base_url, e)))?;

        for (name, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }

        if self.log.max_size_mb == 0 {
            return Err(Error::Config("log.max_size_mb must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash.
    pub(crate) fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("origin", &self.origin)
            .field("timeout_secs", &self.timeout_secs)
            .field("log", &self.log)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Where and how session logs are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Active log file. Rotated segments are written next to it.
    pub path: PathBuf,
    /// Size at which the active file is rotated, in megabytes.
    pub max_size_mb: u64,
    /// How many rotated segments to keep. `None` keeps all of them.
    pub max_backups: Option<usize>,
    /// Minimum level written, e.g. `"info"`.
    pub level: String,
    /// Also write every entry to standard output.
    pub stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bca.log"),
            max_size_mb: 500,
            max_backups: None,
            level: "info".to_string(),
            stdout: true,
        }
    }
}

impl LogConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// The session-recovery retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// The only error code that triggers re-authentication and a retry.
    pub recoverable_code: String,
    /// Delay before the first retry; doubles for each later one.
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_ATTEMPTS,
            recoverable_code: INVALID_TOKEN_CODE.to_string(),
            base_delay_ms: 100,
            max_jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    /// A policy that retries without waiting. Useful in tests.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_jitter_ms: 0,
            ..Self::default()
        }
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.recoverable_code.clone())
    }

    pub fn delays(&self) -> impl Backoff + Send + 'static {
        backoff::session_retry_delays(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_jitter_ms),
        )
    }
}
