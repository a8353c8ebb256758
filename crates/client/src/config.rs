//! Feed configuration.
//!
//! Defaults match the reference deployment. Every value can be overridden from
//! the environment with `FeedConfig::from_env`.

use std::sync::LazyLock;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_STREAM_URL: &str = "http://localhost:8080/api/events/stream";
pub const DEFAULT_TOKEN_PARAM: &str = "token";
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 1_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

// Parsed once; the constant above is covered by `defaults_match_reference_values`.
static DEFAULT_ENDPOINT: LazyLock<Url> =
    LazyLock::new(|| Url::parse(DEFAULT_STREAM_URL).expect("valid default stream URL"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{var} must be a whole number of milliseconds, got {value:?}")]
    InvalidMillis { var: &'static str, value: String },

    #[error("retry base delay ({base_ms}ms) exceeds max delay ({max_ms}ms)")]
    InvertedDelays { base_ms: u64, max_ms: u64 },
}

/// Reconnect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry after a failure.
    pub base_delay: Duration,
    /// Cap on exponential growth.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

/// Everything the transport needs besides its ports.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Stream endpoint, without the credential.
    pub endpoint: Url,
    /// Query parameter the credential travels in.
    pub token_param: String,
    pub retry: RetryConfig,
    /// Pause before the first connect, applied by the hosting process.
    pub startup_grace: Duration,
    /// Deadline for an attempt to receive response headers. Expiry counts as
    /// a failed attempt.
    pub handshake_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.clone(),
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            retry: RetryConfig::default(),
            startup_grace: Duration::from_millis(DEFAULT_STARTUP_GRACE_MS),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        }
    }
}

impl FeedConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Read overrides from the process environment.
    ///
    /// Unset variables keep their defaults; set but malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("CASEFEED_STREAM_URL") {
            config.endpoint = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
                var: "CASEFEED_STREAM_URL",
                source,
            })?;
        }
        if let Some(param) = lookup("CASEFEED_TOKEN_PARAM") {
            let param = param.trim();
            if !param.is_empty() {
                config.token_param = param.to_string();
            }
        }
        if let Some(ms) = millis(&lookup, "CASEFEED_RETRY_BASE_MS")? {
            config.retry.base_delay = ms;
        }
        if let Some(ms) = millis(&lookup, "CASEFEED_RETRY_MAX_MS")? {
            config.retry.max_delay = ms;
        }
        if let Some(ms) = millis(&lookup, "CASEFEED_STARTUP_GRACE_MS")? {
            config.startup_grace = ms;
        }

        if let Some(ms) = millis(&lookup, "CASEFEED_HANDSHAKE_TIMEOUT_MS")? {
            if ms.is_zero() {
                return Err(ConfigError::InvalidMillis {
                    var: "CASEFEED_HANDSHAKE_TIMEOUT_MS",
                    value: "0".to_string(),
                });
            }
            config.handshake_timeout = ms;
        }

        if config.retry.base_delay > config.retry.max_delay {
            return Err(ConfigError::InvertedDelays {
                base_ms: config.retry.base_delay.as_millis() as u64,
                max_ms: config.retry.max_delay.as_millis() as u64,
            });
        }

        Ok(config)
    }

    /// Endpoint with the credential appended as a query parameter.
    ///
    /// The stream transport cannot carry custom headers, so the credential is
    /// part of the request target.
    pub fn stream_url(&self, credential: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(&self.token_param, credential);
        url
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidMillis { var, value }),
    }
}

/// Strip the query string so a URL can be logged without leaking the credential.
pub fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
