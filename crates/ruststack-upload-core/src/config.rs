//! Upload engine configuration.
//!
//! Provides [`UploadConfig`] for tuning part sizing, concurrency, retries and
//! local request signing. Values can be loaded from environment variables.

use ruststack_upload_auth::SignerConfig;
use ruststack_upload_auth::signer::DEFAULT_EXPIRES_SECS;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::retry::RetrySpec;
use crate::state::DEFAULT_CHUNK_SIZE;

/// Upload engine configuration.
///
/// # Examples
///
/// ```
/// use ruststack_upload_core::config::UploadConfig;
///
/// let config = UploadConfig::builder().part_concurrency(2).build();
/// assert_eq!(config.part_concurrency, 2);
/// assert_eq!(config.chunk_size, 5 * 1024 * 1024);
/// assert!(config.local_signing.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// Preferred part size in bytes. Raised automatically for files that would
    /// otherwise exceed the part-count limit.
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Maximum parts in flight per file.
    #[builder(default = 6)]
    pub part_concurrency: usize,

    /// Maximum files uploading at the same time.
    #[builder(default = 5)]
    pub max_concurrent_files: usize,

    /// Retry budget for control-plane calls and part uploads.
    #[builder(default)]
    pub retry: RetrySpec,

    /// Timeout of a single part `PUT` in seconds.
    #[builder(default = 120)]
    pub request_timeout_secs: u64,

    /// Sign part requests locally from short-lived credentials instead of
    /// asking the control plane for every part.
    #[builder(default, setter(strip_option))]
    pub local_signing: Option<SignerConfig>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            part_concurrency: 6,
            max_concurrent_files: 5,
            retry: RetrySpec::default(),
            request_timeout_secs: 120,
            local_signing: None,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `UPLOAD_CHUNK_SIZE` | `5242880` |
    /// | `UPLOAD_PART_CONCURRENCY` | `6` |
    /// | `UPLOAD_MAX_CONCURRENT_FILES` | `5` |
    /// | `UPLOAD_MAX_ATTEMPTS` | `5` |
    /// | `UPLOAD_RETRY_DELAYS` | `0,1000,3000,5000` |
    /// | `UPLOAD_REQUEST_TIMEOUT` | `120` |
    /// | `UPLOAD_LOCAL_SIGNING` | `false` |
    /// | `UPLOAD_ENDPOINT` | unset |
    /// | `UPLOAD_SIGNED_URL_EXPIRES` | `300` |
    ///
    /// Setting `UPLOAD_ENDPOINT` or `UPLOAD_SIGNED_URL_EXPIRES` implies local
    /// signing.
    ///
    /// # Examples
    ///
    /// ```
    /// use ruststack_upload_core::config::UploadConfig;
    ///
    /// let config = UploadConfig::from_env();
    /// assert!(config.part_concurrency > 0);
    /// ```
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = lookup("UPLOAD_CHUNK_SIZE").and_then(|v| v.parse::<u64>().ok()) {
            config.chunk_size = n;
        }
        if let Some(n) = lookup("UPLOAD_PART_CONCURRENCY").and_then(|v| v.parse::<usize>().ok()) {
            config.part_concurrency = n;
        }
        if let Some(n) =
            lookup("UPLOAD_MAX_CONCURRENT_FILES").and_then(|v| v.parse::<usize>().ok())
        {
            config.max_concurrent_files = n;
        }
        if let Some(delays) = lookup("UPLOAD_RETRY_DELAYS").and_then(|v| parse_delays(&v)) {
            config.retry = RetrySpec::schedule(delays);
        }
        if let Some(n) = lookup("UPLOAD_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
            config.retry.max_attempts = n;
        }
        if let Some(n) = lookup("UPLOAD_REQUEST_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
            config.request_timeout_secs = n;
        }

        let endpoint = lookup("UPLOAD_ENDPOINT");
        let expires = lookup("UPLOAD_SIGNED_URL_EXPIRES").and_then(|v| v.parse::<u64>().ok());
        let enabled = lookup("UPLOAD_LOCAL_SIGNING").is_some_and(|v| parse_bool(&v));
        if enabled || endpoint.is_some() || expires.is_some() {
            config.local_signing = Some(SignerConfig {
                endpoint,
                expires_in: expires.unwrap_or(DEFAULT_EXPIRES_SECS),
                ..SignerConfig::default()
            });
        }

        config
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Parse a comma-separated list of millisecond delays.
fn parse_delays(value: &str) -> Option<Vec<u64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().ok())
        .collect()
}
