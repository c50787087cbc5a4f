use std::time::Duration;

/// Errors surfaced by this crate.
///
/// Three categories, matching the distinction the pool's callers care
/// about: background failures that are only logged (`UrlRefresh`),
/// caller-visible exhaustion (`NoFreeProxies`, `AliveProxiesNotFound`),
/// and programmer/configuration mistakes (everything else).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Refreshing a `url`-sourced registry failed after exhausting
    /// retries. Never raised to `acquire` callers — only logged.
    #[error("proxy list refresh from {url} failed after {attempts} attempts: {source}")]
    UrlRefresh {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// `acquire(timeout)` could not return an address before the
    /// timeout elapsed.
    #[error("no free proxies available within {timeout:?}")]
    NoFreeProxies { timeout: Option<Duration> },

    /// All chains in a `MultiChain` ring are exhausted.
    #[error("no alive proxies found across any chain in the ring")]
    AliveProxiesNotFound,

    /// Configuration names neither `list`, `url`, nor `file`.
    #[error("proxy source not configured: one of `list`, `url`, or `file` is required")]
    NoSourceConfigured,

    /// `smart_holdout` requested without `smart_holdout_start`.
    #[error("smart_holdout requires smart_holdout_start > 0")]
    SmartHoldoutMisconfigured,

    /// A proxy-list file or persistent-map file could not be read or
    /// parsed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A persistent-map JSON file was malformed.
    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProxyError>;
