//! Error taxonomy, one enum per concern.

use thiserror::Error;

use crate::config::IdentifierKind;

/// Backing-store errors.
///
/// `KeyNotFound` is an expected outcome on lazy-create paths and is matched
/// on by callers; the remaining variants are reported or degraded per the
/// fail-open policy at each call site.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish or keep a connection to the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The requested key does not exist (RESP nil bulk reply, TTL -2).
    #[error("key not found")]
    KeyNotFound,

    /// The store replied with an error frame.
    #[error("redis error: {0}")]
    Server(String),

    /// Socket-level failure mid-command.
    #[error("i/o failure: {0}")]
    Io(String),

    /// The reply did not parse as RESP.
    #[error("malformed reply: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// A duration literal that did not parse.
#[derive(Debug, Error)]
#[error("invalid duration {literal:?}: {reason}")]
pub struct DurationError {
    pub literal: String,
    pub reason: String,
}

/// Configuration validation failures. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("redis address is required")]
    MissingStoreAddress,

    #[error("at least one identifier rule is required")]
    NoRules,

    #[error("identifier rule {index} ({key}): {source}")]
    Rule {
        index: usize,
        key: String,
        #[source]
        source: RuleError,
    },
}

/// Per-rule validation failures, reported with the rule's index and key.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("field name is required for {kind} identification")]
    MissingFieldName { kind: IdentifierKind },

    #[error("at least one of rate limit or quota must be enabled")]
    NothingEnabled,

    #[error("rate must be positive when rate limiting is enabled")]
    NonPositiveRate,

    #[error("burst must be positive when rate limiting is enabled")]
    NonPositiveBurst,

    #[error("quota limit must be positive when quota is enabled")]
    NonPositiveLimit,

    #[error("invalid rate limit period: {0}")]
    InvalidPeriod(#[from] DurationError),
}

/// Umbrella error for middleware construction.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
