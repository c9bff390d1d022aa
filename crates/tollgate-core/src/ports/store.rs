//! Backing-store port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Command surface of the backing store, abstracted so tests can substitute
/// an in-memory fake. The RESP wire client is one provider.
///
/// Implementations must serialise command framing per handle; callers never
/// interleave a request across two commands.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Liveness probe; returns the server's pong text.
    async fn ping(&self) -> Result<String, StoreError>;

    /// Fetch a string value. Missing keys are `StoreError::KeyNotFound`.
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Store a string value. A zero `ttl` means no expiration; otherwise the
    /// key expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment an integer key by one, creating it at zero.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomically increment an integer key by `delta`, creating it at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Set a key's time to live. Missing keys are `StoreError::KeyNotFound`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remaining time to live. `Ok(None)` means the key has no expiration;
    /// a missing key is `StoreError::KeyNotFound`.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Number of the given keys that exist.
    async fn exists(&self, keys: &[&str]) -> Result<i64, StoreError>;
}
