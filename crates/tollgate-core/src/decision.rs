//! Decision records surfaced to callers as response headers.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::period::QuotaPeriod;

/// Snapshot of a token bucket, taken after refill.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Tokens added per period.
    pub limit: u32,
    /// Bucket capacity.
    pub burst: u32,
    /// Whole tokens currently available.
    pub available: i64,
    /// When the next token becomes available.
    pub reset_time: DateTime<Local>,
    /// Suggested client back-off; zero when the bucket is full.
    pub retry_after: Duration,
}

/// Snapshot of a quota counter for the current window.
#[derive(Debug, Clone)]
pub struct QuotaInfo {
    pub limit: i64,
    pub used: i64,
    /// `max(limit - used, 0)`.
    pub remaining: i64,
    pub period: QuotaPeriod,
    /// End of the current window.
    pub reset_time: DateTime<Local>,
    pub reset_in: Duration,
}
