//! Fixed-window quota counter over the backing store.
//!
//! One integer key per identifier and window, `quota:<identifier>:<label>`.
//! The first consume of a window creates the key and bounds it with a TTL
//! reaching the window's end, so roll-over is plain key expiry; nothing is
//! scheduled and nothing is ever decremented.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use tollgate_core::config::QuotaConfig;
use tollgate_core::decision::QuotaInfo;
use tollgate_core::error::StoreError;
use tollgate_core::period::QuotaPeriod;
use tollgate_core::ports::StoreClient;

/// Store key for an identifier's counter in the window named `label`.
pub fn quota_key(identifier: &str, label: &str) -> String {
    format!("quota:{identifier}:{label}")
}

/// Per-rule quota engine. Immutable after construction and safe to share
/// across request tasks.
#[derive(Clone)]
pub struct QuotaCounter {
    store: Arc<dyn StoreClient>,
    enabled: bool,
    limit: i64,
    period: QuotaPeriod,
}

impl QuotaCounter {
    pub fn new(store: Arc<dyn StoreClient>, config: &QuotaConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            limit: config.limit,
            period: config.period,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn period(&self) -> QuotaPeriod {
        self.period
    }

    /// Read-only admission gate: allowed while `used < limit`. Unreadable
    /// counters report zero usage, failing open.
    pub async fn check(&self, identifier: &str) -> (bool, QuotaInfo) {
        let info = self.info(identifier).await;
        (info.used < info.limit, info)
    }

    /// Charge `amount` units (at least one) against the current window.
    /// When this call creates the key, its TTL is set to the time remaining
    /// until the window boundary.
    pub async fn consume(&self, identifier: &str, amount: i64) -> Result<QuotaInfo, StoreError> {
        let amount = amount.max(1);
        let now = Local::now();
        let key = quota_key(identifier, &self.period.label(now));

        let new_used = self.store.incr_by(&key, amount).await?;

        if new_used == amount {
            let reset_time = self.period.next_reset(now);
            let until_reset = (reset_time - now).to_std().unwrap_or(Duration::ZERO);
            self.store.expire(&key, until_reset).await?;
        }

        Ok(self.info(identifier).await)
    }

    /// Snapshot the current window. Missing keys count as zero usage; store
    /// failures log and also count as zero (fail open).
    pub async fn info(&self, identifier: &str) -> QuotaInfo {
        let now = Local::now();
        let key = quota_key(identifier, &self.period.label(now));

        let used = match self.store.get(&key).await {
            Ok(raw) => raw.parse::<i64>().unwrap_or(0),
            Err(StoreError::KeyNotFound) => 0,
            Err(e) => {
                tracing::warn!(identifier, error = %e, "quota read failed, assuming zero usage");
                0
            }
        };

        let reset_time = self.period.next_reset(now);
        QuotaInfo {
            limit: self.limit,
            used,
            remaining: (self.limit - used).max(0),
            period: self.period,
            reset_time,
            reset_in: (reset_time - now).to_std().unwrap_or(Duration::ZERO),
        }
    }

    /// Zero the identifier's counter for the current window.
    pub async fn reset(&self, identifier: &str) -> Result<(), StoreError> {
        let key = quota_key(identifier, &self.period.label(Local::now()));
        self.store.set(&key, "0", Duration::ZERO).await
    }

    /// Overwrite the identifier's usage for the current window.
    pub async fn set_usage(&self, identifier: &str, usage: i64) -> Result<(), StoreError> {
        let key = quota_key(identifier, &self.period.label(Local::now()));
        self.store.set(&key, &usage.to_string(), Duration::ZERO).await
    }

    /// Usage per window label, for inspection. Missing windows report zero.
    pub async fn usage_history(
        &self,
        identifier: &str,
        labels: &[&str],
    ) -> HashMap<String, i64> {
        let mut history = HashMap::with_capacity(labels.len());
        for label in labels {
            let key = quota_key(identifier, label);
            let used = match self.store.get(&key).await {
                Ok(raw) => raw.parse::<i64>().unwrap_or(0),
                Err(_) => 0,
            };
            history.insert((*label).to_string(), used);
        }
        history
    }
}
