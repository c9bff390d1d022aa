//! Per-rule engines and the per-request verdict.

use std::sync::Arc;

use actix_web::dev::ServiceRequest;

use tollgate_core::config::{IdentifierRule, QuotaConfig, RateLimitConfig};
use tollgate_core::decision::{QuotaInfo, RateLimitInfo};
use tollgate_core::error::{ConfigError, RuleError};
use tollgate_core::ports::StoreClient;
use tollgate_infra::{QuotaCounter, TokenBucketLimiter};

use crate::resolver;

/// One identifier rule with its engines, built once at construction and
/// iterated in priority order on every request.
pub(crate) struct RuleEngines {
    pub rule: IdentifierRule,
    pub limiter: Option<TokenBucketLimiter>,
    pub quota: QuotaCounter,
}

impl RuleEngines {
    pub fn build(
        rules: &[IdentifierRule],
        store: &Arc<dyn StoreClient>,
    ) -> Result<Vec<Self>, ConfigError> {
        rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let limiter = if rule.rate_limit.enabled {
                    let limiter = TokenBucketLimiter::new(Arc::clone(store), &rule.rate_limit)
                        .map_err(|source| ConfigError::Rule {
                            index,
                            key: rule.key(),
                            source: RuleError::InvalidPeriod(source),
                        })?;
                    Some(limiter)
                } else {
                    None
                };

                tracing::info!(
                    rule = %rule.key(),
                    rate = %describe_rate(&rule.rate_limit),
                    quota = %describe_quota(&rule.quota),
                    "initialized identifier rule"
                );

                Ok(Self {
                    rule: rule.clone(),
                    limiter,
                    quota: QuotaCounter::new(Arc::clone(store), &rule.quota),
                })
            })
            .collect()
    }
}

fn describe_rate(config: &RateLimitConfig) -> String {
    if config.enabled {
        let period = if config.period.is_empty() { "1m" } else { &config.period };
        format!("{}/{}", config.rate, period)
    } else {
        "disabled".to_string()
    }
}

fn describe_quota(config: &QuotaConfig) -> String {
    if config.enabled {
        format!("{}/{}", config.limit, config.period)
    } else {
        "disabled".to_string()
    }
}

/// Walk the rules in priority order; first match wins.
pub(crate) fn resolve(engines: &[RuleEngines], req: &ServiceRequest) -> Option<(usize, String)> {
    engines.iter().enumerate().find_map(|(index, engine)| {
        resolver::extract_identifier(req, &engine.rule).map(|identifier| (index, identifier))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DenyReason {
    RateLimit,
    Quota,
}

impl DenyReason {
    pub fn text(self) -> &'static str {
        match self {
            DenyReason::RateLimit => "Rate limit exceeded",
            DenyReason::Quota => "Quota exceeded",
        }
    }
}

/// Outcome of evaluating one request against its matched rule.
pub(crate) enum Verdict {
    Pass {
        rate: Option<RateLimitInfo>,
        quota: Option<QuotaInfo>,
    },
    Deny {
        reason: DenyReason,
        status: u16,
        body: String,
        rate: Option<RateLimitInfo>,
        quota: Option<QuotaInfo>,
    },
}

/// Evaluate limiter and quota for a matched identifier. The limiter
/// consumes a token here; the quota is only gated, its unit is charged
/// after the downstream handler by [`QuotaCharge`]. Store failures fail
/// open on both paths.
pub(crate) async fn evaluate(engines: &RuleEngines, identifier: &str) -> Verdict {
    let mut rate_info = None;
    if let Some(limiter) = &engines.limiter {
        let allowed = match limiter.allow(identifier).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(identifier, error = %e, "rate limiter write failed, failing open");
                true
            }
        };
        let info = limiter.info(identifier).await;
        if !allowed {
            return Verdict::Deny {
                reason: DenyReason::RateLimit,
                status: engines.rule.rate_limit.deny_status,
                body: engines.rule.rate_limit.deny_body.clone(),
                rate: Some(info),
                quota: None,
            };
        }
        rate_info = Some(info);
    }

    let mut quota_info = None;
    if engines.quota.is_enabled() {
        let (allowed, info) = engines.quota.check(identifier).await;
        if !allowed {
            return Verdict::Deny {
                reason: DenyReason::Quota,
                status: engines.rule.quota.deny_status,
                body: engines.rule.quota.deny_body.clone(),
                rate: rate_info,
                quota: Some(info),
            };
        }
        quota_info = Some(info);
    }

    Verdict::Pass {
        rate: rate_info,
        quota: quota_info,
    }
}

/// Bills one quota unit when dropped.
///
/// Armed right before the downstream dispatch: a request future dropped
/// earlier charges nothing, while one cancelled mid-handler is still
/// billed. The increment is detached so it survives the request task.
pub(crate) struct QuotaCharge {
    counter: QuotaCounter,
    identifier: String,
}

impl QuotaCharge {
    pub fn new(counter: QuotaCounter, identifier: String) -> Self {
        Self { counter, identifier }
    }
}

impl Drop for QuotaCharge {
    fn drop(&mut self) {
        let counter = self.counter.clone();
        let identifier = std::mem::take(&mut self.identifier);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = counter.consume(&identifier, 1).await {
                    tracing::warn!(identifier = %identifier, error = %e, "failed to record quota consumption");
                }
            });
        }
    }
}
