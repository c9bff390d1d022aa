//! Gate configuration model.
//!
//! The schema mirrors the proxy's dynamic-configuration format: a
//! `persistence.redis` block and an ordered list of identifier rules, each
//! carrying its own rate-limit and quota settings. Field names are accepted
//! in canonical lower-case and in capitalized form.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DurationError, RuleError};
use crate::period::QuotaPeriod;

/// Complete gate configuration. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(alias = "Persistence")]
    pub persistence: PersistenceConfig,
    #[serde(alias = "Identifiers", default)]
    pub identifiers: Vec<IdentifierRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(alias = "Redis", default)]
    pub redis: StoreConfig,
}

/// Backing-store connection target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `host:port` of the store.
    #[serde(alias = "Address", default)]
    pub address: String,
    /// Optional AUTH password.
    #[serde(alias = "Password", default)]
    pub password: String,
    /// Database index, selected once at connect when non-zero.
    #[serde(alias = "DB", alias = "Db", default)]
    pub db: u32,
}

/// Where an identifier is extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierKind {
    #[serde(alias = "header")]
    Header,
    #[serde(alias = "cookie")]
    Cookie,
    #[serde(alias = "query")]
    Query,
    #[serde(rename = "IP", alias = "ip", alias = "Ip")]
    Ip,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::Header => write!(f, "Header"),
            IdentifierKind::Cookie => write!(f, "Cookie"),
            IdentifierKind::Query => write!(f, "Query"),
            IdentifierKind::Ip => write!(f, "IP"),
        }
    }
}

/// One identifier rule. Rule order in the list is match priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierRule {
    #[serde(rename = "type", alias = "Type")]
    pub kind: IdentifierKind,
    /// Header/cookie/query field name. Unused for IP rules.
    #[serde(alias = "Name", default)]
    pub name: String,
    /// Expected value for Header rules, fallback identifier otherwise.
    #[serde(alias = "Value", default)]
    pub value: String,
    #[serde(rename = "rate_limit", alias = "RateLimit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(alias = "Quota", default)]
    pub quota: QuotaConfig,
}

impl IdentifierRule {
    /// Stable `type:name:value` key used in logs and error messages.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.name, self.value)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.kind != IdentifierKind::Ip && self.name.is_empty() {
            return Err(RuleError::MissingFieldName { kind: self.kind });
        }
        if !self.rate_limit.enabled && !self.quota.enabled {
            return Err(RuleError::NothingEnabled);
        }
        if self.rate_limit.enabled {
            if self.rate_limit.rate == 0 {
                return Err(RuleError::NonPositiveRate);
            }
            if self.rate_limit.burst == 0 {
                return Err(RuleError::NonPositiveBurst);
            }
            self.rate_limit.period()?;
        }
        if self.quota.enabled && self.quota.limit <= 0 {
            return Err(RuleError::NonPositiveLimit);
        }
        Ok(())
    }
}

/// Token-bucket settings for one rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(alias = "Enabled", default)]
    pub enabled: bool,
    /// Tokens added per `period`.
    #[serde(alias = "Rate", default)]
    pub rate: u32,
    /// Bucket capacity.
    #[serde(alias = "Burst", default)]
    pub burst: u32,
    /// Refill period literal (`"1s"`, `"1m"`, `"1h30m"`, ...). Empty means
    /// one minute.
    #[serde(alias = "Period", default)]
    pub period: String,
    #[serde(
        rename = "response_reached_limit_code",
        alias = "ResponseReachedLimitCode",
        default
    )]
    pub deny_status: u16,
    #[serde(
        rename = "response_reached_limit_body",
        alias = "ResponseReachedLimitBody",
        default
    )]
    pub deny_body: String,
}

impl RateLimitConfig {
    /// Parsed refill period, defaulting to one minute for an empty literal.
    pub fn period(&self) -> Result<Duration, DurationError> {
        if self.period.is_empty() {
            return Ok(Duration::from_secs(60));
        }
        parse_duration(&self.period)
    }
}

/// Fixed-window quota settings for one rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(alias = "Enabled", default)]
    pub enabled: bool,
    #[serde(alias = "Limit", default)]
    pub limit: i64,
    #[serde(alias = "Period", default)]
    pub period: QuotaPeriod,
    #[serde(
        rename = "response_reached_limit_code",
        alias = "ResponseReachedLimitCode",
        default
    )]
    pub deny_status: u16,
    #[serde(
        rename = "response_reached_limit_body",
        alias = "ResponseReachedLimitBody",
        default
    )]
    pub deny_body: String,
}

impl GateConfig {
    /// Validate the whole configuration. Any failure here is fatal and must
    /// abort startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence.redis.address.is_empty() {
            return Err(ConfigError::MissingStoreAddress);
        }
        if self.identifiers.is_empty() {
            return Err(ConfigError::NoRules);
        }
        for (index, rule) in self.identifiers.iter().enumerate() {
            rule.validate().map_err(|source| ConfigError::Rule {
                index,
                key: rule.key(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Parse a `<n><unit>` duration literal. Units are `ns`, `us`, `ms`, `s`,
/// `m`, `h`; segments may be compounded (`"1h30m"`) and carry decimals
/// (`"1.5s"`).
pub fn parse_duration(literal: &str) -> Result<Duration, DurationError> {
    let err = |reason: String| DurationError {
        literal: literal.to_string(),
        reason,
    };

    let mut rest = literal.trim();
    if rest.is_empty() {
        return Err(err("empty literal".to_string()));
    }

    let mut total_secs = 0.0_f64;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(err("expected a number".to_string()));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| err(format!("malformed number {:?}", &rest[..num_end])))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(err("missing unit".to_string())),
            other => return Err(err(format!("unknown unit {other:?}"))),
        };
        rest = &rest[unit_end..];
        total_secs += value * scale;
    }

    Ok(Duration::from_secs_f64(total_secs))
}
