//! Identifier resolution.
//!
//! Rules are walked in configured order and the first match wins. Extraction
//! is a total function per kind; an empty result counts as no match and the
//! walk continues.

use std::collections::HashMap;

use actix_web::dev::ServiceRequest;
use actix_web::web::Query;

use tollgate_core::config::{IdentifierKind, IdentifierRule};

/// Header `expected_value`s that act as fallback identifiers when the
/// header is absent, so anonymous traffic can be tiered explicitly.
pub const FALLBACK_VALUES: [&str; 3] = ["sk-unknown", "anonymous", "guest"];

/// Extract the identifier for one rule, or `None` when the rule does not
/// match this request.
pub fn extract_identifier(req: &ServiceRequest, rule: &IdentifierRule) -> Option<String> {
    let identifier = match rule.kind {
        IdentifierKind::Header => {
            let value = req
                .headers()
                .get(rule.name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !value.is_empty() {
                // A present header must equal the configured value exactly.
                (value == rule.value).then(|| value.to_string())
            } else if FALLBACK_VALUES.contains(&rule.value.as_str()) {
                Some(rule.value.clone())
            } else {
                None
            }
        }
        IdentifierKind::Cookie => Some(
            req.cookie(&rule.name)
                .map(|cookie| cookie.value().to_string())
                .unwrap_or_else(|| rule.value.clone()),
        ),
        IdentifierKind::Query => {
            let params = Query::<HashMap<String, String>>::from_query(req.query_string())
                .map(Query::into_inner)
                .unwrap_or_default();
            match params.get(&rule.name) {
                Some(value) if !value.is_empty() => Some(value.clone()),
                _ => Some(rule.value.clone()),
            }
        }
        IdentifierKind::Ip => Some(client_ip(req)),
    };

    identifier.filter(|id| !id.is_empty())
}

/// Client address: `X-Real-IP`, else the first hop of `X-Forwarded-For`,
/// else the peer address, with any `:port` suffix stripped.
fn client_ip(req: &ServiceRequest) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let ip = if let Some(real_ip) = header("X-Real-IP") {
        real_ip.to_string()
    } else if let Some(forwarded) = header("X-Forwarded-For") {
        forwarded.split(',').next().unwrap_or("").trim().to_string()
    } else {
        req.peer_addr().map(|addr| addr.to_string()).unwrap_or_default()
    };

    match ip.rfind(':') {
        Some(idx) => ip[..idx].to_string(),
        None => ip,
    }
}
