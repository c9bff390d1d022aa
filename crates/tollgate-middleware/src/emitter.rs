//! Response emission: limit headers and deny bodies.

use std::time::Duration;

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;

use tollgate_core::decision::{QuotaInfo, RateLimitInfo};

use crate::gate::DenyReason;

const NO_IDENTIFIER_BODY: &str =
    r#"{"error":"Access denied","message":"No valid identifier found in request"}"#;

/// Describe remaining rate and quota on a response, deny or pass alike.
pub(crate) fn apply_limit_headers(
    headers: &mut HeaderMap,
    rate: Option<&RateLimitInfo>,
    quota: Option<&QuotaInfo>,
) {
    if let Some(rate) = rate {
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(rate.limit),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(rate.available),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(rate.reset_time.timestamp()),
        );
        if rate.retry_after > Duration::ZERO {
            headers.insert(RETRY_AFTER, HeaderValue::from(rate.retry_after.as_secs()));
        }
    }

    if let Some(quota) = quota {
        headers.insert(
            HeaderName::from_static("x-quota-limit"),
            HeaderValue::from(quota.limit),
        );
        headers.insert(
            HeaderName::from_static("x-quota-used"),
            HeaderValue::from(quota.used),
        );
        headers.insert(
            HeaderName::from_static("x-quota-remaining"),
            HeaderValue::from(quota.remaining),
        );
        headers.insert(
            HeaderName::from_static("x-quota-reset"),
            HeaderValue::from(quota.reset_time.timestamp()),
        );
    }
}

/// Build a denial: rule-configured status and body when set, otherwise the
/// reason's defaults. The content type is JSON when the body looks like a
/// JSON object.
pub(crate) fn deny_response(
    reason: DenyReason,
    status: u16,
    body: &str,
    rate: Option<&RateLimitInfo>,
    quota: Option<&QuotaInfo>,
) -> HttpResponse {
    let status = StatusCode::from_u16(status).unwrap_or(match reason {
        DenyReason::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        DenyReason::Quota => StatusCode::FORBIDDEN,
    });
    let body = if body.is_empty() { reason.text() } else { body };
    let content_type = if body.contains('{') && body.contains('}') {
        "application/json"
    } else {
        "text/plain"
    };

    let mut res = HttpResponse::build(status)
        .content_type(content_type)
        .body(body.to_string());
    apply_limit_headers(res.headers_mut(), rate, quota);
    res
}

/// Canonical response when no rule matched the request.
pub(crate) fn no_identifier_response() -> HttpResponse {
    HttpResponse::Forbidden()
        .content_type("application/json")
        .body(NO_IDENTIFIER_BODY)
}
