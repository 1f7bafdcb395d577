//! HTTP implementations of the collaborator traits.
//!
//! Both adapters speak a small JSON protocol and authenticate with a bearer
//! token. Responses are classified into [`ActionError`] so the retry policy
//! can act on them:
//!
//! | response                         | classification |
//! |----------------------------------|----------------|
//! | 429                              | `RateLimited`, hint from `x-rate-limit-reset` or `retry-after` |
//! | 5xx, network error, bad body     | `Transient`    |
//! | any other 4xx                    | `Fatal`        |

mod invoker;
mod source;

pub use invoker::HttpActionInvoker;
pub use source::HttpCandidateSource;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::domain::ActionError;
use crate::error::{DuckyError, Result};

/// Default request timeout for collaborator calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest body excerpt kept in an error message
const MAX_ERROR_BODY: usize = 200;

pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ducky/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DuckyError::Http(format!("Failed to create HTTP client: {}", e)))
}

/// Wait suggested by a 429 response, if the provider sent one.
pub fn rate_limit_hint(headers: &HeaderMap, now_epoch_secs: i64) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(reset) = header("x-rate-limit-reset") {
        return Some(Duration::from_secs(reset.saturating_sub(now_epoch_secs).max(0) as u64));
    }
    header("retry-after").map(|secs| Duration::from_secs(secs.max(0) as u64))
}

/// Map a non-success response to the retry taxonomy.
pub fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str) -> ActionError {
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let hint = rate_limit_hint(headers, chrono::Utc::now().timestamp());
        return ActionError::rate_limited(hint);
    }
    if status.is_server_error() {
        return ActionError::transient(format!("{}: {}", status, excerpt));
    }
    ActionError::fatal(format!("{}: {}", status, excerpt))
}

/// Transport failures are always worth another attempt.
pub(crate) fn classify_transport(err: reqwest::Error) -> ActionError {
    if err.is_timeout() {
        ActionError::transient(format!("request timed out: {}", err))
    } else if err.is_decode() {
        ActionError::transient(format!("undecodable response: {}", err))
    } else {
        ActionError::transient(format!("request failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_reset_header_is_epoch_seconds() {
        let h = headers(&[("x-rate-limit-reset", "1000090")]);
        assert_eq!(rate_limit_hint(&h, 1_000_000), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_reset_in_past_is_zero() {
        let h = headers(&[("x-rate-limit-reset", "10")]);
        assert_eq!(rate_limit_hint(&h, 1_000_000), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_fallback() {
        let h = headers(&[("retry-after", "120")]);
        assert_eq!(rate_limit_hint(&h, 0), Some(Duration::from_secs(120)));
        assert_eq!(rate_limit_hint(&HeaderMap::new(), 0), None);
    }

    #[test]
    fn test_classify_response() {
        let none = HeaderMap::new();
        assert_eq!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, &none, ""),
            ActionError::rate_limited(None)
        );
        assert!(matches!(
            classify_response(StatusCode::BAD_GATEWAY, &none, "oops"),
            ActionError::Transient(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::UNAUTHORIZED, &none, "bad token"),
            ActionError::Fatal(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::UNPROCESSABLE_ENTITY, &none, ""),
            ActionError::Fatal(_)
        ));
    }
}
