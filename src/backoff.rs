//! Retry backoff computation and transport failure classification.
//!
//! The retry engine is the only place that decides retry-vs-fatal; this
//! module supplies the pieces: parsing the server's `Retry-After` hint,
//! the exponential fallback schedule, and the classifier that splits
//! transport errors into the fixed fatal set and the generic retryable
//! bucket.

use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::error::Error;
use crate::sanitize::{AddrDenied, NameNotFound};

/// Classification of a failed transmission attempt.
#[derive(Debug)]
pub(crate) enum Classified {
    /// Returned immediately; retrying cannot change the outcome.
    Fatal(Error),
    /// Candidate for retry-backoff.
    Retryable(Error),
}

/// Splits a transport error into fatal and retryable classes.
///
/// Fatal: per-attempt deadline, sanitizer denial and NXDOMAIN (both
/// recovered from the error source chain), redirect-limit, and
/// TLS/certificate failures. TLS classes are matched on the error text
/// because the TLS backends do not expose them as stable types.
///
/// Everything else — connection errors, resets, and resolver failures other
/// than a definitive "no records" answer — is retryable.
pub(crate) fn classify_send_error(err: reqwest::Error, host: &str) -> Classified {
    // Connect timeouts are transient and fall through to the retryable
    // bucket; only the overall deadline is fatal.
    if err.is_timeout() && !err.is_connect() {
        return Classified::Fatal(Error::Timeout);
    }
    if chain_contains::<AddrDenied>(&err) {
        return Classified::Fatal(Error::ReservedAddress);
    }
    if chain_contains::<NameNotFound>(&err) {
        return Classified::Fatal(Error::host_not_found(host));
    }
    if err.is_redirect() || is_tls_error(&err) {
        return Classified::Fatal(Error::transport(err));
    }
    Classified::Retryable(Error::transport(err))
}

/// Returns whether the error chain contains a marker of type `T`.
pub(crate) fn chain_contains<T: std::error::Error + 'static>(
    err: &(dyn std::error::Error + 'static),
) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if err.downcast_ref::<T>().is_some() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Checks whether a transport error is a TLS or certificate failure.
fn is_tls_error(err: &reqwest::Error) -> bool {
    let text = chain_text(err).to_lowercase();
    text.contains("tls")
        || text.contains("ssl")
        || text.contains("certificate")
        || text.contains("handshake")
}

/// Concatenates the messages of an error and all its sources.
fn chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        text.push_str(": ");
        text.push_str(&err.to_string());
        source = err.source();
    }
    text
}

/// Exponential fallback backoff: `base × 2^(attempt + 1)` for the zero-based
/// attempt index, i.e. 4s, 8s, 16s, 32s, 64s for a 2s base.
pub(crate) fn exponential_backoff(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << (attempt + 1))
}

/// Parses a `Retry-After` header value into a backoff duration.
///
/// Supports both RFC 7231 forms:
/// - integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// A date in the past yields [`Duration::ZERO`] (immediate retry, never a
/// negative sleep). Returns `None` for unparseable values, in which case the
/// caller falls back to the exponential schedule.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        return Some(Duration::from_secs(seconds.unsigned_abs()));
    }

    if let Ok(date) = httpdate::parse_http_date(value) {
        let now = SystemTime::now();
        return Some(date.duration_since(now).unwrap_or(Duration::ZERO));
    }

    debug!(value, "unparseable Retry-After value");
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Exponential Backoff Tests ====================

    #[test]
    fn test_exponential_schedule_for_two_second_base() {
        let base = Duration::from_secs(2);
        let schedule: Vec<u64> = (0..5)
            .map(|attempt| exponential_backoff(base, attempt).as_secs())
            .collect();
        assert_eq!(schedule, vec![4, 8, 16, 32, 64]);
    }

    #[test]
    fn test_exponential_schedule_scales_with_base() {
        let base = Duration::from_millis(20);
        assert_eq!(
            exponential_backoff(base, 0),
            Duration::from_millis(40)
        );
        assert_eq!(
            exponential_backoff(base, 3),
            Duration::from_millis(320)
        );
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_zero() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_whitespace() {
        assert_eq!(parse_retry_after("  30  "), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past_is_zero() {
        // Clamped to an immediate retry, never a negative sleep.
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_http_date_in_future() {
        let future = SystemTime::now() + Duration::from_secs(60);
        let value = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&value).unwrap();
        assert!(
            parsed > Duration::from_secs(55) && parsed <= Duration::from_secs(60),
            "expected ~60s, got {parsed:?}"
        );
    }

    // ==================== Classification Tests ====================

    #[derive(Debug, thiserror::Error)]
    #[error("outer wrapper")]
    struct Wrapper {
        #[source]
        source: crate::BoxError,
    }

    #[test]
    fn test_chain_contains_finds_nested_marker() {
        let io = std::io::Error::other(Box::new(AddrDenied) as crate::BoxError);
        let outer = Wrapper {
            source: Box::new(io),
        };
        assert!(chain_contains::<AddrDenied>(&outer));
        assert!(!chain_contains::<NameNotFound>(&outer));
    }

    #[test]
    fn test_chain_contains_top_level_marker() {
        assert!(chain_contains::<NameNotFound>(&NameNotFound));
    }

    #[test]
    fn test_chain_text_concatenates_sources() {
        let io = std::io::Error::other(Box::new(NameNotFound) as crate::BoxError);
        let outer = Wrapper {
            source: Box::new(io),
        };
        let text = chain_text(&outer);
        assert!(text.contains("outer wrapper"), "got: {text}");
        assert!(text.contains("no addresses found"), "got: {text}");
    }
}
