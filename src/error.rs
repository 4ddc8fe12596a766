//! Error types for outbound request execution.
//!
//! The variants form the caller-visible failure taxonomy: policy violations
//! (invalid request, invalid network, reserved address) and resource
//! violations (body too large) are always fatal; transient failures surface
//! as `RetriesExhausted` once the attempt ceiling is reached; deadline and
//! cancellation signals pass through untouched.

use thiserror::Error;

/// Boxed error type used at trait boundaries (signing hooks, resolver markers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`Client`](crate::Client) request execution.
#[derive(Debug, Error)]
pub enum Error {
    /// The request is malformed and cannot be performed.
    #[error("invalid http request: {reason}")]
    InvalidRequest {
        /// Why the request was rejected.
        reason: &'static str,
    },

    /// The request would not be performed over TCP (non-http(s) scheme).
    #[error("invalid network type: {scheme}")]
    InvalidNetwork {
        /// The offending URL scheme.
        scheme: String,
    },

    /// The dial target falls within a blocked or reserved IP range.
    #[error("dial within blocked / reserved IP range")]
    ReservedAddress,

    /// The response body exceeds the configured size ceiling.
    #[error("response body larger than limit of {limit} bytes")]
    BodyTooLarge {
        /// The ceiling that was exceeded, in bytes.
        limit: u64,
    },

    /// Every attempt failed with a retryable error.
    #[error("transport reached max retries ({attempts} attempts)")]
    RetriesExhausted {
        /// How many attempts were performed.
        attempts: u32,
    },

    /// DNS says the host does not exist. Distinct from transient resolution
    /// failures, which are retried.
    #[error("host not found: {host}")]
    HostNotFound {
        /// The hostname that failed to resolve.
        host: String,
    },

    /// The server answered with a retryable status (5xx or 429). Returned
    /// directly only when fast-fail cuts the retry loop short.
    #[error("http response: {status}")]
    Status {
        /// The retryable status code.
        status: reqwest::StatusCode,
    },

    /// The per-attempt deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The ambient cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// The signing hook failed. Never retried: a signer that cannot produce
    /// a signature now will not produce one on the next attempt either.
    #[error("request signing failed: {source}")]
    Signing {
        /// The underlying signer error.
        source: BoxError,
    },

    /// Transport-level failure (TLS, certificate validation, redirect limit,
    /// connection errors), passed through from the underlying client.
    #[error("transport error: {source}")]
    Transport {
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    /// Creates an invalid-request error.
    pub(crate) fn invalid_request(reason: &'static str) -> Self {
        Self::InvalidRequest { reason }
    }

    /// Creates an invalid-network error.
    pub(crate) fn invalid_network(scheme: impl Into<String>) -> Self {
        Self::InvalidNetwork {
            scheme: scheme.into(),
        }
    }

    /// Creates a body-too-large error.
    pub(crate) fn body_too_large(limit: u64) -> Self {
        Self::BodyTooLarge { limit }
    }

    /// Creates a retries-exhausted error.
    pub(crate) fn retries_exhausted(attempts: u32) -> Self {
        Self::RetriesExhausted { attempts }
    }

    /// Creates a host-not-found error.
    pub(crate) fn host_not_found(host: impl Into<String>) -> Self {
        Self::HostNotFound { host: host.into() }
    }

    /// Creates a retryable-status error.
    pub(crate) fn status(status: reqwest::StatusCode) -> Self {
        Self::Status { status }
    }

    /// Creates a signing error.
    pub(crate) fn signing(source: BoxError) -> Self {
        Self::Signing { source }
    }

    /// Wraps a transport error.
    pub(crate) fn transport(source: reqwest::Error) -> Self {
        Self::Transport { source }
    }
}
