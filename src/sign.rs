//! Per-attempt request signing hooks.

use reqwest::Request;

use crate::error::BoxError;

/// Attaches authentication material to an outgoing request.
///
/// The hook runs once per attempt, immediately before transmission, so that
/// time-bound credentials (e.g. HTTP signatures with a date component) are
/// recomputed for every retry rather than replayed stale.
pub trait Signer: Send + Sync {
    /// Signs the request in place.
    ///
    /// # Errors
    ///
    /// A signing failure aborts the whole call and is never retried.
    fn sign(&self, request: &mut Request) -> Result<(), BoxError>;
}

impl<F> Signer for F
where
    F: Fn(&mut Request) -> Result<(), BoxError> + Send + Sync,
{
    fn sign(&self, request: &mut Request) -> Result<(), BoxError> {
        self(request)
    }
}

/// Signer that leaves requests untouched (unsigned requests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSigner;

impl Signer for NoopSigner {
    fn sign(&self, _request: &mut Request) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::Method;
    use reqwest::header::HeaderValue;
    use url::Url;

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://example.com/").unwrap())
    }

    #[test]
    fn test_noop_signer_leaves_request_untouched() {
        let mut req = request();
        NoopSigner.sign(&mut req).unwrap();
        assert!(req.headers().is_empty());
    }

    #[test]
    fn test_closure_signer_mutates_request() {
        let signer = |req: &mut Request| -> Result<(), BoxError> {
            req.headers_mut()
                .insert("signature", HeaderValue::from_static("sig-v1"));
            Ok(())
        };

        let mut req = request();
        signer.sign(&mut req).unwrap();
        assert_eq!(
            req.headers().get("signature"),
            Some(&HeaderValue::from_static("sig-v1"))
        );
    }

    #[test]
    fn test_failing_signer_propagates_error() {
        let signer = |_req: &mut Request| -> Result<(), BoxError> { Err("key expired".into()) };

        let mut req = request();
        let err = signer.sign(&mut req).unwrap_err();
        assert_eq!(err.to_string(), "key expired");
    }
}
