//! Size-limited response bodies.
//!
//! Responses from untrusted peers carry forged or absent content lengths;
//! every body handed to a caller is therefore wrapped in a hard read
//! ceiling. A declared length above the ceiling fails the call before any
//! bytes are exposed; an unknown length is limited to the configured
//! maximum; exceeding the ceiling mid-stream is an error, never a silently
//! truncated payload.

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use url::Url;

use crate::error::Error;

/// A fully classified response with a size-limited body.
///
/// Only produced for acceptable outcomes (status `<500`, not 429, declared
/// length within the ceiling); retryable and fatal outcomes surface as
/// [`Error`] instead.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    content_length: Option<u64>,
    body: Body,
}

impl Response {
    /// Wraps a raw transport response in a read ceiling of `max` bytes.
    ///
    /// Fails with [`Error::BodyTooLarge`] when the declared content length
    /// already exceeds the ceiling; the raw response is dropped, closing the
    /// connection rather than draining an oversized hostile body.
    pub(crate) fn wrap(response: reqwest::Response, max: u64) -> Result<Self, Error> {
        let content_length = response.content_length();
        if content_length.is_some_and(|length| length > max) {
            return Err(Error::body_too_large(max));
        }
        // Known lengths tighten the ceiling; unknown lengths get the full
        // configured maximum.
        let limit = content_length.unwrap_or(max).min(max);

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|err| {
                    if err.is_timeout() {
                        Error::Timeout
                    } else {
                        Error::transport(err)
                    }
                })
            })
            .boxed();

        Ok(Self {
            status,
            headers,
            url,
            content_length,
            body: Body::new(stream, limit),
        })
    }

    /// The response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The final URL of the response, after any redirects.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The declared content length, when the server sent one.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Streams the next body chunk; `None` once the body is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyTooLarge`] if the stream exceeds the read
    /// ceiling, or the mapped transport error if the connection fails
    /// mid-body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        self.body.chunk().await
    }

    /// Collects the whole (limited) body into memory.
    ///
    /// # Errors
    ///
    /// Same as [`chunk`](Self::chunk).
    pub async fn bytes(self) -> Result<Bytes, Error> {
        self.body.bytes().await
    }

    /// Consumes the response, returning the limited body stream.
    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Discards any unread body bytes so the underlying connection can be
    /// released back to the pool.
    pub async fn discard(self) {
        self.body.drain().await;
    }
}

/// Size-limited stream of body chunks.
#[derive(Debug)]
pub struct Body {
    stream: StreamState,
    remaining: u64,
    limit: u64,
}

// BoxStream has no useful Debug; keep the wrapper's derive usable.
struct StreamState(BoxStream<'static, Result<Bytes, Error>>);

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamState")
    }
}

impl Body {
    pub(crate) fn new(stream: BoxStream<'static, Result<Bytes, Error>>, limit: u64) -> Self {
        Self {
            stream: StreamState(stream),
            remaining: limit,
            limit,
        }
    }

    /// Streams the next chunk; `None` once the body is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyTooLarge`] as soon as the stream would exceed
    /// the read ceiling; no bytes past the ceiling are ever yielded.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self.stream.0.next().await {
            None => Ok(None),
            Some(Err(err)) => Err(err),
            Some(Ok(chunk)) => {
                let len = chunk.len() as u64;
                if len > self.remaining {
                    return Err(Error::body_too_large(self.limit));
                }
                self.remaining -= len;
                Ok(Some(chunk))
            }
        }
    }

    /// Collects the whole (limited) body into memory.
    ///
    /// # Errors
    ///
    /// Same as [`chunk`](Self::chunk).
    pub async fn bytes(mut self) -> Result<Bytes, Error> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(collected))
    }

    /// Consumes and discards any unread chunks, up to the read ceiling.
    ///
    /// Draining lets the pooled connection be reused for the next request.
    /// Errors are ignored: a body that cannot be drained is abandoned with
    /// its connection when the stream is dropped.
    pub async fn drain(mut self) {
        while let Ok(Some(_)) = self.chunk().await {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn body_from_chunks(chunks: Vec<&'static [u8]>, limit: u64) -> Body {
        let stream = stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk))),
        )
        .boxed();
        Body::new(stream, limit)
    }

    #[tokio::test]
    async fn test_body_within_limit_collects_all_chunks() {
        let body = body_from_chunks(vec![b"hello ", b"world"], 64);
        let bytes = body.bytes().await.unwrap();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[tokio::test]
    async fn test_body_at_exact_limit_is_ok() {
        let body = body_from_chunks(vec![b"12345"], 5);
        let bytes = body.bytes().await.unwrap();
        assert_eq!(&bytes[..], b"12345");
    }

    #[tokio::test]
    async fn test_body_over_limit_errors_without_yielding_excess() {
        let mut body = body_from_chunks(vec![b"1234", b"5678"], 5);

        // First chunk fits.
        let first = body.chunk().await.unwrap().unwrap();
        assert_eq!(&first[..], b"1234");

        // Second chunk would cross the ceiling: error, no bytes yielded.
        let err = body.chunk().await.unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge { limit: 5 }));
    }

    #[tokio::test]
    async fn test_empty_body() {
        let mut body = body_from_chunks(vec![], 64);
        assert!(body.chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_any_byte() {
        let mut body = body_from_chunks(vec![b"x"], 0);
        assert!(matches!(
            body.chunk().await,
            Err(Error::BodyTooLarge { limit: 0 })
        ));
    }

    #[tokio::test]
    async fn test_drain_consumes_stream() {
        let body = body_from_chunks(vec![b"some", b"chunks"], 64);
        // Draining must not panic or error even with unread data.
        body.drain().await;
    }

    #[tokio::test]
    async fn test_wrap_rejects_declared_length_over_limit() {
        let raw = reqwest::Response::from(http::Response::new("0123456789"));
        let err = Response::wrap(raw, 4).unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn test_wrap_accepts_declared_length_within_limit() {
        let raw = reqwest::Response::from(http::Response::new("0123456789"));
        let response = Response::wrap(raw, 64).unwrap();
        assert_eq!(response.content_length(), Some(10));
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.bytes().await.unwrap();
        assert_eq!(&bytes[..], b"0123456789");
    }
}
