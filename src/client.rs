//! Outbound HTTP client: configuration, composition root and the retry loop.
//!
//! [`Client`] wraps a pooling transport to provide:
//! - protection from server-side request forgery by only dialing known
//!   public IP prefixes, configurable with allow/block lists enforced after
//!   DNS resolution (see [`crate::AddrSanitizer`])
//! - a maximum received body size, failing on oversized declared lengths and
//!   limiting reads everywhere else to defend against forged or unknown
//!   content lengths
//! - retry-backoff for temporary server failures, honoring `Retry-After`
//! - a bad-host cache that fast-fails calls to hosts that recently failed
//! - optional per-attempt request signing
//! - one structured log event per attempt
//!
//! # Example
//!
//! ```no_run
//! use fetchguard::{Client, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(Config::default())?;
//! let request = client.get("https://example.org/feed".parse()?).build()?;
//! let response = client.execute(request).await?;
//! println!("status: {}", response.status());
//! let bytes = response.bytes().await?;
//! println!("fetched {} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ip_network::IpNetwork;
use reqwest::header::RETRY_AFTER;
use reqwest::redirect;
use reqwest::{Method, Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::{Classified, classify_send_error, exponential_backoff, parse_retry_after};
use crate::badhost::BadHostCache;
use crate::body::Response;
use crate::constants::{
    BAD_HOST_SWEEP_INTERVAL, BAD_HOST_TTL, BASE_BACKOFF, CONNECT_TIMEOUT, DEFAULT_MAX_BODY_SIZE,
    MAX_ATTEMPTS, POOL_IDLE_TIMEOUT, REDIRECT_LIMIT, TCP_KEEPALIVE,
};
use crate::error::Error;
use crate::sanitize::{AddrDenied, AddrSanitizer, GuardedResolver, host_ip};
use crate::sign::{NoopSigner, Signer};

/// Configuration for a [`Client`]. Fixed at construction; zero/`None` fields
/// take the documented defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Caps pooled connections per destination host.
    /// Default: available parallelism × 20.
    pub max_conns_per_host: usize,

    /// Hard ceiling on received body sizes, in bytes. Default: 512 MiB.
    pub max_body_size: u64,

    /// Overall per-attempt deadline. Default: none.
    pub timeout: Option<Duration>,

    /// Disables transparent gzip decompression.
    pub disable_compression: bool,

    /// IP prefixes that outgoing dials may always reach, even when the
    /// default policy would deny them.
    pub allow_ranges: Vec<IpNetwork>,

    /// IP prefixes that outgoing dials may never reach. Takes precedence
    /// over `allow_ranges`.
    pub block_ranges: Vec<IpNetwork>,

    /// Skips validation of remote TLS certificates.
    ///
    /// THIS SHOULD BE USED FOR TESTING ONLY. Enabling it in production
    /// leaves the server wide open to attacks.
    pub tls_insecure_skip_verify: bool,

    /// Attempts per logical call, first transmission included. Default: 5.
    pub max_attempts: u32,

    /// Starting backoff for the retry schedule. Default: 2s.
    pub base_backoff: Option<Duration>,
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Ambient cancellation signal, checked immediately before transmission
    /// and raced against the backoff wait.
    pub cancel: CancellationToken,

    /// Skips retry-backoff for this call even when the host is not cached
    /// as bad. The first attempt is still performed.
    pub fast_fail: bool,
}

/// SSRF-hardened outbound HTTP client with retry-backoff.
///
/// Cheap to clone; all clones share the connection pool and the bad-host
/// cache. Create one per process and share it across callers.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    sanitizer: Arc<AddrSanitizer>,
    bad_hosts: Arc<BadHostCache>,
    body_max: u64,
    max_attempts: u32,
    base_backoff: Duration,
}

impl Client {
    /// Creates a new client from `config` and starts the bad-host sweeper.
    ///
    /// Must be called within a Tokio runtime (the sweeper is a spawned
    /// task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the underlying transport cannot be
    /// built.
    pub fn new(config: Config) -> Result<Self, Error> {
        let max_conns_per_host = if config.max_conns_per_host == 0 {
            let parallelism = thread::available_parallelism().map_or(1, usize::from);
            parallelism * 20
        } else {
            config.max_conns_per_host
        };

        let body_max = if config.max_body_size == 0 {
            DEFAULT_MAX_BODY_SIZE
        } else {
            config.max_body_size
        };

        let max_attempts = if config.max_attempts == 0 {
            MAX_ATTEMPTS
        } else {
            config.max_attempts
        };

        if config.tls_insecure_skip_verify {
            warn!(
                "tls-insecure-skip-verify is enabled: remote TLS certificates are NOT validated. \
                 THIS SHOULD BE USED FOR TESTING ONLY. If this is a production server, stop it \
                 NOW and fix the configuration."
            );
        }

        let sanitizer = Arc::new(AddrSanitizer::new(config.allow_ranges, config.block_ranges));

        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(max_conns_per_host)
            .gzip(!config.disable_compression)
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
            .redirect(redirect_policy(Arc::clone(&sanitizer)))
            .dns_resolver(Arc::new(GuardedResolver::new(Arc::clone(&sanitizer))));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(Error::transport)?;

        let bad_hosts = Arc::new(BadHostCache::new(BAD_HOST_TTL));
        bad_hosts.start_sweeper(BAD_HOST_SWEEP_INTERVAL);

        Ok(Self {
            http,
            sanitizer,
            bad_hosts,
            body_max,
            max_attempts,
            base_backoff: config.base_backoff.unwrap_or(BASE_BACKOFF),
        })
    }

    /// Starts building a request against the underlying transport.
    ///
    /// Finish the builder with `.build()` and pass the request to
    /// [`execute`](Self::execute); sending the builder directly would bypass
    /// the retry loop and body limits.
    pub fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http.request(method, url)
    }

    /// Shorthand for [`request`](Self::request) with `GET`.
    pub fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Executes an unsigned request with retry-backoff.
    ///
    /// # Errors
    ///
    /// See [`execute_opts`](Self::execute_opts).
    pub async fn execute(&self, request: Request) -> Result<Response, Error> {
        self.execute_signed(request, &NoopSigner).await
    }

    /// Executes a request, invoking `signer` before every attempt.
    ///
    /// # Errors
    ///
    /// See [`execute_opts`](Self::execute_opts).
    pub async fn execute_signed(
        &self,
        request: Request,
        signer: &dyn Signer,
    ) -> Result<Response, Error> {
        self.execute_opts(request, signer, RequestOptions::default())
            .await
    }

    /// Executes a request with explicit per-call options.
    ///
    /// The returned response always has status `<500` and not 429, with its
    /// body wrapped in the configured size limit; every other outcome is one
    /// of the [`Error`] classes. Any error return marks the host in the
    /// bad-host cache, unless fast-fail was already active for this call.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] / [`Error::InvalidNetwork`] /
    /// [`Error::ReservedAddress`] for requests that fail validation;
    /// [`Error::BodyTooLarge`] for oversized responses;
    /// [`Error::HostNotFound`] when DNS says the host does not exist;
    /// [`Error::Cancelled`] / [`Error::Timeout`] when the ambient signal or
    /// deadline fires; [`Error::Signing`] when the signer fails;
    /// [`Error::Transport`] for fatal transport errors;
    /// [`Error::RetriesExhausted`] (or [`Error::Status`] under fast-fail)
    /// once retryable failures use up the attempt budget.
    pub async fn execute_opts(
        &self,
        request: Request,
        signer: &dyn Signer,
        opts: RequestOptions,
    ) -> Result<Response, Error> {
        self.validate_request(&request)?;

        let host = request
            .url()
            .host_str()
            .unwrap_or_default()
            .to_ascii_lowercase();

        // One cache lookup per logical call, not per attempt. Cached
        // failures cover exactly the retryable error classes, so a hit means
        // backing off against this host is likely wasted latency.
        let fast_fail = opts.fast_fail || self.bad_hosts.has(&host);

        let result = self
            .attempt_loop(&request, signer, &opts.cancel, fast_fail, &host)
            .await;

        if result.is_err() && !fast_fail {
            self.bad_hosts.mark_failed(&host);
        }

        result
    }

    /// Stops the background bad-host sweeper.
    ///
    /// Dropping the last clone of the client does this too; tests call it
    /// for determinism.
    pub fn shutdown(&self) {
        self.bad_hosts.stop_sweeper();
    }

    async fn attempt_loop(
        &self,
        template: &Request,
        signer: &dyn Signer,
        cancel: &CancellationToken,
        fast_fail: bool,
        host: &str,
    ) -> Result<Response, Error> {
        let method = template.method().clone();
        let url = template.url().clone();

        for attempt in 0..self.max_attempts {
            let mut request = template
                .try_clone()
                .ok_or_else(|| Error::invalid_request("request body cannot be replayed"))?;

            // Fresh signature on every attempt: time-bound credentials may
            // have expired during the previous backoff.
            signer.sign(&mut request).map_err(Error::signing)?;

            info!(method = %method, url = %url, attempt, "performing request");

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = self.http.execute(request) => outcome,
            };

            let (err, hint) = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() < 500 && status != StatusCode::TOO_MANY_REQUESTS {
                        return Response::wrap(response, self.body_max);
                    }

                    // 429 means slow down; codes over 500 generally indicate
                    // temporary outages. Honor the server's Retry-After hint,
                    // clipped to our ceiling.
                    let hint = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|value| value.to_str().ok())
                        .and_then(parse_retry_after)
                        .map(|d| d.min(self.base_backoff * self.max_attempts));

                    // The failed body must be consumed before retrying so
                    // the pooled connection is reusable.
                    drain_failed(response, self.body_max).await;

                    (Error::status(status), hint)
                }
                Err(send_err) => match classify_send_error(send_err, host) {
                    Classified::Fatal(err) => return Err(err),
                    Classified::Retryable(err) => (err, None),
                },
            };

            if fast_fail {
                debug!(url = %url, error = %err, "fast-fail active, skipping retry");
                return Err(err);
            }

            let backoff =
                hint.unwrap_or_else(|| exponential_backoff(self.base_backoff, attempt));

            warn!(
                url = %url,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "backing off after request error"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(backoff) => {}
            }
        }

        Err(Error::retries_exhausted(self.max_attempts))
    }

    /// Rejects malformed requests before the first attempt; these are never
    /// retried.
    fn validate_request(&self, request: &Request) -> Result<(), Error> {
        let url = request.url();

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(Error::invalid_network(scheme));
        }

        if url.host().is_none() {
            return Err(Error::invalid_request("missing host"));
        }

        // Literal addresses never pass through the resolver, so the
        // dial-time policy is applied here instead; a literal cannot rebind.
        if let Some(addr) = host_ip(url) {
            if !self.sanitizer.permits(addr) {
                return Err(Error::ReservedAddress);
            }
        }

        if request.body().is_some() && request.try_clone().is_none() {
            return Err(Error::invalid_request(
                "streaming request bodies cannot be retried",
            ));
        }

        Ok(())
    }
}

/// Redirect policy: enforces the hop limit and applies the address sanitizer
/// to literal-IP redirect targets, so a redirect cannot smuggle a reserved
/// address past request validation. Hostname targets are covered by the
/// guarded resolver like any other dial.
fn redirect_policy(sanitizer: Arc<AddrSanitizer>) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > REDIRECT_LIMIT {
            return attempt.error(format!("stopped after {REDIRECT_LIMIT} redirects"));
        }
        if let Some(addr) = host_ip(attempt.url()) {
            if !sanitizer.permits(addr) {
                return attempt.error(AddrDenied);
            }
        }
        attempt.follow()
    })
}

/// Reads and discards a failed response's body, bounded by the configured
/// ceiling, so the underlying connection can go back to the pool. Oversized
/// bodies are dropped with their connection instead.
async fn drain_failed(response: reqwest::Response, body_max: u64) {
    if let Ok(wrapped) = Response::wrap(response, body_max) {
        wrapped.discard().await;
    }
}
