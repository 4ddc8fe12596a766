//! SSRF-hardened outbound HTTP client.
//!
//! This library executes HTTP requests against untrusted, possibly hostile
//! remote hosts — the situation a federated server is in whenever it fetches
//! content referenced by its peers. It protects the host process on three
//! fronts:
//!
//! - **Request forgery**: outgoing dials are checked against IP allow/block
//!   prefix lists *after* DNS resolution, so a hostname that resolves to an
//!   internal address at request time is refused even if it looked harmless
//!   when the URL was first seen.
//! - **Memory exhaustion**: response bodies are streamed through a hard size
//!   ceiling; oversized declared lengths fail before any bytes are read.
//! - **Flaky peers**: transient failures (5xx, 429, most transport errors)
//!   are retried with server-hinted or exponential backoff, and hosts that
//!   keep failing are cached so subsequent calls fail fast instead of
//!   stacking up retry loops against a dead peer.
//!
//! # Overview
//!
//! - [`Client`] / [`Config`] - composition root and the retry engine
//! - [`AddrSanitizer`] - dial-time IP prefix policy
//! - [`BadHostCache`] - time-bounded record of recently failed hosts
//! - [`Response`] / [`Body`] - size-limited response bodies
//! - [`Signer`] - per-attempt request signing hook
//! - [`Error`] - caller-visible failure taxonomy

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod backoff;
mod badhost;
mod body;
mod client;
mod constants;
mod error;
mod sanitize;
mod sign;

pub use backoff::parse_retry_after;
pub use badhost::BadHostCache;
pub use body::{Body, Response};
pub use client::{Client, Config, RequestOptions};
pub use constants::{BASE_BACKOFF, DEFAULT_MAX_BODY_SIZE, MAX_ATTEMPTS};
pub use error::{BoxError, Error};
pub use sanitize::AddrSanitizer;
pub use sign::{NoopSigner, Signer};

// Re-export the foreign types that appear in this crate's public API.
pub use ip_network::IpNetwork;
pub use tokio_util::sync::CancellationToken;
