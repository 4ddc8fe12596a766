//! Shared tunables for the outbound client (retry, limits, pooling).

use std::time::Duration;

/// Maximum attempts per logical call, first transmission included.
pub const MAX_ATTEMPTS: u32 = 5;

/// Starting backoff; the fallback schedule grows as `BASE_BACKOFF × 2^(n+1)`.
pub const BASE_BACKOFF: Duration = Duration::from_secs(2);

/// Default response body ceiling (512 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u64 = 512 * 1024 * 1024;

/// How long a failing host stays in the bad-host cache after its last
/// failure.
pub const BAD_HOST_TTL: Duration = Duration::from_secs(60 * 60);

/// Sweep cadence for expired bad-host entries.
pub const BAD_HOST_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// TCP keepalive probe interval.
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Idle pooled connections are dropped after this long.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Redirect hops followed before the call fails.
pub const REDIRECT_LIMIT: usize = 10;
