//! Time-bounded record of hosts that recently failed.
//!
//! Presence in the cache means "this host failed recently enough that
//! retry-backoff against it is wasted latency" — never "this host is
//! permanently blocked". Entries carry a sliding TTL refreshed on every
//! write and are removed by a periodic sweep task rather than evaluated
//! lazily on reads.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Presence set of recently failed hostnames.
///
/// Reads and writes go through `DashMap` shards, so concurrent calls never
/// serialize on the cache. The sweeper is a detached task with an explicit
/// start/stop lifecycle tied to the owning [`Client`](crate::Client); it is
/// also aborted when the cache is dropped.
#[derive(Debug)]
pub struct BadHostCache {
    /// Hostname -> expiry instant.
    entries: Arc<DashMap<String, Instant>>,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BadHostCache {
    /// Creates a cache whose entries expire `ttl` after their last write.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            sweeper: Mutex::new(None),
        }
    }

    /// Returns whether `host` failed recently.
    ///
    /// This is a pure presence check; expired entries linger until the next
    /// sweep, which keeps the read path to a single shard lookup.
    #[must_use]
    pub fn has(&self, host: &str) -> bool {
        self.entries.contains_key(host)
    }

    /// Records that a call to `host` failed. Re-marking refreshes the full
    /// TTL window (sliding expiration).
    pub fn mark_failed(&self, host: &str) {
        debug!(host = %host, "marking bad host");
        self.entries
            .insert(host.to_owned(), Instant::now() + self.ttl);
    }

    /// Starts the background sweep task. Idempotent: a second call while a
    /// sweeper is running does nothing.
    pub fn start_sweeper(&self, every: Duration) {
        let mut guard = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        let entries = Arc::clone(&self.entries);
        *guard = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately.
            tick.tick().await;
            loop {
                tick.tick().await;
                let now = Instant::now();
                entries.retain(|_, expiry| *expiry > now);
            }
        }));
    }

    /// Stops the background sweep task, if running.
    pub fn stop_sweeper(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for BadHostCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
