//! Per-route rate limiting.
//!
//! One token bucket per client IP, per route. Buckets live in a `DashMap` so
//! concurrent requests from different clients never contend on a single lock.
//!
//! Limiters are kept in a [`RateLimitTable`] keyed by listener and route, so a
//! reload that leaves a route's limits unchanged keeps every client's budget.
//! A sweeper drops buckets that have refilled to capacity; a full bucket is
//! indistinguishable from a new one, so eviction never hands out extra tokens.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::RateLimitConfig;
use crate::config::ConfigStore;

/// How often idle buckets are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether the bucket would be at capacity if refilled at `now`.
    fn is_full(&self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }
}

/// Token buckets for one route.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<IpAddr, TokenBucket>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            config: config.clone(),
            buckets: DashMap::new(),
            rps: config.requests_per_second as f64,
            burst: config.burst as f64,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token for `client`; false when the client is over its limit.
    pub fn check(&self, client: IpAddr) -> bool {
        let mut bucket = self
            .buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop buckets that have refilled completely. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full(self.burst, self.rps, now));
        before.saturating_sub(self.buckets.len())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Limiters keyed by `listener/route`, shared by every snapshot.
#[derive(Debug, Default)]
pub struct RateLimitTable {
    entries: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(listener: &str, route: &str) -> String {
        format!("{}/{}", listener, route)
    }

    /// Existing limiter for `key` if its limits match `config`, otherwise a fresh one.
    pub fn entry(&self, key: &str, config: &RateLimitConfig) -> Arc<RateLimiter> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(config)));
        if entry.config() != config {
            *entry = Arc::new(RateLimiter::new(config));
        }
        Arc::clone(entry.value())
    }

    /// Drop limiters of routes that no longer exist.
    pub fn retain_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: HashSet<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        self.entries.retain(|key, _| keep.contains(key));
    }

    /// Evict idle buckets from every limiter.
    pub fn sweep(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().evict_idle()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sweep idle buckets on [`SWEEP_INTERVAL`] until shutdown.
pub async fn run_sweeper(store: Arc<ConfigStore>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = time::interval(SWEEP_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = store.rate_limits().sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "Evicted idle rate limit buckets");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
