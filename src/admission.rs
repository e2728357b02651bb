//! Admission gate for the search endpoint.
//!
//! A token bucket per client key. Each bucket starts full at `capacity`,
//! refills continuously at `refill_per_sec` up to `capacity`, and spends one
//! token per admitted query. Admission is an immediate yes/no; nothing queues.
//!
//! # Locking
//!
//! ```text
//! RwLock<HashMap<key, Arc<Mutex<Bucket>>>>
//!   allow():  read lock  → lock one bucket → refill + take
//!             (write lock only to insert a new key)
//!   sweep():  write lock → drop idle buckets
//! ```
//!
//! Requests for different keys share the read lock and never wait on each
//! other. A sweep holds the write lock, so it cannot interleave with a
//! refill or take on any bucket.
//!
//! Buckets idle for longer than the retention window are removed by
//! [`RateLimiter::sweep`], which [`RateLimiter::spawn_sweeper`] runs on a
//! fixed period independent of traffic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderName;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed {
        /// Whole tokens left after this request.
        remaining: u32,
    },
    Limited {
        /// Time until one token is available again.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `refill_per_sec` is not positive;
    /// configuration validation rejects both before this is reached.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(refill_per_sec > 0.0, "refill_per_sec must be > 0");
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec)
    }

    /// Admit or reject one request for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    pub fn check(&self, key: &str) -> Admission {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> Admission {
        {
            let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
            if let Some(bucket) = buckets.get(key) {
                let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
                return self.take(&mut bucket, now);
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: self.capacity,
                    last_refill: now,
                    last_seen: now,
                }))
            })
            .clone();
        let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.take(&mut bucket, now)
    }

    fn take(&self, bucket: &mut Bucket, now: Instant) -> Admission {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            let missing = 1.0 - bucket.tokens;
            // Saturates for refill rates too slow to express as a Duration.
            let retry_after = Duration::try_from_secs_f64(missing / self.refill_per_sec)
                .unwrap_or(Duration::MAX);
            Admission::Limited { retry_after }
        }
    }

    /// Drop every bucket not seen within `idle_ttl`. Returns how many were removed.
    pub fn sweep(&self, idle_ttl: Duration) -> usize {
        self.sweep_at(Instant::now(), idle_ttl)
    }

    pub fn sweep_at(&self, now: Instant, idle_ttl: Duration) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
            now.saturating_duration_since(bucket.last_seen) <= idle_ttl
        });
        before - buckets.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the limiter is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle_ttl: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.sweep(idle_ttl);
                tracing::debug!(
                    removed,
                    tracked = limiter.tracked_keys(),
                    "rate limiter sweep"
                );
            }
        })
    }
}

// ============ Client keys ============

type KeyFn = dyn Fn(&Request) -> String + Send + Sync;

/// Derives the rate-limit key from an inbound request.
///
/// The gate does not interpret keys; any string works.
#[derive(Clone)]
pub struct KeyExtractor {
    f: Arc<KeyFn>,
}

impl KeyExtractor {
    /// Key on the TCP peer address (requires `ConnectInfo<SocketAddr>`).
    pub fn peer_addr() -> Self {
        Self::custom(|req| peer_ip(req).unwrap_or_else(|| "unknown".to_string()))
    }

    /// Key on the first comma-separated value of a header, falling back to
    /// the peer address when the header is absent.
    pub fn header(name: HeaderName) -> Self {
        Self::custom(move |req| {
            req.headers()
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| peer_ip(req))
                .unwrap_or_else(|| "unknown".to_string())
        })
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn from_config(config: &RateLimitConfig) -> anyhow::Result<Self> {
        match config.key_source.as_str() {
            "peer" => Ok(Self::peer_addr()),
            "header" => {
                let name = HeaderName::try_from(config.key_header.trim().to_ascii_lowercase())?;
                Ok(Self::header(name))
            }
            other => anyhow::bail!("Unknown rate_limit.key_source: {}", other),
        }
    }

    pub fn key_for(&self, req: &Request) -> String {
        (self.f)(req)
    }
}

fn peer_ip(req: &Request) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
