//! Per-client rate limiting.
//!
//! One token bucket per client IP, all behind a single mutex. The
//! registry is owned by application state, so tests construct their own
//! limiter with whatever rate they need instead of poking at globals.
//! A background sweep evicts buckets that have been idle long enough to
//! be full again, keeping the map bounded.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::errors::{Error, Result};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    rps: f64,
    burst: f64,
    clients: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, rps: f64, burst: u32) -> Self {
        Self {
            enabled,
            rps,
            burst: f64::from(burst),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token from the client's bucket, refilling it first
    /// based on elapsed time. Returns whether the request may proceed.
    pub fn allow(&self, client: IpAddr) -> bool {
        if !self.enabled {
            return true;
        }

        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(_) => {
                // A poisoned registry should not take the API down
                tracing::warn!("rate limiter mutex poisoned, allowing request");
                return true;
            }
        };

        let now = Instant::now();
        let bucket = clients.entry(client).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }

    /// Drop buckets idle for at least `idle_for`. Returns how many were
    /// evicted.
    pub fn sweep(&self, idle_for: Duration) -> usize {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("rate limiter mutex poisoned, skipping sweep");
                return 0;
            }
        };

        let now = Instant::now();
        let before = clients.len();
        clients.retain(|_, bucket| now.duration_since(bucket.last_refill) < idle_for);
        before - clients.len()
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Middleware applying the limiter to every request. Requests without a
/// resolvable peer address (only possible in tests) are allowed.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    if let Some(client) = client {
        if !state.limiter.allow(client) {
            tracing::debug!(%client, "rate limit exceeded");
            return Err(Error::RateLimitExceeded);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(last_octet: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last_octet])
    }

    #[test]
    fn test_burst_then_throttle() {
        let limiter = RateLimiter::new(true, 2.0, 4);
        for _ in 0..4 {
            assert!(limiter.allow(client(1)));
        }
        assert!(!limiter.allow(client(1)));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new(true, 2.0, 1);
        assert!(limiter.allow(client(1)));
        assert!(!limiter.allow(client(1)));
        assert!(limiter.allow(client(2)));
    }

    #[test]
    fn test_disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(false, 2.0, 1);
        for _ in 0..100 {
            assert!(limiter.allow(client(1)));
        }
    }

    #[test]
    fn test_sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(true, 2.0, 4);
        limiter.allow(client(1));
        limiter.allow(client(2));
        assert_eq!(limiter.tracked_clients(), 2);

        // Nothing is older than an hour, so a long horizon keeps both
        assert_eq!(limiter.sweep(Duration::from_secs(3600)), 0);
        // A zero horizon evicts everything
        assert_eq!(limiter.sweep(Duration::ZERO), 2);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(true, 1000.0, 1);
        assert!(limiter.allow(client(1)));
        assert!(!limiter.allow(client(1)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.allow(client(1)));
    }
}
