use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;

use crate::error::ApiError;

/// Fixed-window request counter keyed by client IP, applied to the auth and
/// guest-checkout routes. Windows are tracked in process; counters for an IP
/// reset when its window elapses.
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    hits: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn try_acquire(&self, ip: IpAddr) -> bool {
        let mut hits = self.hits.lock().await;
        let now = Instant::now();
        let window = hits.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.max_requests {
            false
        } else {
            window.count += 1;
            true
        }
    }
}

pub async fn enforce(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // ConnectInfo is absent for in-process callers (tests); treat those as
    // loopback.
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if limiter.try_acquire(ip).await {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::TooManyRequests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_A: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    const CLIENT_B: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8));

    #[tokio::test]
    async fn blocks_after_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.try_acquire(CLIENT_A).await);
        }
        assert!(!limiter.try_acquire(CLIENT_A).await);
    }

    #[tokio::test]
    async fn clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.try_acquire(CLIENT_A).await);
        assert!(!limiter.try_acquire(CLIENT_A).await);
        assert!(limiter.try_acquire(CLIENT_B).await);
    }

    #[tokio::test]
    async fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.try_acquire(CLIENT_A).await);
        assert!(!limiter.try_acquire(CLIENT_A).await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.try_acquire(CLIENT_A).await);
    }
}
