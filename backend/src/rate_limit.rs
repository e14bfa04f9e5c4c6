//! Fixed-window, per-client request limiter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::ApiError;
use crate::AppState;

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

/// Counts requests per client key within fixed windows.
///
/// A client's window starts at its first request and rotates once `window`
/// has elapsed. Check-and-increment happens under the map's entry lock, so
/// concurrent requests for the same key are counted sequentially.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    /// Count one request from `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                started: now,
            });

        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        if entry.count >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.started));
            return Decision::Denied { retry_after };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    /// Drop windows that have fully elapsed.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Prune expired windows once per window length, forever.
    pub fn spawn_pruning(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let before = limiter.tracked_clients();
                limiter.prune();
                tracing::debug!(
                    before = before,
                    after = limiter.tracked_clients(),
                    "Pruned rate-limit windows"
                );
            }
        })
    }
}

/// Identify the calling client.
///
/// Uses the first `X-Forwarded-For` hop when `trust_proxy` is set, then the
/// peer address, then a shared `unknown` bucket.
pub fn client_key(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware that rejects clients over their quota before the handler runs.
pub async fn enforce(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let key = client_key(&request, state.config.rate_limit.trust_proxy);

    match state.rate_limiter.check(&key) {
        Decision::Allowed { remaining } => {
            tracing::trace!(client = %key, remaining = remaining, "Rate limit check passed");
            next.run(request).await
        }
        Decision::Denied { retry_after } => {
            tracing::warn!(client = %key, retry_after_secs = retry_after.as_secs(), "Rate limit exceeded");
            ApiError::RateLimited { retry_after }.into_response_for(state.config.mode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, HOUR);
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 0 });
        assert!(matches!(limiter.check("a"), Decision::Denied { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1, HOUR);
        assert!(matches!(limiter.check("a"), Decision::Allowed { .. }));
        assert!(matches!(limiter.check("a"), Decision::Denied { .. }));
        assert!(matches!(limiter.check("b"), Decision::Allowed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = RateLimiter::new(2, HOUR);
        limiter.check("a");
        limiter.check("a");

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert_eq!(
            limiter.check("a"),
            Decision::Denied {
                retry_after: Duration::from_secs(1800)
            }
        );

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_requests_do_not_extend_window() {
        let limiter = RateLimiter::new(1, HOUR);
        limiter.check("a");
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(600)).await;
            limiter.check("a");
        }
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(matches!(limiter.check("a"), Decision::Allowed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_expired_windows() {
        let limiter = RateLimiter::new(5, HOUR);
        limiter.check("old");
        tokio::time::advance(Duration::from_secs(3000)).await;
        limiter.check("fresh");
        tokio::time::advance(Duration::from_secs(700)).await;

        limiter.prune();
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.check("fresh"), Decision::Allowed { remaining: 3 });
    }

    #[tokio::test]
    async fn test_concurrent_checks_count_exactly() {
        let limiter = Arc::new(RateLimiter::new(50, HOUR));
        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.check("shared") }));
        }

        let mut allowed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Decision::Allowed { .. }) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    #[test]
    fn test_client_key_sources() {
        let request = http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&request, true), "203.0.113.7");
        assert_eq!(client_key(&request, false), "unknown");

        let mut request = http::Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5555))));
        assert_eq!(client_key(&request, true), "192.0.2.1");
    }
}
