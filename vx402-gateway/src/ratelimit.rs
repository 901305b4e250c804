//! Fixed-window rate limiting for protected routes.
//!
//! One window per caller key. The key is the payment token when one is
//! presented (quota abuse tracks the credential, not the network path),
//! falling back to the forwarded client address.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::AppState;
use crate::paygate::PAYMENT_TOKEN_HEADER;

/// Every this many admission checks, expired windows are evicted. Caller
/// keys include attacker-controlled forwarded addresses, so the map must
/// not grow without bound.
const PRUNE_INTERVAL: u64 = 256;

/// Per-caller fixed-window request counter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    checks: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted.
    Allowed,
    /// Over the limit; retry after this many seconds.
    Limited {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },
}

impl RateLimiter {
    /// Creates a limiter allowing `max_requests` per `window` per caller.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Counts one request against `key`.
    pub fn check(&self, key: &str) -> Admission {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_INTERVAL == 0 {
            self.prune();
        }

        let now = Instant::now();
        let mut window = self.windows.entry(key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            let elapsed = now.duration_since(window.started);
            let retry_after = self.window.saturating_sub(elapsed);
            return Admission::Limited {
                retry_after_secs: retry_after.as_secs().max(1),
            };
        }

        window.count += 1;
        Admission::Allowed
    }

    /// Evicts windows whose period has fully elapsed. A fresh window is
    /// recreated on the caller's next request, so eviction never admits
    /// anything the fixed window would have blocked.
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, window| now.duration_since(window.started) < self.window);
    }

    /// Number of caller keys currently tracked.
    #[must_use]
    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

/// Middleware enforcing the limiter before a protected route runs.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = caller_key(&request);
    match state.limiter.check(&key) {
        Admission::Allowed => next.run(request).await,
        Admission::Limited { retry_after_secs } => {
            tracing::warn!(retry_after_secs, "rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": {
                        "error_code": "RATE_LIMITED",
                        "message": "rate limit exceeded",
                        "retryable": true,
                    }
                })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
    }
}

fn caller_key(request: &Request) -> String {
    if let Some(token) = request
        .headers()
        .get(PAYMENT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return vx402::token::hash_token(token);
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| "anonymous".to_owned(), |addr| addr.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert_eq!(limiter.check("caller"), Admission::Allowed);
        }
        assert!(matches!(
            limiter.check("caller"),
            Admission::Limited { retry_after_secs } if retry_after_secs >= 1
        ));
    }

    #[test]
    fn callers_are_isolated() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(limiter.check("a"), Admission::Allowed);
        assert_eq!(limiter.check("b"), Admission::Allowed);
        assert!(matches!(limiter.check("a"), Admission::Limited { .. }));
    }

    #[test]
    fn window_resets_after_elapsing() {
        let limiter = RateLimiter::new(1, Duration::from_millis(0));
        assert_eq!(limiter.check("caller"), Admission::Allowed);
        // Zero-length window: every check starts a fresh one.
        assert_eq!(limiter.check("caller"), Admission::Allowed);
    }

    #[test]
    fn expired_windows_are_evicted() {
        let limiter = RateLimiter::new(1, Duration::from_millis(0));
        for i in 0..100 {
            limiter.check(&format!("forged-client-{i}"));
        }
        assert!(limiter.tracked_callers() > 0);
        limiter.prune();
        assert_eq!(limiter.tracked_callers(), 0);
    }

    #[test]
    fn live_windows_survive_pruning() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.check("caller"), Admission::Allowed);
        limiter.prune();
        assert_eq!(limiter.tracked_callers(), 1);
        // The surviving window still carries its count.
        assert_eq!(limiter.check("caller"), Admission::Allowed);
        assert!(matches!(limiter.check("caller"), Admission::Limited { .. }));
    }
}
