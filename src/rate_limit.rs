//! HTTP-layer rate limiter: a fixed one-minute window bounding total
//! requests, with a retry hint in the rejection body.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
    start: Instant,
    count: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    max_per_minute: u32,
    window: Arc<Mutex<Window>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            window: Arc::new(Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            })),
        }
    }

    /// Count one request. `Err` carries the seconds until the window
    /// resets.
    pub fn check(&self) -> Result<(), u64> {
        let mut window = self.window.lock().expect("rate limiter poisoned");
        let now = Instant::now();

        if now.duration_since(window.start) >= WINDOW {
            window.start = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count <= self.max_per_minute {
            Ok(())
        } else {
            let elapsed = now.duration_since(window.start);
            Err(WINDOW.saturating_sub(elapsed).as_secs().max(1))
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            let body = Json(json!({
                "error": {
                    "message": "request rate limit exceeded",
                    "type": "rate_limited",
                },
                "retryAfterSeconds": retry_after,
            }));
            (StatusCode::TOO_MANY_REQUESTS, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_cap() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());

        let retry = limiter.check().unwrap_err();
        assert!(retry >= 1 && retry <= 60);
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        // Force the window into the past
        limiter.window.lock().unwrap().start = Instant::now() - Duration::from_secs(61);
        assert!(limiter.check().is_ok());
    }
}
