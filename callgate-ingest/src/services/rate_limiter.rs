//! Per-tenant fixed-window rate limiting
//!
//! Each tenant owns a `(window_start, request_count)` pair. A request resets
//! the window once `now - window_start >= window`, is admitted while
//! `request_count < limit`, and otherwise bumps `violation_count` and is
//! rejected.
//!
//! Fixed windows allow a burst of up to `2 * limit` across a window boundary.
//! Memory is one entry per tenant that has passed authentication.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Admission check consulted by the gatekeeper
pub trait RateLimiter: Send + Sync {
    /// Count one request for `tenant_id` and report whether it is within `limit`
    fn allow(&self, tenant_id: &str, limit: u32) -> bool;
}

/// Snapshot of one tenant's window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterWindow {
    pub tenant_id: String,
    pub window_start: Instant,
    pub request_count: u32,
    pub violation_count: u64,
}

/// In-process fixed-window limiter
///
/// Check-and-increment happens under one mutex, so concurrent admissions for
/// the same tenant can never exceed the limit.
pub struct FixedWindowRateLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, RateLimiterWindow>>,
}

impl FixedWindowRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// One-minute windows
    pub fn per_minute() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// `allow` with an explicit clock reading
    pub fn allow_at(&self, tenant_id: &str, limit: u32, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let entry = windows
            .entry(tenant_id.to_string())
            .or_insert_with(|| RateLimiterWindow {
                tenant_id: tenant_id.to_string(),
                window_start: now,
                request_count: 0,
                violation_count: 0,
            });

        if now.saturating_duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.request_count = 0;
        }

        if entry.request_count < limit {
            entry.request_count += 1;
            true
        } else {
            entry.violation_count += 1;
            tracing::debug!(
                tenant_id = %tenant_id,
                limit,
                violations = entry.violation_count,
                "Rate limit exceeded"
            );
            false
        }
    }

    /// Current window for a tenant, if it has made any request
    pub fn snapshot(&self, tenant_id: &str) -> Option<RateLimiterWindow> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.get(tenant_id).cloned()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn allow(&self, tenant_id: &str, limit: u32) -> bool {
        self.allow_at(tenant_id, limit, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_exactly_limit_requests_pass() {
        let limiter = FixedWindowRateLimiter::per_minute();
        let now = Instant::now();

        let allowed = (0..60).filter(|_| limiter.allow_at("t-1", 50, now)).count();
        assert_eq!(allowed, 50);

        let window = limiter.snapshot("t-1").unwrap();
        assert_eq!(window.request_count, 50);
        assert_eq!(window.violation_count, 10);
    }

    #[test]
    fn test_tenants_are_independent() {
        let limiter = FixedWindowRateLimiter::per_minute();
        let now = Instant::now();

        for _ in 0..5 {
            limiter.allow_at("noisy", 5, now);
        }
        assert!(!limiter.allow_at("noisy", 5, now));

        // Another tenant keeps its full budget
        let allowed = (0..5).filter(|_| limiter.allow_at("quiet", 5, now)).count();
        assert_eq!(allowed, 5);
        assert_eq!(limiter.snapshot("quiet").unwrap().violation_count, 0);
    }

    #[test]
    fn test_window_resets_after_duration() {
        let limiter = FixedWindowRateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.allow_at("t-1", 1, start));
        assert!(!limiter.allow_at("t-1", 1, start + Duration::from_secs(59)));
        // Boundary: now - window_start == window resets
        assert!(limiter.allow_at("t-1", 1, start + Duration::from_secs(60)));
        assert!(!limiter.allow_at("t-1", 1, start + Duration::from_secs(61)));
    }

    #[test]
    fn test_violations_survive_window_reset() {
        let limiter = FixedWindowRateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        limiter.allow_at("t-1", 0, start);
        limiter.allow_at("t-1", 0, start + Duration::from_secs(120));
        assert_eq!(limiter.snapshot("t-1").unwrap().violation_count, 2);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(FixedWindowRateLimiter::per_minute());
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if limiter.allow("shared", 250) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 250);
    }
}
