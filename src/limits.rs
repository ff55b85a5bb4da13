//! Per-IP rate limiting for event injection.
//!
//! Fixed-window counter per source address. Tracked addresses are bounded to
//! keep memory flat under address churn.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Maximum number of addresses to track before stale windows are evicted.
const MAX_TRACKED_IPS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

pub struct PublishRateLimiter {
    max_per_window: u32,
    window: Duration,
    state: DashMap<IpAddr, WindowState>,
}

impl PublishRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            state: DashMap::new(),
        }
    }

    /// Record one request from `ip`. Returns false when the address is over
    /// its budget for the current window.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();

        if self.state.len() > MAX_TRACKED_IPS {
            let window = self.window;
            self.state
                .retain(|_, state| now.duration_since(state.window_start) < window);
        }

        let mut entry = self.state.entry(ip).or_insert(WindowState {
            window_start: now,
            count: 0,
        });
        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_per_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_budget_then_blocks() {
        let limiter = PublishRateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn addresses_are_independent() {
        let limiter = PublishRateLimiter::new(1, Duration::from_secs(60));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    #[test]
    fn window_resets() {
        let limiter = PublishRateLimiter::new(1, Duration::from_millis(20));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(ip));
    }
}
