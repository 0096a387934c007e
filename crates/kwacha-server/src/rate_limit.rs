//! Fixed-window, per-client request limiter
//!
//! Counts requests per client IP and clears every count once the window has
//! elapsed. State is process-local.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    counts: HashMap<Option<IpAddr>, u32>,
}

pub struct RateLimiter {
    limit: u32,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// `limit` requests per client per minute; 0 disables limiting
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Mutex::new(Window {
                started: Instant::now(),
                counts: HashMap::new(),
            }),
        }
    }

    /// Record a request and report whether it is within the limit
    ///
    /// Requests without a known client address share one bucket.
    pub fn check(&self, client: Option<IpAddr>) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: Option<IpAddr>, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let Ok(mut window) = self.window.lock() else {
            return true;
        };
        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.counts.clear();
        }
        let count = window.counts.entry(client).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }
}
