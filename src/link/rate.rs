//! Sliding-window outbound rate limiter.
//!
//! Small embedded targets overrun their RX buffers quickly, so the link caps
//! command throughput to a configured count per second. Denials are
//! synchronous -- nothing is queued; the caller decides whether to retry.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug)]
pub struct RateLimiter {
    window: VecDeque<Instant>,
    cap: usize,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(cap: usize, enabled: bool) -> Self {
        Self {
            window: VecDeque::with_capacity(cap.min(64)),
            cap,
            enabled,
        }
    }

    /// Admit or deny one command at `now`. Admission records the timestamp.
    pub fn check(&mut self, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        while let Some(&front) = self.window.front() {
            if now.duration_since(front) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
        if self.window.len() >= self.cap {
            return false;
        }
        self.window.push_back(now);
        true
    }

    /// Commands admitted inside the current window.
    pub fn current_load(&self) -> usize {
        self.window.len()
    }
}
