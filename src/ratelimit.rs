// src/ratelimit.rs
//! Sliding-window admission control for notifications.
//!
//! Hard cap over a configurable window (canonical: one hour). A slice of the
//! cap is reserved for high urgency: low/medium items stop admitting once the
//! unreserved budget is used, high urgency may fill the whole window. This is
//! an admission policy, never a preemption policy; an admitted notification
//! is never evicted.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::classify::Urgency;

#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<VecDeque<DateTime<Utc>>>,
    window: Duration,
    cap: usize,
    high_reserve: usize,
}

impl RateLimiter {
    /// `high_reserve` is clamped to `cap`; a zero cap denies everything.
    pub fn new(cap: usize, high_reserve: usize, window_secs: i64) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            window: Duration::seconds(window_secs.max(1)),
            cap,
            high_reserve: high_reserve.min(cap),
        }
    }

    /// Canonical per-hour limiter.
    pub fn per_hour(cap: usize, high_reserve: usize) -> Self {
        Self::new(cap, high_reserve, 3600)
    }

    /// Admit or suppress, using the wall clock.
    pub fn admit(&self, urgency: Urgency) -> bool {
        self.admit_at(urgency, Utc::now())
    }

    /// Synthetic-clock variant; admission state is recorded on success.
    pub fn admit_at(&self, urgency: Urgency, now: DateTime<Utc>) -> bool {
        let mut buf = self.inner.lock().expect("rate limiter mutex poisoned");
        let cutoff = now - self.window;
        while let Some(&front) = buf.front() {
            if front <= cutoff {
                buf.pop_front();
            } else {
                break;
            }
        }

        let allowed = match urgency {
            Urgency::High => self.cap,
            Urgency::Medium | Urgency::Low => self.cap - self.high_reserve,
        };
        if buf.len() < allowed {
            buf.push_back(now);
            true
        } else {
            false
        }
    }

    /// Admissions currently inside the window (diagnostics).
    pub fn in_window(&self, now: DateTime<Utc>) -> usize {
        let buf = self.inner.lock().expect("rate limiter mutex poisoned");
        let cutoff = now - self.window;
        buf.iter().filter(|&&t| t > cutoff).count()
    }
}
