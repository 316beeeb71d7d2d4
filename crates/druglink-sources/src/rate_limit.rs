//! Sliding-window request limits.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use druglink_core::SharedClock;
use serde::Serialize;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Current usage of both windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub used_last_minute: u32,
    pub limit_per_minute: u32,
    pub used_last_hour: u32,
    pub limit_per_hour: u32,
}

impl RateLimitStatus {
    /// Whether another request would be allowed now.
    pub fn has_capacity(&self) -> bool {
        self.used_last_minute < self.limit_per_minute && self.used_last_hour < self.limit_per_hour
    }
}

/// Per-minute and per-hour sliding counters.
///
/// A refused acquisition does not count against either window.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    /// Timestamps of granted requests within the last hour, oldest first
    granted: Mutex<VecDeque<Instant>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32, clock: SharedClock) -> Self {
        Self {
            per_minute,
            per_hour,
            granted: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Take one request slot if both windows have room.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        evict_older_than(&mut granted, now, HOUR);

        let last_minute = count_within(&granted, now, MINUTE);
        if last_minute >= self.per_minute || granted.len() as u32 >= self.per_hour {
            return false;
        }
        granted.push_back(now);
        true
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = self.clock.now();
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        evict_older_than(&mut granted, now, HOUR);

        RateLimitStatus {
            used_last_minute: count_within(&granted, now, MINUTE),
            limit_per_minute: self.per_minute,
            used_last_hour: granted.len() as u32,
            limit_per_hour: self.per_hour,
        }
    }
}

fn evict_older_than(granted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = granted.front() {
        if now.duration_since(*front) >= window {
            granted.pop_front();
        } else {
            break;
        }
    }
}

fn count_within(granted: &VecDeque<Instant>, now: Instant, window: Duration) -> u32 {
    granted
        .iter()
        .rev()
        .take_while(|at| now.duration_since(**at) < window)
        .count() as u32
}
