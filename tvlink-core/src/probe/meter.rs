//! Throughput meter for bandwidth probes.
//!
//! Records `(timestamp, bytes)` samples for one measurement round and
//! derives bytes/second both over the whole round and over a recent
//! rolling window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::info::Bandwidth;

pub struct ThroughputMeter {
    /// When the measurement round began (socket connected).
    started_at: Instant,
    /// Samples inside the rolling window: `(when, bytes)`.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    /// Bytes inside the rolling window.
    window_bytes: u64,
    /// Bytes since `started_at`.
    total_bytes: u64,
}

impl ThroughputMeter {
    /// Create a meter with a 1-second rolling window.
    pub fn new(started_at: Instant) -> Self {
        Self::with_window(started_at, Duration::from_secs(1))
    }

    pub fn with_window(started_at: Instant, window: Duration) -> Self {
        Self {
            started_at,
            samples: VecDeque::with_capacity(64),
            window,
            window_bytes: 0,
            total_bytes: 0,
        }
    }

    /// Restart the round, e.g. once the socket is actually connected.
    pub fn restart(&mut self, at: Instant) {
        self.started_at = at;
        self.samples.clear();
        self.window_bytes = 0;
        self.total_bytes = 0;
    }

    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.window_bytes += bytes;
        self.total_bytes += bytes;
        self.evict(when);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Average throughput since the round began.
    pub fn average_bps(&self, now: Instant) -> Bandwidth {
        if self.total_bytes == 0 {
            return 0;
        }
        let elapsed = self.elapsed(now).max(Duration::from_millis(1));
        (self.total_bytes as f64 / elapsed.as_secs_f64()) as Bandwidth
    }

    /// Throughput over the most recent window.
    pub fn recent_bps(&self) -> Bandwidth {
        let elapsed = match (self.samples.front(), self.samples.back()) {
            (Some((first, _)), Some((last, _))) => {
                last.duration_since(*first).max(Duration::from_millis(1))
            }
            _ => return 0,
        };
        (self.window_bytes as f64 / elapsed.as_secs_f64()) as Bandwidth
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.window_bytes = self.window_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}
