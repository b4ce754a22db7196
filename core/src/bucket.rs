//! A single rate-limit window: at most `capacity` admissions per `window`.
//!
//! A window opens on the first admission recorded after the previous one
//! expired. Expiry is observed lazily: an expired bucket reads as having its
//! full capacity, and the counter is only reset by the next `record`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ClientError;

/// Configuration of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Most admissions allowed in one window. At least 1.
    pub capacity: u32,
    /// Window length in milliseconds. At least 1.
    pub window_ms: u64,
}

impl BucketConfig {
    /// Windows longer than `u64::MAX` milliseconds are clamped.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub(crate) fn validate(&self, index: usize) -> Result<(), ClientError> {
        if self.capacity == 0 {
            return Err(ClientError::Config(format!(
                "bucket {index}: capacity must be at least 1"
            )));
        }
        if self.window_ms == 0 {
            return Err(ClientError::Config(format!(
                "bucket {index}: window must be at least 1ms"
            )));
        }
        Ok(())
    }
}

/// Live counter for one window. Owned by the limiter and only mutated
/// under its lock.
#[derive(Debug, Clone)]
pub struct Bucket {
    capacity: u32,
    window: Duration,
    window_start: Option<Instant>,
    count: u32,
}

impl Bucket {
    /// An empty bucket; its first window opens on the first `record`.
    pub fn new(config: BucketConfig) -> Self {
        Self {
            capacity: config.capacity,
            window: config.window(),
            window_start: None,
            count: 0,
        }
    }

    /// Most admissions allowed in one window.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admissions counted in the current window, before any lazy reset.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// When the current window opened; `None` before the first admission.
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    /// When the current window ends; `None` before the first admission.
    pub fn resets_at(&self) -> Option<Instant> {
        self.window_start.map(|start| start + self.window)
    }

    /// True at or after the end of the current window, and before the first
    /// admission.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.resets_at().map_or(true, |end| now >= end)
    }

    /// Admissions still available at `now`. An expired bucket reads as full
    /// capacity.
    pub fn remaining(&self, now: Instant) -> u32 {
        if self.is_expired(now) {
            self.capacity
        } else {
            self.capacity.saturating_sub(self.count)
        }
    }

    /// No room left in an unexpired window.
    pub fn is_full(&self, now: Instant) -> bool {
        self.remaining(now) == 0
    }

    /// Counts one admission, opening a new window if the current one has
    /// expired. Returns `false`, leaving the bucket untouched, when full.
    pub fn record(&mut self, now: Instant) -> bool {
        if self.is_full(now) {
            return false;
        }
        if self.is_expired(now) {
            self.window_start = Some(now);
            self.count = 1;
        } else {
            self.count += 1;
        }
        true
    }
}
