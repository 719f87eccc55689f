// src/core/rate_limiter.rs

//! Fixed-window rate limiter guarding repeated scans.
//!
//! Each identifier gets its own window. A denied request is a value, not an
//! error: callers choose whether to wait, queue, or report.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::core::clock::Clock;

pub const GLOBAL_IDENTIFIER: &str = "global";

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Length of one window
    pub window_secs: i64,
    /// Requests allowed per identifier per window
    pub max_requests: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    reset_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole seconds until the window resets, set only when denied.
    pub retry_after: Option<u64>,
}

pub struct RateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, RateLimiterConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: RateLimiterConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn check_global(&self) -> RateLimitDecision {
        self.check(GLOBAL_IDENTIFIER)
    }

    /// Counts one request against `identifier`.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries.entry(identifier.to_string()).or_insert_with(|| RateLimitEntry {
            count: 0,
            reset_time: now,
        });

        if now >= entry.reset_time {
            entry.count = 0;
            entry.reset_time = now + Duration::seconds(self.config.window_secs);
        }

        if entry.count >= self.config.max_requests {
            let remaining = entry.reset_time - now;
            // Rounded up to whole seconds.
            let retry_after = (remaining.num_milliseconds().max(1) as u64).div_ceil(1000);
            warn!(identifier, retry_after, "Rate limit exceeded.");
            return RateLimitDecision { allowed: false, retry_after: Some(retry_after) };
        }

        entry.count += 1;
        debug!(identifier, count = entry.count, "Rate limit check passed.");
        RateLimitDecision { allowed: true, retry_after: None }
    }

    /// Forgets the window for `identifier`.
    pub fn reset(&self, identifier: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }
}
