//! Fixed-window ingestion rate limiting.
//!
//! One window per `(channel, org)` pair. The window resets `window` after
//! its first request; `X-RateLimit-Reset` reports the window end. Events
//! with `criticality=critical` bypass the limit when the exemption is
//! configured, so a kill-switch audit trail can never be throttled out.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Limiter settings, applied per `(channel, org)`.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window: Duration,
    /// Let `criticality=critical` events through regardless of the window.
    pub critical_exempt: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 120,
            window: Duration::seconds(60),
            critical_exempt: true,
        }
    }
}

/// Outcome of one admission check, carrying everything the HTTP layer
/// needs for the response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets; set on denials.
    pub retry_after_secs: i64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window counter map. Updates happen under one short mutex so no
/// two concurrent requests can both take the last slot.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, String), Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request on `channel` for `org`.
    /// `critical` marks a critical-event submission for the exemption.
    pub fn check(&self, channel: &str, org_id: &str, critical: bool) -> RateLimitDecision {
        self.check_at(channel, org_id, critical, Utc::now())
    }

    /// Clock-injected variant for tests.
    pub fn check_at(
        &self,
        channel: &str,
        org_id: &str,
        critical: bool,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let mut windows = self.windows.lock();
        let window = windows
            .entry((channel.to_string(), org_id.to_string()))
            .or_insert(Window {
                started_at: now,
                count: 0,
            });

        if now - window.started_at >= self.config.window {
            window.started_at = now;
            window.count = 0;
        }
        let reset_at = window.started_at + self.config.window;

        if critical && self.config.critical_exempt {
            // Exempt traffic is not counted against the window.
            return RateLimitDecision {
                allowed: true,
                limit: self.config.limit,
                remaining: self.config.limit.saturating_sub(window.count),
                reset_at,
                retry_after_secs: 0,
            };
        }

        if window.count >= self.config.limit {
            return RateLimitDecision {
                allowed: false,
                limit: self.config.limit,
                remaining: 0,
                reset_at,
                retry_after_secs: (reset_at - now).num_seconds().max(1),
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: self.config.limit,
            remaining: self.config.limit - window.count,
            reset_at,
            retry_after_secs: 0,
        }
    }
}
