//! Per-identifier sliding-window rate limiting for the device endpoints.
//!
//! State is process-local. Each key holds the instants of the requests admitted
//! inside the current window; a request is admitted while fewer than
//! `max_requests` remain after dropping those older than the window.
//! Only the first rejection after an admitted request is flagged for auditing,
//! so a throttled client cannot turn rejections into database writes.

use crate::errors::EshError;
use crate::settings::RateLimit as RateLimitCfg;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Prune idle keys once the map grows past this many entries.
const CLEANUP_THRESHOLD: usize = 10_000;

#[derive(Debug, Default)]
struct Window {
    hits: VecDeque<Instant>,
    rejection_reported: bool,
}

/// A refused request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub retry_after_secs: u64,
    /// Set on the first rejection since the key was last admitted.
    pub first_since_admit: bool,
}

impl From<Rejection> for EshError {
    fn from(rejection: Rejection) -> Self {
        EshError::RateLimited {
            retry_after_secs: rejection.retry_after_secs,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<DashMap<String, Window>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            state: Arc::new(DashMap::new()),
            max_requests: max_requests as usize,
            window,
        }
    }

    pub fn from_settings(cfg: &RateLimitCfg) -> Self {
        Self::new(cfg.max_requests, Duration::from_secs(cfg.window_secs))
    }

    pub fn check(&self, key: &str) -> Result<(), Rejection> {
        self.check_at(key, Instant::now())
    }

    /// Admit or reject one request for `key` at `now`. Rejected requests are not recorded.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), Rejection> {
        let mut entry = self.state.entry(key.to_string()).or_default();
        let slot = entry.value_mut();
        let hits = &mut slot.hits;

        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.max_requests {
            let retry_after = hits
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            // Round up so clients never retry a fraction of a second early
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let first_since_admit = !slot.rejection_reported;
            slot.rejection_reported = true;
            return Err(Rejection {
                retry_after_secs: retry_after_secs.max(1),
                first_since_admit,
            });
        }

        hits.push_back(now);
        slot.rejection_reported = false;
        drop(entry);

        if self.state.len() > CLEANUP_THRESHOLD {
            self.cleanup(now);
        }

        Ok(())
    }

    fn cleanup(&self, now: Instant) {
        let window = self.window;
        self.state.retain(|_, w| {
            w.hits
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
    }
}
