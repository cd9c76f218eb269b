//! Per-user sliding-window rate limiter.
//!
//! State lives in process memory only: it is created once at startup, shared
//! through an `Arc`, and reset on restart. Running several bot processes means
//! every process counts separately, so a multi-process deployment needs a
//! shared expiring counter instead.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: usize = 30;

/// Default window length (one hour).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<Windows>,
}

#[derive(Default)]
struct Windows {
    /// user id -> request instants, oldest first.
    by_user: HashMap<String, VecDeque<Instant>>,
    swept_at: Option<Instant>,
}

impl Windows {
    /// Forget users whose newest request has left the window. Runs at most
    /// once per window.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if self.swept_at.is_some_and(|t| now.saturating_duration_since(t) < window) {
            return;
        }
        self.swept_at = Some(now);
        let before = self.by_user.len();
        self.by_user
            .retain(|_, times| times.back().is_some_and(|&t| now.saturating_duration_since(t) < window));
        if self.by_user.len() < before {
            debug!("Rate limiter dropped {} idle users", before - self.by_user.len());
        }
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(Windows::default()),
        }
    }

    /// Check whether `user_id` may make another request right now.
    ///
    /// Returns `(true, "")` and records the request when allowed, otherwise
    /// `(false, message)` with the wait time in whole minutes.
    pub fn is_allowed(&self, user_id: &str) -> (bool, String) {
        self.check_at(user_id, Instant::now())
    }

    /// Same as [`is_allowed`](Self::is_allowed) with an explicit clock.
    pub fn check_at(&self, user_id: &str, now: Instant) -> (bool, String) {
        // The lock is never held across an await, so a poisoned map is still consistent.
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.sweep(now, self.window);
        let times = requests.by_user.entry(user_id.to_string()).or_default();

        while let Some(&oldest) = times.front() {
            if now.saturating_duration_since(oldest) < self.window {
                break;
            }
            times.pop_front();
        }

        if times.len() >= self.max_requests {
            let oldest = times.front().copied().unwrap_or(now);
            let wait = self.window.saturating_sub(now.saturating_duration_since(oldest));
            let minutes = wait.as_secs() / 60;
            debug!("Rate limited user {user_id} ({} requests, wait {minutes}m)", times.len());
            return (false, format!("Rate limit reached. Please wait {minutes} minutes."));
        }

        times.push_back(now);
        (true, String::new())
    }

    #[cfg(test)]
    fn pending(&self, user_id: &str) -> usize {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.by_user.get(user_id).map_or(0, VecDeque::len)
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).by_user.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}
