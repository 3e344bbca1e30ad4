//! Brute-Force Guard
//!
//! Sliding-window attempt counter per key (user id or address) with a
//! sticky block set. Per-key state lives in sharded maps, so attempts on
//! unrelated keys do not contend, and each key's record-prune-check runs
//! under its shard lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardState {
    Clear,
    Watching,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub state: GuardState,
    pub attempts_in_window: usize,
    /// True only on the attempt that crossed the threshold.
    pub newly_locked: bool,
}

#[derive(Debug)]
pub struct BruteForceGuard {
    max_attempts: usize,
    window: Duration,
    attempts: DashMap<String, VecDeque<DateTime<Utc>>>,
    blocked: DashMap<String, DateTime<Utc>>,
}

impl Default for BruteForceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::minutes(DEFAULT_WINDOW_MINUTES))
    }
}

impl BruteForceGuard {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            window,
            attempts: DashMap::new(),
            blocked: DashMap::new(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn in_window(&self, now: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        now - at < self.window
    }

    /// Record an attempt for `key` at `now` and lock the key once the
    /// pruned count reaches the threshold.
    ///
    /// An attempt exactly one window old is already outside the window.
    pub fn record_attempt(&self, key: &str, now: DateTime<Utc>) -> AttemptOutcome {
        let mut window = self.attempts.entry(key.to_string()).or_default();
        window.push_back(now);
        window.retain(|at| self.in_window(now, *at));
        let count = window.len();

        if self.blocked.contains_key(key) {
            return AttemptOutcome {
                state: GuardState::Locked,
                attempts_in_window: count,
                newly_locked: false,
            };
        }

        if count >= self.max_attempts {
            self.blocked.insert(key.to_string(), now);
            warn!(
                "Locked {} after {} attempts within {} minutes",
                key,
                count,
                self.window.num_minutes()
            );
            return AttemptOutcome {
                state: GuardState::Locked,
                attempts_in_window: count,
                newly_locked: true,
            };
        }

        debug!("Recorded attempt {} of {} for {}", count, self.max_attempts, key);
        AttemptOutcome {
            state: GuardState::Watching,
            attempts_in_window: count,
            newly_locked: false,
        }
    }

    /// Pure membership test
    pub fn is_blocked(&self, key: &str) -> bool {
        self.blocked.contains_key(key)
    }

    /// Add `key` to the block set directly. Returns false if already blocked.
    pub fn block(&self, key: &str, now: DateTime<Utc>) -> bool {
        let inserted = self.blocked.insert(key.to_string(), now).is_none();
        if inserted {
            info!("Blocked {}", key);
        }
        inserted
    }

    /// Release a block and forget the key's attempt window. Unblocking an
    /// unknown key is a no-op; returns whether a block was removed.
    pub fn unblock(&self, key: &str) -> bool {
        let removed = self.blocked.remove(key).is_some();
        self.attempts.remove(key);
        if removed {
            info!("Unblocked {}", key);
        } else {
            debug!("Unblock requested for {} which was not blocked", key);
        }
        removed
    }

    /// Attempts still inside the window at `now`, without pruning
    pub fn attempts_in_window(&self, key: &str, now: DateTime<Utc>) -> usize {
        self.attempts
            .get(key)
            .map(|window| window.iter().filter(|at| self.in_window(now, **at)).count())
            .unwrap_or(0)
    }

    pub fn state(&self, key: &str, now: DateTime<Utc>) -> GuardState {
        if self.is_blocked(key) {
            GuardState::Locked
        } else if self.attempts_in_window(key, now) > 0 {
            GuardState::Watching
        } else {
            GuardState::Clear
        }
    }

    pub fn blocked_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.blocked.get(key).map(|at| *at)
    }

    pub fn blocked_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blocked.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
