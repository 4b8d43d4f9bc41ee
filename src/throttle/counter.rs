//! Per-key window state.

use std::time::{Duration, Instant};

/// Longest window an [`Instant`] is asked to represent, roughly 100 years.
///
/// Longer periods are clamped so `reset_at` stays representable.
pub const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// State of one key's current window.
///
/// A window is never edited in place across a rollover: an expired state is
/// replaced with [`CounterState::open`] in one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    /// Admissions still permitted in this window
    remaining: u64,
    /// When this window ends
    reset_at: Instant,
}

impl CounterState {
    /// Open a fresh window at `now` with the full quota.
    ///
    /// Periods beyond [`MAX_WINDOW`] are clamped to it.
    pub fn open(limit: u64, now: Instant, period: Duration) -> Self {
        Self {
            remaining: limit,
            reset_at: now.checked_add(period.min(MAX_WINDOW)).unwrap_or(now),
        }
    }

    /// Whether this window has ended at `now`.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }

    /// Take one admission unit if any are left. Saturates at zero.
    #[inline]
    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }

    /// Snapshot this state as the caller-facing result.
    pub fn allowance(&self) -> Allowance {
        Allowance {
            remaining: self.remaining,
            reset_at: self.reset_at,
        }
    }
}

/// Result of an admission check.
///
/// This is informational: the throttler never rejects a call on its own.
/// Callers deny the request when [`Allowance::is_throttled`] is true and may
/// surface `reset_at` as a retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    /// Admissions left in the current window after this call
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: Instant,
}

impl Allowance {
    /// True when no admissions are left in the window.
    #[inline]
    pub fn is_throttled(&self) -> bool {
        self.remaining == 0
    }

    /// Time from `now` until the window resets, zero if already past.
    pub fn retry_after(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}
