//! Core throttler implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::Throttle;
use super::clock::{Clock, SystemClock};
use super::counter::{Allowance, CounterState};

/// In-memory registry of per-key fixed-window counters.
///
/// One exclusive lock serializes every read and write of the counter map,
/// for both [`allow`](Throttler::allow) and [`clean`](Throttler::clean).
/// Share it across threads or tasks behind an `Arc`.
pub struct Throttler<C: Clock = SystemClock> {
    /// Maximum admissions per key per window
    limit: u64,
    /// Window length
    period: Duration,
    /// Counter state indexed by key
    counters: Mutex<HashMap<u64, CounterState>>,
    clock: C,
}

impl Throttler<SystemClock> {
    /// Create a throttler admitting `limit` requests per key every `period`.
    ///
    /// A `limit` of zero throttles every call. A zero `period` makes every
    /// call open a fresh window.
    pub fn new(limit: u64, period: Duration) -> Self {
        Self::with_clock(limit, period, SystemClock)
    }
}

impl<C: Clock> Throttler<C> {
    /// Create a throttler reading time from `clock`.
    pub fn with_clock(limit: u64, period: Duration, clock: C) -> Self {
        Self {
            limit,
            period,
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Record one request for `key`.
    ///
    /// Opens a fresh window if the key is unknown or its window has ended,
    /// then consumes one admission if any remain. The first call in a window
    /// reports `limit - 1`; once exhausted every call reports `0` until the
    /// window resets. Never rejects and never fails.
    pub fn allow(&self, key: u64) -> Allowance {
        let now = self.clock.now();
        let allowance = self.allow_at(key, now);

        trace!(
            key = key,
            remaining = allowance.remaining,
            "Checked throttle"
        );

        allowance
    }

    fn allow_at(&self, key: u64, now: Instant) -> Allowance {
        let mut counters = self.counters.lock();

        let state = counters
            .entry(key)
            .and_modify(|state| {
                if state.is_expired(now) {
                    debug!(key = key, "Window rolled over");
                    *state = CounterState::open(self.limit, now, self.period);
                }
            })
            .or_insert_with(|| {
                debug!(
                    key = key,
                    limit = self.limit,
                    period = ?self.period,
                    "Opening window for new key"
                );
                CounterState::open(self.limit, now, self.period)
            });

        state.consume();
        state.allowance()
    }

    /// Evict every key whose window ended at or before now.
    ///
    /// Keys with a future `reset_at` keep their exact state. Not needed for
    /// correctness of [`allow`](Throttler::allow), which rolls expired windows
    /// over on access; this only bounds memory.
    pub fn clean(&self) {
        let now = self.clock.now();
        let mut counters = self.counters.lock();
        let before = counters.len();

        counters.retain(|_, state| !state.is_expired(now));

        debug!(
            evicted = before - counters.len(),
            retained = counters.len(),
            "Cleaned expired windows"
        );
    }

    /// Maximum admissions per key per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state for `key` without consuming anything.
    ///
    /// Returns `None` if the key is not tracked.
    pub fn peek(&self, key: u64) -> Option<CounterState> {
        self.counters.lock().get(&key).copied()
    }
}

impl<C: Clock> Throttle for Throttler<C> {
    fn allow(&self, key: u64) -> Allowance {
        Throttler::allow(self, key)
    }

    fn clean(&self) {
        Throttler::clean(self)
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn len(&self) -> usize {
        Throttler::len(self)
    }
}

impl<C: Clock> std::fmt::Debug for Throttler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("keys", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn manual(limit: u64, period: Duration) -> (Throttler<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (Throttler::with_clock(limit, period, clock.clone()), clock)
    }

    #[test]
    fn test_throttler_creation() {
        let throttler = Throttler::new(3, Duration::from_secs(1));
        assert_eq!(throttler.limit(), 3);
        assert_eq!(throttler.period(), Duration::from_secs(1));
        assert!(throttler.is_empty());
    }

    #[test]
    fn test_remaining_counts_down_then_saturates() {
        let (throttler, clock) = manual(3, Duration::from_secs(1));
        let expected_reset = clock.now() + Duration::from_secs(1);

        let seen: Vec<u64> = (0..5).map(|_| throttler.allow(7).remaining).collect();
        assert_eq!(seen, vec![2, 1, 0, 0, 0]);

        // Throttled calls keep the same window
        let allowance = throttler.allow(7);
        assert!(allowance.is_throttled());
        assert_eq!(allowance.reset_at, expected_reset);
    }

    #[test]
    fn test_window_rolls_over_at_reset_instant() {
        let (throttler, clock) = manual(3, Duration::from_secs(1));

        for _ in 0..4 {
            throttler.allow(1);
        }

        clock.advance(Duration::from_millis(999));
        assert_eq!(throttler.allow(1).remaining, 0);

        clock.advance(Duration::from_millis(1));
        let allowance = throttler.allow(1);
        assert_eq!(allowance.remaining, 2);
        assert_eq!(allowance.reset_at, clock.now() + Duration::from_secs(1));
    }

    #[test]
    fn test_rollover_after_long_idle_anchors_to_call_time() {
        let (throttler, clock) = manual(2, Duration::from_secs(1));

        throttler.allow(9);
        clock.advance(Duration::from_secs(30));

        let allowance = throttler.allow(9);
        assert_eq!(allowance.remaining, 1);
        assert_eq!(allowance.reset_at, clock.now() + Duration::from_secs(1));
    }

    #[test]
    fn test_zero_limit_always_throttled() {
        let (throttler, _clock) = manual(0, Duration::from_secs(1));

        for _ in 0..3 {
            let allowance = throttler.allow(42);
            assert_eq!(allowance.remaining, 0);
            assert!(allowance.is_throttled());
        }
        assert_eq!(throttler.len(), 1);
    }

    #[test]
    fn test_huge_period_does_not_panic() {
        let throttler = Throttler::new(3, Duration::MAX);

        let seen: Vec<u64> = (0..4).map(|_| throttler.allow(1).remaining).collect();
        assert_eq!(seen, vec![2, 1, 0, 0]);
        assert_eq!(throttler.period(), Duration::MAX);

        throttler.clean();
        assert_eq!(throttler.len(), 1);
    }

    #[test]
    fn test_zero_period_opens_window_every_call() {
        let (throttler, _clock) = manual(2, Duration::ZERO);

        assert_eq!(throttler.allow(1).remaining, 1);
        assert_eq!(throttler.allow(1).remaining, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let (throttler, clock) = manual(2, Duration::from_secs(1));

        throttler.allow(1);
        throttler.allow(1);
        throttler.allow(1);
        let exhausted_reset = throttler.peek(1).map(|s| s.reset_at());

        clock.advance(Duration::from_millis(500));
        let other = throttler.allow(2);

        assert_eq!(other.remaining, 1);
        assert_eq!(other.reset_at, clock.now() + Duration::from_secs(1));
        assert_eq!(throttler.peek(1).map(|s| s.remaining()), Some(0));
        assert_eq!(throttler.peek(1).map(|s| s.reset_at()), exhausted_reset);
    }

    #[test]
    fn test_remaining_never_exceeds_limit() {
        let (throttler, clock) = manual(4, Duration::from_millis(100));

        for step in 0..200u64 {
            let allowance = throttler.allow(step % 3);
            assert!(allowance.remaining <= throttler.limit());
            clock.advance(Duration::from_millis(7));
        }
    }

    #[test]
    fn test_clean_removes_exactly_expired_keys() {
        let (throttler, clock) = manual(5, Duration::from_secs(1));

        throttler.allow(1);
        clock.advance(Duration::from_millis(600));
        throttler.allow(2);
        throttler.allow(2);
        let kept = throttler.peek(2);

        // Key 1 expires exactly now, key 2 has 600ms left
        clock.advance(Duration::from_millis(400));
        throttler.clean();

        assert_eq!(throttler.len(), 1);
        assert_eq!(throttler.peek(1), None);
        assert_eq!(throttler.peek(2), kept);
    }

    #[test]
    fn test_clean_keeps_live_windows() {
        let (throttler, _clock) = manual(5, Duration::from_secs(1));

        throttler.allow(1);
        throttler.allow(2);
        throttler.clean();

        assert_eq!(throttler.len(), 2);
    }

    #[test]
    fn test_allow_after_clean_starts_fresh() {
        let (throttler, clock) = manual(2, Duration::from_secs(1));

        throttler.allow(3);
        throttler.allow(3);
        clock.advance(Duration::from_secs(2));
        throttler.clean();
        assert!(throttler.is_empty());

        assert_eq!(throttler.allow(3).remaining, 1);
    }

    #[test]
    fn test_real_clock_window_expiry() {
        let throttler = Throttler::new(3, Duration::from_millis(50));

        let first = throttler.allow(5);
        let seen: Vec<u64> = std::iter::once(first.remaining)
            .chain((0..3).map(|_| throttler.allow(5).remaining))
            .collect();
        assert_eq!(seen, vec![2, 1, 0, 0]);

        std::thread::sleep(Duration::from_millis(60));

        let next = throttler.allow(5);
        assert_eq!(next.remaining, 2);
        assert!(next.reset_at > first.reset_at);
    }

    #[test]
    fn test_concurrent_allow_hands_out_each_unit_once() {
        let limit = 100u64;
        let callers = 8;
        let per_caller = 25;
        let throttler = Throttler::new(limit, Duration::from_secs(60));
        let positive = AtomicUsize::new(0);
        let zero = AtomicUsize::new(0);
        let seen = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for _ in 0..callers {
                s.spawn(|| {
                    for _ in 0..per_caller {
                        let remaining = throttler.allow(11).remaining;
                        if remaining > 0 {
                            positive.fetch_add(1, Ordering::Relaxed);
                        } else {
                            zero.fetch_add(1, Ordering::Relaxed);
                        }
                        seen.lock().push(remaining);
                    }
                });
            }
        });

        // Values limit-1..=1 each observed exactly once, no lost decrements
        let mut seen = seen.into_inner();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, (0..limit).collect::<Vec<_>>());
        assert_eq!(positive.load(Ordering::Relaxed), limit as usize - 1);
        assert_eq!(
            zero.load(Ordering::Relaxed),
            callers * per_caller - (limit as usize - 1)
        );
        assert_eq!(throttler.peek(11).map(|s| s.remaining()), Some(0));
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_one_window() {
        let limit = 50u64;
        let throttler = Arc::new(Throttler::new(limit, Duration::from_secs(60)));

        let handles: Vec<_> = (0..limit + 10)
            .map(|_| {
                let throttler = Arc::clone(&throttler);
                tokio::spawn(async move { throttler.allow(3).remaining })
            })
            .collect();

        let mut seen: Vec<u64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        seen.sort_unstable();

        // Every unit handed out exactly once, then saturation
        let mut expected: Vec<u64> = (0..limit).collect();
        expected.extend(std::iter::repeat(0).take(10));
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }
}
