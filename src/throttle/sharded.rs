//! Sharded throttler backed by a concurrent map.
//!
//! Same contract as [`Throttler`](super::Throttler), but the key space is
//! split across independently locked shards so unrelated keys do not contend
//! on one lock. Per-key ordering is unchanged: the shard holding a key stays
//! write-locked while its window is rolled over and decremented.

use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::Throttle;
use super::clock::{Clock, SystemClock};
use super::counter::{Allowance, CounterState};

pub struct ShardedThrottler<C: Clock = SystemClock> {
    limit: u64,
    period: Duration,
    counters: DashMap<u64, CounterState>,
    shards: usize,
    clock: C,
}

/// Four shards per available core, as a power of two.
fn default_shard_amount() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, usize::from);
    (cores * 4).next_power_of_two().max(2)
}

impl ShardedThrottler<SystemClock> {
    /// Create a sharded throttler with the default shard count.
    pub fn new(limit: u64, period: Duration) -> Self {
        Self::with_clock(limit, period, SystemClock)
    }

    /// Create a sharded throttler with at least `shards` shards.
    ///
    /// The count is rounded up to a power of two, minimum 2.
    pub fn with_shards(limit: u64, period: Duration, shards: usize) -> Self {
        Self::build(limit, period, shards.max(2).next_power_of_two(), SystemClock)
    }
}

impl<C: Clock> ShardedThrottler<C> {
    /// Create a sharded throttler reading time from `clock`.
    pub fn with_clock(limit: u64, period: Duration, clock: C) -> Self {
        Self::build(limit, period, default_shard_amount(), clock)
    }

    fn build(limit: u64, period: Duration, shards: usize, clock: C) -> Self {
        Self {
            limit,
            period,
            counters: DashMap::with_shard_amount(shards),
            shards,
            clock,
        }
    }

    /// Record one request for `key`. See [`Throttler::allow`](super::Throttler::allow).
    pub fn allow(&self, key: u64) -> Allowance {
        let now = self.clock.now();

        let mut state = self
            .counters
            .entry(key)
            .or_insert_with(|| CounterState::open(self.limit, now, self.period));

        if state.is_expired(now) {
            debug!(key = key, "Window rolled over");
            *state = CounterState::open(self.limit, now, self.period);
        }

        state.consume();
        let allowance = state.allowance();
        drop(state);

        trace!(
            key = key,
            remaining = allowance.remaining,
            "Checked throttle"
        );

        allowance
    }

    /// Evict every key whose window ended at or before now.
    pub fn clean(&self) {
        let now = self.clock.now();
        let before = self.counters.len();

        self.counters.retain(|_, state| !state.is_expired(now));

        debug!(
            evicted = before.saturating_sub(self.counters.len()),
            retained = self.counters.len(),
            "Cleaned expired windows"
        );
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Number of independently locked shards.
    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// Current state for `key` without consuming anything.
    pub fn peek(&self, key: u64) -> Option<CounterState> {
        self.counters.get(&key).map(|state| *state)
    }
}

impl<C: Clock> Throttle for ShardedThrottler<C> {
    fn allow(&self, key: u64) -> Allowance {
        ShardedThrottler::allow(self, key)
    }

    fn clean(&self) {
        ShardedThrottler::clean(self)
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

impl<C: Clock> std::fmt::Debug for ShardedThrottler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedThrottler")
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("shards", &self.shards)
            .field("keys", &self.counters.len())
            .finish()
    }
}
