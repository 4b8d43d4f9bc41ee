//! Throttle trait for abstracting the single-lock and sharded registries.

use std::time::Duration;

use super::counter::Allowance;

/// Trait for per-key fixed-window throttles.
///
/// This trait abstracts over both [`Throttler`](super::Throttler) and
/// [`ShardedThrottler`](super::ShardedThrottler) so the sweeper and the
/// admission gate can work with either.
pub trait Throttle: Send + Sync {
    /// Record one request for `key` and report what is left of its window.
    fn allow(&self, key: u64) -> Allowance;

    /// Evict every key whose window has ended.
    fn clean(&self);

    /// Maximum admissions per key per window.
    fn limit(&self) -> u64;

    /// Window length.
    fn period(&self) -> Duration;

    /// Number of keys currently tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
