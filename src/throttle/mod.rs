//! Per-key fixed-window throttling.

mod backend;
mod clock;
mod counter;
pub mod key;
mod sharded;
mod throttler;

pub use backend::Throttle;
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{Allowance, CounterState, MAX_WINDOW};
pub use key::{key_from_addr, key_from_ip, try_key_from_addr, UNKNOWN_KEY};
pub use sharded::ShardedThrottler;
pub use throttler::Throttler;
