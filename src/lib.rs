//! Keythrottle - Per-key fixed-window request throttling
//!
//! This crate tracks how many requests each numeric key has made in its
//! current time window and reports how many remain before the window resets.
//! It is an in-memory admission-control primitive: callers deny a request
//! when nothing remains, and may surface the reset time as a retry hint.
//!
//! ```
//! use keythrottle::throttle::{key_from_addr, Throttler};
//! use std::time::Duration;
//!
//! let throttler = Throttler::new(3, Duration::from_secs(1));
//! let key = key_from_addr("203.0.113.7");
//!
//! let remaining: Vec<u64> = (0..4).map(|_| throttler.allow(key).remaining).collect();
//! assert_eq!(remaining, vec![2, 1, 0, 0]);
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod sweeper;
pub mod throttle;
