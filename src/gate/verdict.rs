//! Admission verdicts written back to gate clients.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::throttle::Allowance;

/// One-line JSON verdict for a connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the connection was admitted
    pub allowed: bool,
    /// Admissions left in the client's window
    pub remaining: u64,
    /// Configured admissions per window
    pub limit: u64,
    /// Wall-clock time the window resets
    pub reset_at: DateTime<Utc>,
    /// How long a throttled client should wait, zero when admitted
    pub retry_after_ms: u64,
}

impl Verdict {
    /// Build a verdict from an allowance.
    ///
    /// A client is denied once its window reports no admissions left.
    /// `now` and `wall_now` must describe the same moment; the monotonic
    /// `reset_at` is projected onto the wall clock from that pair.
    pub fn new(allowance: &Allowance, limit: u64, now: Instant, wall_now: DateTime<Utc>) -> Self {
        let admitted = !allowance.is_throttled();
        let until_reset = allowance.retry_after(now);
        let reset_at = chrono::Duration::from_std(until_reset)
            .ok()
            .and_then(|d| wall_now.checked_add_signed(d))
            .unwrap_or(wall_now);

        Self {
            allowed: admitted,
            remaining: allowance.remaining,
            limit,
            reset_at,
            retry_after_ms: if admitted {
                0
            } else {
                u64::try_from(until_reset.as_millis()).unwrap_or(u64::MAX)
            },
        }
    }

    /// Serialize as a single newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
