//! Sliding-window flood control for chat lines.
//!
//! Strike-based escalation rather than a hard token bucket: a burst earns a
//! warning and the line is suppressed; three consecutive strikes force a
//! disconnect. Slowing below the threshold resets the strike count.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Messages per second before a line counts as flood.
pub const RATE_LIMIT_PER_SEC: usize = 5;

/// Strikes before the connection is ejected with reason `flood`.
pub const FLOOD_STRIKE_LIMIT: u32 = 3;

/// Outcome of admitting one chat line.
#[derive(Debug, PartialEq, Eq)]
pub enum FloodVerdict {
    /// Under the threshold; broadcast normally.
    Clear,
    /// Over the threshold; warn the sender and suppress the line.
    Warn(u32),
    /// Third strike; disconnect the sender.
    Eject,
}

/// Per-connection flood state. Owned by the connection's task; never shared.
#[derive(Debug)]
pub struct FloodControl {
    timestamps: VecDeque<Instant>,
    strikes: u32,
}

impl Default for FloodControl {
    fn default() -> Self {
        Self::new()
    }
}

impl FloodControl {
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::with_capacity(RATE_LIMIT_PER_SEC * 2),
            strikes: 0,
        }
    }

    /// Record one chat line at `now` and judge it. The window keeps the last
    /// `2 * RATE_LIMIT_PER_SEC` timestamps; a line floods when the most
    /// recent `RATE_LIMIT_PER_SEC` of them span less than one second.
    pub fn check(&mut self, now: Instant) -> FloodVerdict {
        if self.timestamps.len() == RATE_LIMIT_PER_SEC * 2 {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(now);

        if self.timestamps.len() >= RATE_LIMIT_PER_SEC {
            let kth_newest = self.timestamps[self.timestamps.len() - RATE_LIMIT_PER_SEC];
            if now.duration_since(kth_newest) < Duration::from_secs(1) {
                self.strikes += 1;
                return if self.strikes >= FLOOD_STRIKE_LIMIT {
                    FloodVerdict::Eject
                } else {
                    FloodVerdict::Warn(self.strikes)
                };
            }
        }
        self.strikes = 0;
        FloodVerdict::Clear
    }

    /// Login, registration and logout clear any accumulated strikes.
    pub fn reset(&mut self) {
        self.strikes = 0;
    }

    pub fn strikes(&self) -> u32 {
        self.strikes
    }
}
