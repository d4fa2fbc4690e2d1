//! Bounded replay buffer of past broadcast lines.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Maximum number of broadcast lines retained.
pub const HISTORY_SIZE: usize = 200;

/// How many lines are replayed to a newly joined connection.
pub const REPLAY_COUNT: usize = 5;

/// One retained broadcast line.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub line: String,
}

/// Ring buffer of the most recent `HISTORY_SIZE` broadcast lines, oldest
/// first. Reads never mutate.
#[derive(Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(HISTORY_SIZE)
    }
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            at: Utc::now(),
            line: line.to_string(),
        });
    }

    /// The most recent `n` entries, in order.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
