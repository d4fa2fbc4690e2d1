//! Append-only forum log: one line per post.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

/// How many posts `/forum` shows.
pub const FORUM_RECENT: usize = 20;

/// Flat-file forum store. Posts are `[ISO-timestamp] sender: text` lines.
pub struct ForumStore {
    path: PathBuf,
}

impl ForumStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, sender: &str, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open forum log: {}", self.path.display()))?;
        let stamp = Utc::now().to_rfc3339();
        writeln!(file, "[{stamp}] {sender}: {text}")?;
        Ok(())
    }

    /// The last `n` posts, oldest first. A missing or unreadable log is
    /// just an empty forum, never an error.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = raw.lines().collect();
        let skip = lines.len().saturating_sub(n);
        lines[skip..].iter().map(|l| l.to_string()).collect()
    }
}
