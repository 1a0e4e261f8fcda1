//! Bounded activity log: a newest-first ring of timestamped entries.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One log line. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Fixed-capacity activity log. The oldest entries are silently dropped
/// once capacity is exceeded. Writer exclusion is the enclosing engine
/// lock's job, not this type's.
#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message at the front, timestamped now.
    pub fn push(&mut self, message: impl Into<String>) {
        self.entries.push_front(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
        self.entries.truncate(self.capacity);
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.entries.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut log = ActivityLog::new(10);
        log.push("first");
        log.push("second");

        let recent = log.recent(10);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "first");
    }

    #[test]
    fn test_capacity_bound() {
        let mut log = ActivityLog::new(50);
        for i in 0..75 {
            log.push(format!("entry {i}"));
        }

        assert_eq!(log.len(), 50);
        // Oldest entries dropped, newest retained
        assert_eq!(log.recent(1)[0].message, "entry 74");
        assert!(log.recent(50).iter().all(|e| {
            let n: usize = e.message["entry ".len()..].parse().unwrap();
            n >= 25
        }));
    }

    #[test]
    fn test_recent_limits_result() {
        let mut log = ActivityLog::new(50);
        for i in 0..30 {
            log.push(format!("entry {i}"));
        }

        assert_eq!(log.recent(20).len(), 20);
        assert_eq!(log.recent(100).len(), 30);
    }
}
