//! Bounded in-memory holding area for pending entries
//!
//! The buffer is a plain ring: it never blocks and never touches disk. When it
//! is full the oldest entry is discarded and the drop counter advances.

use std::collections::VecDeque;

use super::entry::LogEntry;

/// Result of pushing one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Entry stored, buffer had room
    Stored,
    /// Entry stored after discarding the oldest one
    DroppedOldest,
}

/// Ring buffer of entries waiting for the next flush round
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl LogBuffer {
    /// Create a new log buffer holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Push a new entry, discarding the oldest one if the buffer is full
    pub fn push(&mut self, entry: LogEntry) -> PushOutcome {
        let outcome = if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Stored
        };
        self.entries.push_back(entry);
        outcome
    }

    /// Take every held entry in insertion order, leaving the buffer empty
    pub fn snapshot_and_clear(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries).into()
    }

    /// Get the number of entries in the buffer
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if the next push would discard an entry
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
