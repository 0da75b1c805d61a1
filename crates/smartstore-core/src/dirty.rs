//! Dirty-key tracking
//!
//! Records which top-level keys were touched since the last flush started.
//! The set is drained at the start of every flush attempt, before any I/O,
//! so touches that land while a write is running belong to the next flush.

use hashbrown::HashSet;

/// Tracks which keys were touched since the last flush.
///
/// Owned by the store state and only mutated under its lock.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    /// Keys touched since the last flush started
    dirty_keys: HashSet<String>,
    /// Snapshot files written since the store was created
    total_writes: u64,
    /// Flush attempts, including no-op ones
    total_cycles: u64,
}

impl DirtyTracker {
    /// Create a new dirty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as touched.
    pub fn mark_dirty(&mut self, key: &str) {
        if !self.dirty_keys.contains(key) {
            self.dirty_keys.insert(key.to_string());
        }
    }

    /// Take all dirty keys, leaving the set empty.
    pub fn take_dirty(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.dirty_keys)
    }

    /// Number of keys currently dirty.
    pub fn dirty_count(&self) -> usize {
        self.dirty_keys.len()
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.dirty_keys.contains(key)
    }

    /// Forget everything, e.g. when a reopen replaces the contents.
    pub fn clear(&mut self) {
        self.dirty_keys.clear();
    }

    /// Snapshot files written since the store was created.
    pub fn total_writes(&self) -> u64 {
        self.total_writes
    }

    /// Flush attempts since the store was created.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Record that a flush attempt finished planning.
    pub(crate) fn record_cycle(&mut self, wrote: bool) {
        self.total_cycles += 1;
        if wrote {
            self.total_writes += 1;
        }
    }
}
