//! Coalescing of item-tree change notifications.
//!
//! Notifications only record ids; the index is touched once the stream has been
//! quiet for the debounce window.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Source of the current time, injectable so debounce is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Ids that changed since the last flush.
#[derive(Debug, Default)]
pub struct PendingChanges {
    created: BTreeSet<String>,
    moved: BTreeSet<String>,
    removed: BTreeSet<String>,
    last_event: Option<Instant>,
}

/// A drained set of changes.
#[derive(Debug, Default, PartialEq)]
pub struct ChangeBatch {
    /// Created or moved ids, to be (re)embedded when their content changed
    pub upserts: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upserts.len() + self.removed.len()
    }
}

impl PendingChanges {
    pub fn record_created(&mut self, id: &str, now: Instant) {
        self.removed.remove(id);
        self.created.insert(id.to_string());
        self.last_event = Some(now);
    }

    pub fn record_moved(&mut self, id: &str, now: Instant) {
        if !self.removed.contains(id) {
            self.moved.insert(id.to_string());
        }
        self.last_event = Some(now);
    }

    /// A removal cancels any pending create or move of the same id.
    pub fn record_removed(&mut self, id: &str, now: Instant) {
        self.created.remove(id);
        self.moved.remove(id);
        self.removed.insert(id.to_string());
        self.last_event = Some(now);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.moved.is_empty() && self.removed.is_empty()
    }

    /// Something is pending and nothing arrived for `window`.
    pub fn is_due(&self, now: Instant, window: Duration) -> bool {
        match self.last_event {
            Some(last) if !self.is_empty() => now.saturating_duration_since(last) >= window,
            _ => false,
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn moved_count(&self) -> usize {
        self.moved.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    /// Drain everything recorded so far.
    pub fn take(&mut self) -> ChangeBatch {
        let mut upserts = std::mem::take(&mut self.created);
        upserts.append(&mut self.moved);
        self.last_event = None;

        ChangeBatch {
            upserts,
            removed: std::mem::take(&mut self.removed),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
