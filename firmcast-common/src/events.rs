//! Bounded, deduplicated event ring
//!
//! The agent never terminates on a parse, timeout, or compatibility error.
//! Instead each noteworthy condition is recorded here, keyed by
//! (category, code): a repeat of an already-recorded condition bumps its
//! count rather than consuming another slot. When the ring is full the
//! oldest entry is evicted.

use serde::{Deserialize, Serialize};

/// Broad classification of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCategory {
    /// Malformed section or message field
    Parse,
    /// A bounded wait elapsed with nothing usable received
    Timeout,
    /// A candidate was rejected by a compatibility check
    Compat,
    /// Candidate table saturation or allocation failure
    Resource,
    /// State machine and download progress
    Progress,
}

/// One deduplicated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub category: EventCategory,
    /// Stable per-condition code, unique within a category
    pub code: u16,
    pub message: String,
    /// How many times this (category, code) has been recorded
    pub count: u32,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

/// Fixed-capacity event store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRing {
    capacity: usize,
    entries: Vec<EventEntry>,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        EventRing {
            capacity,
            entries: Vec::new(),
        }
    }

    /// Record an event, deduplicating on (category, code).
    pub fn record(&mut self, category: EventCategory, code: u16, message: impl Into<String>) {
        let now = chrono::Utc::now();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.category == category && e.code == code)
        {
            entry.count += 1;
            entry.last_seen = now;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(EventEntry {
            category,
            code,
            message: message.into(),
            count: 1,
            first_seen: now,
            last_seen: now,
        });
    }

    pub fn entries(&self) -> &[EventEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
