//! Editor event coalescing.
//!
//! Two small timer tables, both driven by caller-supplied instants so
//! behavior is testable without sleeping:
//!
//! - [`DebounceTable`] holds a per-document quiet-period deadline. Every
//!   modify event pushes the deadline out; a document is only handed to
//!   the scanner once its deadline passes with no further edits.
//! - [`OpenedDedup`] collapses bursts of open events for one document
//!   (editors commonly fire several per user action) into a single
//!   processed event per window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct DebounceTable {
    window: Duration,
    deadlines: HashMap<String, Instant>,
}

impl DebounceTable {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    /// Register an edit. Resets the document's deadline to `now + window`.
    pub fn touch(&mut self, path: &str, now: Instant) {
        self.deadlines.insert(path.to_string(), now + self.window);
    }

    /// Remove and return every document whose quiet period has elapsed,
    /// in deterministic path order.
    pub fn due(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        expired.sort();
        for path in &expired {
            self.deadlines.remove(path);
        }
        expired
    }

    pub fn is_pending(&self, path: &str) -> bool {
        self.deadlines.contains_key(path)
    }

    pub fn cancel(&mut self, path: &str) {
        self.deadlines.remove(path);
    }

    /// Earliest deadline currently held, for drivers that sleep until
    /// the next flush point.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[derive(Debug)]
pub struct OpenedDedup {
    window: Duration,
    last_processed: HashMap<String, Instant>,
}

impl OpenedDedup {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_processed: HashMap::new(),
        }
    }

    /// Whether an open event for `path` at `now` should be processed.
    /// Returns `true` and records the event when the previous processed
    /// open is outside the window (or absent).
    pub fn should_process(&mut self, path: &str, now: Instant) -> bool {
        if let Some(&last) = self.last_processed.get(path) {
            if now.duration_since(last) < self.window {
                return false;
            }
        }
        self.last_processed.insert(path.to_string(), now);
        true
    }
}
