use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::request::Request;
use crate::util;

/// Bookkeeping shared by all workers.
///
/// The visited set and the failure table are keyed by request fingerprint;
/// each has its own lock, held only for one check-and-update.
pub struct CrawlState {
    visited: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, Request>>,
    // Requests pushed and not yet fully processed.
    in_flight: AtomicUsize,
}

impl CrawlState {
    pub fn new() -> Self {
        Self {
            visited: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Marks `unique` as visited. Returns false if it already was.
    pub fn try_mark_visited(&self, unique: &str) -> bool {
        let mut visited = util::lock(&self.visited);
        visited.insert(unique.to_owned())
    }

    pub fn unmark_visited(&self, unique: &str) {
        let mut visited = util::lock(&self.visited);
        visited.remove(unique);
    }

    pub fn has_visited(&self, unique: &str) -> bool {
        let visited = util::lock(&self.visited);
        visited.contains(unique)
    }

    /// Records a failed fetch of `req`.
    ///
    /// Returns true on the first failure of this fingerprint, meaning the
    /// request gets its single retry. Later failures return false.
    pub fn record_failure(&self, req: &Request) -> bool {
        let unique = req.unique();
        if !req.task.reload() {
            self.unmark_visited(&unique);
        }

        let mut failures = util::lock(&self.failures);
        if failures.contains_key(&unique) {
            return false;
        }
        failures.insert(unique, req.clone());
        true
    }

    /// Requests that failed at least once.
    pub fn failures(&self) -> Vec<Request> {
        let failures = util::lock(&self.failures);
        failures.values().cloned().collect()
    }

    pub fn add_in_flight(&self, n: usize) {
        self.in_flight.fetch_add(n, Ordering::SeqCst);
    }

    /// Returns true when this was the last request in flight.
    pub fn finish_in_flight(&self) -> bool {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for CrawlState {
    fn default() -> Self {
        Self::new()
    }
}
