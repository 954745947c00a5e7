use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

pub struct Stats {
    total_crawled: AtomicU64,
    total_failed: AtomicU64,
    total_retried: AtomicU64,
    total_dropped: AtomicU64,
    total_items: AtomicU64,
    start_time: DateTime<Utc>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_crawled: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_retried: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_items: AtomicU64::new(0),
            start_time: Utc::now(),
        }
    }

    pub fn incr_total_crawled(&self) {
        self.total_crawled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_total_failed(&self) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_total_retried(&self) {
        self.total_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_total_dropped(&self) {
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_total_items(&self, value: u64) {
        self.total_items.fetch_add(value, Ordering::Relaxed);
    }

    pub fn total_crawled(&self) -> u64 {
        self.total_crawled.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    pub fn total_retried(&self) -> u64 {
        self.total_retried.load(Ordering::Relaxed)
    }

    /// Requests dropped without a fetch: too deep, already visited, or
    /// pointing at an unknown rule.
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn total_items(&self) -> u64 {
        self.total_items.load(Ordering::Relaxed)
    }

    pub fn crawled_per_minute(&self) -> u64 {
        per_minute(self.total_crawled(), self.elapsed_time())
    }

    pub fn items_per_minute(&self) -> u64 {
        per_minute(self.total_items(), self.elapsed_time())
    }

    /// Elapsed time since the engine started in seconds
    pub fn elapsed_time(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

fn per_minute(total: u64, elapsed_secs: i64) -> u64 {
    let minutes = (elapsed_secs / 60) as u64;
    if minutes > 0 {
        total / minutes
    } else {
        0
    }
}
