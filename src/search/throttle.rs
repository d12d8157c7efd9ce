//! Short-window deduplication of identical queries

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Trailing window in which a repeated query is considered redundant
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(5);

/// Distinct queries remembered before expired entries are swept
pub const DEFAULT_CAPACITY: usize = 4096;

/// Exact-match dedup cache keyed by query string
///
/// The key map is bounded: when it reaches capacity, entries older than the
/// window are dropped, and if that frees nothing the oldest entry goes.
#[derive(Debug)]
pub struct SoftThrottle {
    seen: Mutex<HashMap<String, Instant>>,
    window: Duration,
    capacity: usize,
}

impl SoftThrottle {
    pub fn new() -> Self {
        Self::with_window(THROTTLE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self::with_limits(window, DEFAULT_CAPACITY)
    }

    pub fn with_limits(window: Duration, capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
            capacity: capacity.max(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// False if `query` was seen within the window; otherwise stamps it and returns true
    pub fn is_novel(&self, query: &str) -> bool {
        self.stamp(query).is_some()
    }

    /// Like [`is_novel`](Self::is_novel), returning the recorded stamp so a
    /// caller that never answered the query can [`release`](Self::release) it
    pub fn stamp(&self, query: &str) -> Option<Instant> {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if let Some(last) = seen.get(query) {
            if now.duration_since(*last) < self.window {
                return None;
            }
        } else if seen.len() >= self.capacity {
            self.make_room(&mut seen, now);
        }

        seen.insert(query.to_string(), now);
        Some(now)
    }

    /// Forget `query` if its entry is still the given stamp
    ///
    /// Any earlier entry had expired when the stamp was taken, so removing
    /// the key restores the query's novelty.
    pub fn release(&self, query: &str, stamp: Instant) {
        let mut seen = self.seen.lock();
        if seen.get(query) == Some(&stamp) {
            seen.remove(query);
            debug!("Throttle released {}", query);
        }
    }

    /// Number of remembered queries
    pub fn tracked(&self) -> usize {
        self.seen.lock().len()
    }

    fn make_room(&self, seen: &mut HashMap<String, Instant>, now: Instant) {
        let before = seen.len();
        seen.retain(|_, last| now.duration_since(*last) < self.window);
        debug!("Throttle swept {} expired queries", before - seen.len());

        if seen.len() >= self.capacity {
            let oldest = seen
                .iter()
                .min_by_key(|(_, last)| **last)
                .map(|(query, _)| query.clone());
            if let Some(query) = oldest {
                seen.remove(&query);
            }
        }
    }
}

impl Default for SoftThrottle {
    fn default() -> Self {
        Self::new()
    }
}
