//! Bounded per-scope history used for duplicate counting.
//!
//! Each scope (channel) owns a window of normalized fingerprints, newest
//! first. Entries never expire by time, only by capacity. Whole windows are
//! reclaimed once their scope goes idle or is forgotten.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::SelfmodError;
use crate::event::ChannelId;
use crate::logging;

#[derive(Debug, Default)]
struct Window {
    entries: VecDeque<String>,
    /// Capacity the window was last bounded to.
    bound: usize,
    last_seen: u64,
}

impl Window {
    fn check(&self, scope: ChannelId) -> Result<(), SelfmodError> {
        if self.bound > 0 && self.entries.len() > self.bound {
            return Err(SelfmodError::StoreCorruption {
                scope,
                len: self.entries.len(),
                capacity: self.bound,
            });
        }
        Ok(())
    }

    fn push(&mut self, fingerprint: &str, capacity: usize) -> u32 {
        if self.entries.len() >= capacity {
            self.entries.truncate(capacity.saturating_sub(1));
        }
        self.entries.push_front(fingerprint.to_string());
        self.bound = capacity;
        self.entries.iter().filter(|e| e.as_str() == fingerprint).count() as u32
    }
}

#[derive(Debug, Default)]
pub struct WindowStore {
    scopes: Mutex<HashMap<ChannelId, Arc<Mutex<Window>>>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fingerprint` for `scope` and returns how many entries of the
    /// window equal it, the new one included.
    pub fn observe(&self, scope: ChannelId, fingerprint: &str, capacity: usize) -> u32 {
        self.observe_at(scope, fingerprint, capacity, logging::ts_epoch_ms())
    }

    /// Same as [`observe`](Self::observe) with an explicit clock reading,
    /// used for idle tracking.
    pub fn observe_at(&self, scope: ChannelId, fingerprint: &str, capacity: usize, now_ms: u64) -> u32 {
        let capacity = capacity.max(1);
        let window = self.scope(scope);
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = window.check(scope) {
            logging::log_store_corruption(&err);
            window.entries.clear();
        }
        window.last_seen = window.last_seen.max(now_ms);
        window.push(fingerprint, capacity)
    }

    fn scope(&self, scope: ChannelId) -> Arc<Mutex<Window>> {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        scopes.entry(scope).or_default().clone()
    }

    /// Number of entries currently held for `scope`.
    pub fn window_len(&self, scope: ChannelId) -> usize {
        let scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        scopes
            .get(&scope)
            .map(|w| w.lock().unwrap_or_else(PoisonError::into_inner).entries.len())
            .unwrap_or(0)
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops the window of a scope that no longer exists.
    pub fn forget_scope(&self, scope: ChannelId) -> bool {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope)
            .is_some()
    }

    /// Removes windows not observed within `idle_ms` of `now_ms`. Returns the
    /// number of scopes reclaimed.
    pub fn sweep(&self, now_ms: u64, idle_ms: u64) -> usize {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        let before = scopes.len();
        scopes.retain(|_, w| {
            let w = w.lock().unwrap_or_else(PoisonError::into_inner);
            now_ms.saturating_sub(w.last_seen) < idle_ms
        });
        before - scopes.len()
    }

    #[cfg(test)]
    fn corrupt(&self, scope: ChannelId, extra: &[&str]) {
        let window = self.scope(scope);
        let mut window = window.lock().unwrap();
        for e in extra {
            window.entries.push_back((*e).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_fingerprints_count_up() {
        let store = WindowStore::new();
        for n in 1..=10 {
            assert_eq!(store.observe_at(1, "spam", 10, 0), n);
        }
    }

    #[test]
    fn capacity_three_evicts_oldest() {
        let store = WindowStore::new();
        assert_eq!(store.observe_at(1, "a", 3, 0), 1);
        assert_eq!(store.observe_at(1, "a", 3, 0), 2);
        assert_eq!(store.observe_at(1, "a", 3, 0), 3);
        assert_eq!(store.observe_at(1, "b", 3, 0), 1);
        assert_eq!(store.window_len(1), 3);
        // Only two `a` remain after the eviction.
        assert_eq!(store.observe_at(1, "a", 3, 0), 2);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let store = WindowStore::new();
        for i in 0..200u32 {
            let fp = format!("m{}", i % 7);
            store.observe_at(9, &fp, 5, 0);
            assert!(store.window_len(9) <= 5);
        }
        assert_eq!(store.window_len(9), 5);
    }

    #[test]
    fn scopes_are_isolated() {
        let store = WindowStore::new();
        assert_eq!(store.observe_at(1, "x", 5, 0), 1);
        assert_eq!(store.observe_at(2, "x", 5, 0), 1);
        assert_eq!(store.observe_at(1, "x", 5, 0), 2);
    }

    #[test]
    fn shrinking_capacity_truncates() {
        let store = WindowStore::new();
        for _ in 0..6 {
            store.observe_at(1, "x", 10, 0);
        }
        assert_eq!(store.observe_at(1, "x", 3, 0), 3);
        assert_eq!(store.window_len(1), 3);
    }

    #[test]
    fn capacity_zero_behaves_as_one() {
        let store = WindowStore::new();
        assert_eq!(store.observe_at(1, "x", 0, 0), 1);
        assert_eq!(store.observe_at(1, "x", 0, 0), 1);
        assert_eq!(store.window_len(1), 1);
    }

    #[test]
    fn corrupted_window_is_reset() {
        let store = WindowStore::new();
        store.observe_at(1, "x", 2, 0);
        store.corrupt(1, &["x", "x", "x"]);
        assert_eq!(store.observe_at(1, "x", 2, 0), 1);
        assert_eq!(store.window_len(1), 1);
    }

    #[test]
    fn sweep_reclaims_idle_scopes() {
        let store = WindowStore::new();
        store.observe_at(1, "x", 5, 1_000);
        store.observe_at(2, "x", 5, 50_000);
        assert_eq!(store.sweep(60_000, 30_000), 1);
        assert_eq!(store.scope_count(), 1);
        assert_eq!(store.window_len(2), 1);
        assert!(store.forget_scope(2));
        assert!(!store.forget_scope(2));
    }

    #[test]
    fn concurrent_observers_keep_the_bound() {
        let store = Arc::new(WindowStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.observe_at(1, "same", 20, 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.window_len(1), 20);
        assert_eq!(store.observe_at(1, "same", 20, 0), 20);
    }
}
