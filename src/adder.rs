//! Repeat-offense accumulator.
//!
//! One counter per (user, adder key), shared by every detector that names the
//! same key. A counter lives for a rolling window: each increment pushes the
//! expiry out again, and an expired counter starts over at 1.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::event::UserId;

/// Persistable view of one counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdderEntry {
    pub user: UserId,
    pub key: String,
    pub count: u32,
    /// Epoch milliseconds.
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Counted(u32),
    /// Threshold reached. The caller must [`Adder::settle`] the key.
    Overflow(u32),
}

impl Tick {
    pub fn count(&self) -> u32 {
        match self {
            Tick::Counted(n) | Tick::Overflow(n) => *n,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    count: u32,
    expires_at: u64,
    /// An overflow was handed out and not settled yet.
    in_flight: bool,
}

impl Slot {
    fn live(&self, now_ms: u64) -> bool {
        now_ms <= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct Adder {
    slots: Mutex<HashMap<(UserId, String), Slot>>,
}

impl Adder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one offense for `(user, key)` and reports whether `threshold` was
    /// reached. While an overflow is unsettled, further increments count but
    /// never overflow a second time.
    pub fn increment(&self, user: UserId, key: &str, now_ms: u64, window_ms: u64, threshold: u32) -> Tick {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry((user, key.to_string())).or_insert(Slot {
            count: 0,
            expires_at: 0,
            in_flight: false,
        });
        if slot.count == 0 || !slot.live(now_ms) {
            slot.count = 0;
            slot.in_flight = false;
        }
        slot.count += 1;
        slot.expires_at = now_ms.saturating_add(window_ms);
        if threshold > 0 && slot.count >= threshold && !slot.in_flight {
            slot.in_flight = true;
            Tick::Overflow(slot.count)
        } else {
            Tick::Counted(slot.count)
        }
    }

    /// Closes an overflow. A fired punishment clears the counter; a failed one
    /// leaves it so the next offense overflows again.
    pub fn settle(&self, user: UserId, key: &str, fired: bool) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let id = (user, key.to_string());
        if fired {
            slots.remove(&id);
        } else if let Some(slot) = slots.get_mut(&id) {
            slot.in_flight = false;
        }
    }

    pub fn reset(&self, user: UserId, key: &str) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(user, key.to_string()));
    }

    /// Current count, 0 when absent or expired.
    pub fn count(&self, user: UserId, key: &str, now_ms: u64) -> u32 {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user, key.to_string()))
            .filter(|s| s.live(now_ms))
            .map(|s| s.count)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired counters, unsettled overflows included. A late settle on
    /// a swept key is a no-op.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, s| s.live(now_ms));
        before - slots.len()
    }

    pub fn snapshot(&self) -> Vec<AdderEntry> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<AdderEntry> = slots
            .iter()
            .filter(|(_, s)| s.count > 0)
            .map(|((user, key), s)| AdderEntry {
                user: *user,
                key: key.clone(),
                count: s.count,
                expires_at: s.expires_at,
            })
            .collect();
        out.sort_by(|a, b| (a.user, &a.key).cmp(&(b.user, &b.key)));
        out
    }

    /// Loads persisted counters, skipping expired ones. Live counters already
    /// in memory win over restored ones.
    pub fn restore(&self, entries: Vec<AdderEntry>, now_ms: u64) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut restored = 0;
        for e in entries {
            if e.count == 0 || now_ms > e.expires_at {
                continue;
            }
            slots.entry((e.user, e.key)).or_insert_with(|| {
                restored += 1;
                Slot { count: e.count, expires_at: e.expires_at, in_flight: false }
            });
        }
        restored
    }
}
