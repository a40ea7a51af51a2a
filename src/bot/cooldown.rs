//! Per-pair retrade cooldown.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::arbitrage::PairKey;

/// Last attempt time per pair. A pair may be attempted again only once
/// `window` has elapsed since its previous attempt.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_attempt: DashMap<PairKey, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_attempt: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Claim `key` for an attempt at `now`. Returns false, and records
    /// nothing, while the pair is still cooling down.
    pub fn try_acquire_at(&self, key: &PairKey, now: Instant) -> bool {
        match self.last_attempt.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if now.saturating_duration_since(*slot.get()) < self.window {
                    return false;
                }
                slot.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Time left before `key` may be retried, if any.
    pub fn remaining_at(&self, key: &PairKey, now: Instant) -> Option<Duration> {
        let last = *self.last_attempt.get(key)?;
        self.window
            .checked_sub(now.saturating_duration_since(last))
            .filter(|left| !left.is_zero())
    }

    /// Forget pairs whose window has passed.
    pub fn prune_at(&self, now: Instant) -> usize {
        let before = self.last_attempt.len();
        self.last_attempt
            .retain(|_, last| now.saturating_duration_since(*last) < self.window);
        before - self.last_attempt.len()
    }

    pub fn len(&self) -> usize {
        self.last_attempt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_attempt.is_empty()
    }
}
