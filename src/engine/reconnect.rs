// ── Bridge Engine: Reconnection Backoff ────────────────────────────────────
// Exponential backoff with additive jitter for wire session retries.
//
//   delay(n) = min(initial · 2ⁿ, cap) + U(30%, 50%) of that
//
// Attempts increment every time we enter CONNECTING and reset on OPEN. After
// `give_up_after` consecutive failures the schedule reports given-up so the
// supervisor can surface a GIVE_UP status, but delays keep coming at the
// capped value — the session never stops trying on its own.

use std::time::Duration;

use crate::atoms::constants::*;
use crate::engine::clock::Randomness;

#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub cap_ms: u64,
    pub give_up_after: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_ms: RECONNECT_INITIAL_MS,
            cap_ms: RECONNECT_CAP_MS,
            give_up_after: RECONNECT_GIVE_UP_AFTER,
        }
    }
}

pub struct ReconnectSchedule {
    config: ReconnectConfig,
    rng: Randomness,
    attempts: u32,
}

impl ReconnectSchedule {
    pub fn new(config: ReconnectConfig, rng: Randomness) -> Self {
        ReconnectSchedule { config, rng, attempts: 0 }
    }

    /// Delay before the next connection attempt. Increments the attempt
    /// counter.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        let jitter_frac = self.rng.range_f64(RECONNECT_JITTER_LO, RECONNECT_JITTER_HI);
        let jitter = (nominal as f64 * jitter_frac) as u64;
        Duration::from_millis(nominal + jitter)
    }

    /// The session opened — start the next outage from scratch.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn gave_up(&self) -> bool {
        self.attempts >= self.config.give_up_after
    }

    fn nominal_for(&self, attempts: u32) -> u64 {
        // Shift saturates well before u64 overflow for any plausible count.
        let exp = attempts.min(32);
        self.config.initial_ms.saturating_mul(1u64 << exp).min(self.config.cap_ms)
    }
}
