// ── Bridge Engine: Typing & Read Simulation ────────────────────────────────
// The only place where human-timing policy lives. Pure functions over
// (randomness, text) — the pipeline decides when to sleep, these decide for
// how long.

use std::time::Duration;

use crate::atoms::constants::*;
use crate::engine::clock::Randomness;

/// How long a human would plausibly type `text`.
///
/// Per-character speed is sampled once per call from U(35ms, 65ms) and the
/// product clamped to [min, max]. `min` is configurable (typingDelayBaseMs);
/// callers pass `TYPING_MIN_MS` unless the operator overrode it.
pub fn typing_duration(rng: &Randomness, text: &str, min_ms: u64, max_ms: u64) -> Duration {
    let per_char = rng.range_f64(TYPING_MS_PER_CHAR_LO, TYPING_MS_PER_CHAR_HI);
    let raw = (text.chars().count() as f64 * per_char) as u64;
    Duration::from_millis(raw.clamp(min_ms, max_ms.max(min_ms)))
}

/// Pause before starting to type, as if reading the draft over.
/// ≈ 500 + 2ms·len with ±100% jitter, clamped to [250ms, 4s].
pub fn thinking_pause(rng: &Randomness, text: &str) -> Duration {
    let base = 500 + 2 * text.chars().count() as u64;
    let jittered = rng.jitter(base, 1.0);
    Duration::from_millis(jittered.clamp(THINKING_FLOOR_MS, THINKING_CEIL_MS))
}

/// How long before an inbound message is marked read.
/// ≈ 300ms per word with ±40% jitter, clamped to [500ms, 15s].
pub fn read_delay(rng: &Randomness, text: &str) -> Duration {
    let words = text.split_whitespace().count().max(1) as u64;
    let jittered = rng.jitter(words * READ_MS_PER_WORD, 0.4);
    Duration::from_millis(jittered.clamp(READ_FLOOR_MS, READ_CEIL_MS))
}

/// Uniform integer delay in [base·(1−variance), base·(1+variance)].
pub fn human_delay(rng: &Randomness, base_ms: u64, variance: f64) -> Duration {
    Duration::from_millis(rng.jitter(base_ms, variance))
}
