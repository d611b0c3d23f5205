// ── Bridge Engine: Clock & Randomness ──────────────────────────────────────
// Every timing decision in the system flows through these two handles so
// tests can inject determinism.
//
//   Clock      — single millisecond timeline (intervals AND window
//                boundaries), local wall-clock hour, cancellable sleep.
//   Randomness — seedable RNG behind a lock; jitter, ranges, catalog picks.
//
// SystemClock/entropy in production; ManualClock/seeded in tests. A
// ManualClock sleep advances virtual time instantly, which is what lets the
// fully shaped send pipeline run in microseconds under test.

use async_trait::async_trait;
use chrono::Timelike;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ── Clock trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch. One timeline for everything:
    /// persisted timestamps, sliding windows, and interval math.
    fn now_ms(&self) -> u64;

    /// Local wall-clock hour [0, 24), for the presence cycler's active
    /// window.
    fn local_hour(&self) -> u32;

    /// Sleep for `dur`. Virtual clocks return immediately after advancing.
    async fn sleep(&self, dur: Duration);
}

// ── System clock ───────────────────────────────────────────────────────────

pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn local_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }

    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

// ── Manual clock (tests) ───────────────────────────────────────────────────

/// Virtual clock whose sleeps complete instantly by advancing `now`.
/// The hour is derived from virtual time, so tests can cross the active-hours
/// boundary by advancing past it.
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(ManualClock { now_ms: AtomicU64::new(start_ms) })
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn local_hour(&self) -> u32 {
        ((self.now_ms.load(Ordering::SeqCst) / 3_600_000) % 24) as u32
    }

    async fn sleep(&self, dur: Duration) {
        self.advance(dur.as_millis() as u64);
        // Let other tasks observe the new time before we continue.
        tokio::task::yield_now().await;
    }
}

// ── Randomness ─────────────────────────────────────────────────────────────

/// Shared RNG handle. Cheap to clone; all clones draw from one stream so a
/// seeded test sees one reproducible sequence.
#[derive(Clone)]
pub struct Randomness {
    rng: Arc<Mutex<StdRng>>,
}

impl Randomness {
    pub fn from_entropy() -> Self {
        Randomness { rng: Arc::new(Mutex::new(StdRng::from_entropy())) }
    }

    pub fn seeded(seed: u64) -> Self {
        Randomness { rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))) }
    }

    /// Uniform integer in [lo, hi]. `lo == hi` short-circuits.
    pub fn range_u64(&self, lo: u64, hi: u64) -> u64 {
        if lo >= hi {
            return lo;
        }
        self.rng.lock().gen_range(lo..=hi)
    }

    /// Uniform float in [lo, hi).
    pub fn range_f64(&self, lo: f64, hi: f64) -> f64 {
        if lo >= hi {
            return lo;
        }
        self.rng.lock().gen_range(lo..hi)
    }

    /// Pick a uniformly random element. Panics on an empty slice — every
    /// catalog in this crate is a non-empty constant.
    pub fn pick<'a, T>(&self, items: &'a [T]) -> &'a T {
        let idx = self.rng.lock().gen_range(0..items.len());
        &items[idx]
    }

    /// `base` ± `frac` (e.g. frac 0.5 ⇒ uniform in [base/2, 3·base/2]).
    pub fn jitter(&self, base: u64, frac: f64) -> u64 {
        let spread = (base as f64 * frac).round() as i64;
        if spread <= 0 {
            return base;
        }
        let offset = self.rng.lock().gen_range(-spread..=spread);
        (base as i64 + offset).max(0) as u64
    }
}
