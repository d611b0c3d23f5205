// ── Bridge Engine: Fingerprint Store ───────────────────────────────────────
// Persistent record of the emulated device triple (OS, browser, version)
// presented to WhatsApp at connection time. The triple is stable between
// rotations; rotation happens in place on a 24–48h schedule sampled at each
// write, picking a different catalog entry every time.
//
// First run with no file on disk writes the legacy triple so existing
// paired sessions keep the identity they were created under.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::atoms::constants::*;
use crate::engine::clock::{Clock, Randomness};
use crate::engine::persist::StateDir;

// ── Record ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub os: String,
    pub product: String,
    pub version: String,
    /// When this triple was selected (epoch ms).
    pub established_at: u64,
    /// Rotation window sampled at write time, U(24h, 48h).
    pub rotation_window_ms: u64,
    pub rotation_count: u32,
}

impl FingerprintRecord {
    pub fn triple(&self) -> (String, String, String) {
        (self.os.clone(), self.product.clone(), self.version.clone())
    }
}

// ── Store ──────────────────────────────────────────────────────────────────

pub struct FingerprintStore {
    clock: Arc<dyn Clock>,
    rng: Randomness,
    store: Arc<StateDir>,
    cached: Mutex<Option<FingerprintRecord>>,
}

impl FingerprintStore {
    pub fn new(clock: Arc<dyn Clock>, rng: Randomness, store: Arc<StateDir>) -> Self {
        FingerprintStore { clock, rng, store, cached: Mutex::new(None) }
    }

    /// Current device identity. Loads from disk on first call (writing the
    /// legacy triple when no record exists), rotates in place when the
    /// record's window has elapsed.
    pub fn get(&self) -> FingerprintRecord {
        let mut cached = self.cached.lock();
        let now = self.clock.now_ms();

        let mut record = match cached.take() {
            Some(r) => r,
            None => match self.store.load::<FingerprintRecord>(FILE_FINGERPRINT) {
                Some(r) => r,
                None => {
                    let r = self.fresh_record(
                        LEGACY_FINGERPRINT.0,
                        LEGACY_FINGERPRINT.1,
                        LEGACY_FINGERPRINT.2,
                        0,
                        now,
                    );
                    info!("[fingerprint] no record on disk — writing legacy identity {}/{}", r.os, r.product);
                    self.store.save(FILE_FINGERPRINT, &r);
                    r
                }
            },
        };

        if now.saturating_sub(record.established_at) >= record.rotation_window_ms {
            record = self.rotate_from(&record, now);
        }

        *cached = Some(record.clone());
        record
    }

    fn rotate_from(&self, current: &FingerprintRecord, now: u64) -> FingerprintRecord {
        // Uniform over the catalog, excluding whatever we present today.
        let candidates: Vec<&(&str, &str, &str)> = FINGERPRINT_CATALOG
            .iter()
            .filter(|(os, product, version)| {
                *os != current.os || *product != current.product || *version != current.version
            })
            .collect();
        let pick = self.rng.pick(&candidates);
        let next = self.fresh_record(pick.0, pick.1, pick.2, current.rotation_count + 1, now);
        info!(
            "[fingerprint] rotated {}/{} {} → {}/{} {} (rotation #{})",
            current.os, current.product, current.version,
            next.os, next.product, next.version, next.rotation_count
        );
        self.store.save(FILE_FINGERPRINT, &next);
        next
    }

    fn fresh_record(&self, os: &str, product: &str, version: &str, count: u32, now: u64) -> FingerprintRecord {
        FingerprintRecord {
            os: os.to_string(),
            product: product.to_string(),
            version: version.to_string(),
            established_at: now,
            rotation_window_ms: self.rng.range_u64(FINGERPRINT_ROTATE_MIN_MS, FINGERPRINT_ROTATE_MAX_MS),
            rotation_count: count,
        }
    }
}
