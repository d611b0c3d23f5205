// ── Bridge Engine: Activity Tracker ────────────────────────────────────────
// Symmetric counters of sent/received traffic plus response-time sampling.
// The response ratio (received ÷ sent over the last 24h) is the signal a
// behavioral classifier watches first: humans get replies, spammers don't.
//
// Response-time sampling: we remember the last outbound timestamp per jid;
// an inbound message from that jid within 30 minutes yields one sample into
// a bounded ring. Totals and windows persist to activity.json; the per-jid
// map is in-memory only.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::atoms::constants::*;
use crate::atoms::types::Jid;
use crate::engine::clock::Clock;
use crate::engine::persist::StateDir;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActivityFile {
    sent_total: u64,
    received_total: u64,
    /// Epoch-ms stamps inside the 24h window, ascending.
    sent_window: Vec<u64>,
    received_window: Vec<u64>,
    response_samples_ms: Vec<u64>,
}

struct Inner {
    sent_total: u64,
    received_total: u64,
    sent_window: Vec<u64>,
    received_window: Vec<u64>,
    response_samples_ms: VecDeque<u64>,
    last_outbound: HashMap<String, u64>,
}

pub struct ActivityTracker {
    clock: Arc<dyn Clock>,
    store: Arc<StateDir>,
    inner: Mutex<Inner>,
}

impl ActivityTracker {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<StateDir>) -> Self {
        let file: ActivityFile = store.load(FILE_ACTIVITY).unwrap_or_default();
        let now = clock.now_ms();
        let mut inner = Inner {
            sent_total: file.sent_total,
            received_total: file.received_total,
            sent_window: file.sent_window,
            received_window: file.received_window,
            response_samples_ms: file.response_samples_ms.into_iter().collect(),
            last_outbound: HashMap::new(),
        };
        Self::prune(&mut inner, now);
        ActivityTracker { clock, store, inner: Mutex::new(inner) }
    }

    pub fn record_sent(&self, jid: &Jid) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        inner.sent_total += 1;
        inner.sent_window.push(now);
        inner.last_outbound.insert(jid.as_str().to_string(), now);
        Self::prune(&mut inner, now);
    }

    pub fn record_received(&self, jid: &Jid) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        inner.received_total += 1;
        inner.received_window.push(now);

        if let Some(sent_at) = inner.last_outbound.remove(jid.as_str()) {
            let elapsed = now.saturating_sub(sent_at);
            if elapsed <= RESPONSE_SAMPLE_WINDOW_MS {
                if inner.response_samples_ms.len() >= RESPONSE_SAMPLE_RING {
                    inner.response_samples_ms.pop_front();
                }
                inner.response_samples_ms.push_back(elapsed);
            }
        }
        Self::prune(&mut inner, now);
    }

    /// received ÷ sent over the 24h window; 1.0 when nothing was sent.
    pub fn response_ratio(&self) -> f64 {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, now);
        if inner.sent_window.is_empty() {
            return 1.0;
        }
        inner.received_window.len() as f64 / inner.sent_window.len() as f64
    }

    pub fn mean_response_ms(&self) -> Option<u64> {
        let inner = self.inner.lock();
        if inner.response_samples_ms.is_empty() {
            return None;
        }
        let sum: u64 = inner.response_samples_ms.iter().sum();
        Some(sum / inner.response_samples_ms.len() as u64)
    }

    pub fn totals(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.sent_total, inner.received_total)
    }

    /// Background flush hook.
    pub fn persist(&self) {
        let snapshot = {
            let inner = self.inner.lock();
            ActivityFile {
                sent_total: inner.sent_total,
                received_total: inner.received_total,
                sent_window: inner.sent_window.clone(),
                received_window: inner.received_window.clone(),
                response_samples_ms: inner.response_samples_ms.iter().copied().collect(),
            }
        };
        self.store.save(FILE_ACTIVITY, &snapshot);
    }

    fn prune(inner: &mut Inner, now: u64) {
        inner.sent_window.retain(|&t| now.saturating_sub(t) < DAY_MS);
        inner.received_window.retain(|&t| now.saturating_sub(t) < DAY_MS);
    }
}
