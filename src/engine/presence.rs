// ── Bridge Engine: Presence Cycler ─────────────────────────────────────────
// Background task that toggles the global online/offline beacon in a human
// cadence while the session is OPEN and not hibernating:
//
//   inside active hours  — ONLINE for 5–45 min, OFFLINE for 2–15 min, repeat
//   outside active hours — stay OFFLINE; only the jid-scoped composing/
//                          paused around an actual send still goes out
//
// The cycler never gates sending; it only controls the beacon. An operator
// override pins the beacon in either direction until cleared; while pinned
// the natural phase boundary keeps its deadline, so clearing the override
// holds the pinned state until that boundary and only then resumes toggling.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::atoms::constants::*;
use crate::atoms::types::{ConnectionState, PresenceKind};
use crate::engine::clock::{Clock, Randomness};
use crate::engine::config::BridgeConfig;
use crate::engine::wire::WireClient;

/// Poll cadence while there is nothing to cycle (closed, hibernating,
/// pinned, or night hours).
const IDLE_POLL: Duration = Duration::from_secs(60);

pub struct PresenceCycler {
    clock: Arc<dyn Clock>,
    rng: Randomness,
    wire: Arc<dyn WireClient>,
    config: BridgeConfig,
    conn: watch::Receiver<ConnectionState>,
    hibernating: Arc<dyn Fn() -> bool + Send + Sync>,
    override_state: Mutex<Option<bool>>,
    /// When the current natural phase ends (epoch ms). None when no phase is
    /// in flight (closed, hibernating, or outside active hours).
    next_phase_at: Mutex<Option<u64>>,
    online_now: AtomicBool,
}

impl PresenceCycler {
    pub fn new(
        clock: Arc<dyn Clock>,
        rng: Randomness,
        wire: Arc<dyn WireClient>,
        config: BridgeConfig,
        conn: watch::Receiver<ConnectionState>,
        hibernating: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(PresenceCycler {
            clock,
            rng,
            wire,
            config,
            conn,
            hibernating,
            override_state: Mutex::new(None),
            next_phase_at: Mutex::new(None),
            online_now: AtomicBool::new(false),
        })
    }

    /// Operator override: pin the beacon online or offline. The in-flight
    /// phase keeps its deadline for when the override is cleared.
    pub async fn set_override(&self, online: bool) {
        *self.override_state.lock() = Some(online);
        self.set_beacon(online).await;
    }

    /// Release the override. The pinned state holds until the interrupted
    /// phase's boundary, then natural cycling resumes.
    pub fn clear_override(&self) {
        *self.override_state.lock() = None;
    }

    pub fn is_online(&self) -> bool {
        self.online_now.load(Ordering::Relaxed)
    }

    /// Main loop. Runs until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = self.step().await;
            tokio::select! {
                _ = self.clock.sleep(pause) => {}
                _ = shutdown.changed() => {}
            }
        }
        self.set_beacon(false).await;
        debug!("[presence] cycler stopped");
    }

    /// One scheduling decision: adjust the beacon if due and return how long
    /// to wait before the next look.
    async fn step(&self) -> Duration {
        let open = *self.conn.borrow() == ConnectionState::Open;
        let overridden = *self.override_state.lock();

        if !open || (self.hibernating)() {
            // Nothing to beacon; make sure we are dark and re-check soon.
            // A closed session voids the in-flight phase.
            if overridden.is_none() {
                self.set_beacon(false).await;
            }
            *self.next_phase_at.lock() = None;
            return IDLE_POLL;
        }

        if overridden.is_some() {
            // Pinned by the operator; hold position. The phase deadline is
            // left untouched so a later clear resumes on the old cadence.
            return IDLE_POLL;
        }

        if !self.config.in_active_hours(self.clock.local_hour()) {
            self.set_beacon(false).await;
            *self.next_phase_at.lock() = None;
            return IDLE_POLL;
        }

        let now = self.clock.now_ms();
        if let Some(at) = *self.next_phase_at.lock() {
            if now < at {
                // Mid-phase — e.g. an override was just cleared. Hold the
                // current state until the boundary the interrupted phase
                // would have ended at.
                return Duration::from_millis(at - now);
            }
        }

        // Phase boundary: flip and sample the next phase length.
        let phase = if self.is_online() {
            self.set_beacon(false).await;
            Duration::from_secs(self.rng.range_u64(PRESENCE_OFFLINE_MIN_S, PRESENCE_OFFLINE_MAX_S))
        } else {
            self.set_beacon(true).await;
            Duration::from_secs(self.rng.range_u64(PRESENCE_ONLINE_MIN_S, PRESENCE_ONLINE_MAX_S))
        };
        *self.next_phase_at.lock() = Some(now + phase.as_millis() as u64);
        phase
    }

    async fn set_beacon(&self, online: bool) {
        if self.online_now.swap(online, Ordering::Relaxed) == online {
            return;
        }
        let kind = if online { PresenceKind::Available } else { PresenceKind::Unavailable };
        debug!("[presence] beacon → {:?}", kind);
        if let Err(e) = self.wire.presence_update(kind, None).await {
            warn!("[presence] beacon update failed: {}", e);
        }
    }
}
