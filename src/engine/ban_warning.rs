// ── Bridge Engine: Ban Warning System ──────────────────────────────────────
// Event-weighted risk score with a hibernation latch that closes the send
// pipeline. Operational signals (delivery failures, rate-limit hits,
// connection drops, recipient blocks, suspicious latency) arrive as events;
// each carries a weight and decays linearly to zero over 24 hours.
//
//   score = Σ weight · max(0, 1 − age/24h)
//   level: <30 NORMAL, 30–59 ELEVATED, 60–79 HIGH, ≥80 CRITICAL
//
// Two fast paths bypass the decay math: a recipient block, or two delivery
// failures inside five minutes, force the level to at least HIGH.
//
// Entering CRITICAL auto-engages hibernation for a minimum of 30 minutes and
// logs a synthetic HIBERNATION_STARTED event. While hibernating, gate()
// refuses admission; the receive path is unaffected. A manual exit before
// the minimum has elapsed is rejected.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::atoms::constants::*;
use crate::atoms::error::{BridgeError, BridgeResult};
use crate::atoms::types::{BanWarningStatus, RiskKind, RiskLevel};
use crate::engine::clock::Clock;
use crate::engine::persist::StateDir;

// ── Event ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskKind,
    pub weight: f64,
    pub timestamp: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RiskFile {
    events: Vec<RiskEvent>,
}

#[derive(Debug, Clone, Copy)]
struct Hibernation {
    entered_at: u64,
    minimum_ms: u64,
}

// ── System ─────────────────────────────────────────────────────────────────

struct Inner {
    events: Vec<RiskEvent>,
    hibernation: Option<Hibernation>,
}

pub struct BanWarningSystem {
    clock: Arc<dyn Clock>,
    store: Arc<StateDir>,
    inner: Mutex<Inner>,
}

impl BanWarningSystem {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<StateDir>) -> Self {
        let file: RiskFile = store.load(FILE_RISK_EVENTS).unwrap_or_default();
        let now = clock.now_ms();
        let mut events = file.events;
        events.retain(|e| now.saturating_sub(e.timestamp) < RISK_RETENTION_MS);
        BanWarningSystem {
            clock,
            store,
            inner: Mutex::new(Inner { events, hibernation: None }),
        }
    }

    /// Record an adverse event and re-evaluate. Crossing into CRITICAL
    /// auto-engages hibernation.
    pub fn record(&self, kind: RiskKind) {
        let now = self.clock.now_ms();
        let snapshot = {
            let mut inner = self.inner.lock();
            let before = Self::level_of(&inner.events, now);

            inner.events.push(RiskEvent { kind, weight: kind.weight(), timestamp: now });
            inner.events.retain(|e| now.saturating_sub(e.timestamp) < RISK_RETENTION_MS);

            let after = Self::level_of(&inner.events, now);
            if after == RiskLevel::Critical
                && before != RiskLevel::Critical
                && inner.hibernation.is_none()
            {
                warn!("[banwarn] risk level CRITICAL — auto-entering hibernation for {}min",
                    HIBERNATION_MIN_MS / 60_000);
                inner.hibernation = Some(Hibernation { entered_at: now, minimum_ms: HIBERNATION_MIN_MS });
                inner.events.push(RiskEvent {
                    kind: RiskKind::HibernationStarted,
                    weight: RiskKind::HibernationStarted.weight(),
                    timestamp: now,
                });
            } else if after > before {
                info!("[banwarn] risk level {:?} → {:?} after {:?}", before, after, kind);
            }
            RiskFile { events: inner.events.clone() }
        };
        self.store.save(FILE_RISK_EVENTS, &snapshot);
    }

    /// Admission gate for the send pipeline.
    pub fn admit(&self) -> bool {
        self.inner.lock().hibernation.is_none()
    }

    pub fn status(&self) -> BanWarningStatus {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        let score = Self::score_of(&inner.events, now);
        let level = Self::level_of(&inner.events, now);
        let remaining = inner
            .hibernation
            .map(|h| (h.entered_at + h.minimum_ms).saturating_sub(now))
            .unwrap_or(0);
        BanWarningStatus {
            score,
            level,
            hibernating: inner.hibernation.is_some(),
            recommendation: Self::recommendation(level, inner.hibernation.is_some()).to_string(),
            hibernation_remaining_ms: remaining,
        }
    }

    /// Operator command: engage hibernation with an explicit minimum.
    pub fn enter_hibernation(&self, minimum_ms: u64) {
        let now = self.clock.now_ms();
        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.hibernation.is_some() {
                return;
            }
            info!("[banwarn] hibernation engaged by operator ({}min minimum)", minimum_ms / 60_000);
            inner.hibernation = Some(Hibernation { entered_at: now, minimum_ms });
            inner.events.push(RiskEvent {
                kind: RiskKind::HibernationStarted,
                weight: RiskKind::HibernationStarted.weight(),
                timestamp: now,
            });
            RiskFile { events: inner.events.clone() }
        };
        self.store.save(FILE_RISK_EVENTS, &snapshot);
    }

    /// Operator command: release the latch. Rejected while the minimum
    /// duration has not elapsed.
    pub fn exit_hibernation(&self) -> BridgeResult<()> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.hibernation {
            None => Ok(()),
            Some(h) => {
                let elapsed = now.saturating_sub(h.entered_at);
                if elapsed < h.minimum_ms {
                    let remaining_s = (h.minimum_ms - elapsed) / 1000;
                    return Err(BridgeError::Other(format!(
                        "hibernation has {}s of its minimum remaining",
                        remaining_s
                    )));
                }
                info!("[banwarn] hibernation released after {}min", elapsed / 60_000);
                inner.hibernation = None;
                Ok(())
            }
        }
    }

    /// Operator escape hatch: clear all events and release the latch
    /// unconditionally.
    pub fn reset(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            warn!("[banwarn] warning state reset by operator ({} events cleared)", inner.events.len());
            inner.events.clear();
            inner.hibernation = None;
            RiskFile { events: Vec::new() }
        };
        self.store.save(FILE_RISK_EVENTS, &snapshot);
    }

    /// Background flush hook.
    pub fn persist(&self) {
        let snapshot = RiskFile { events: self.inner.lock().events.clone() };
        self.store.save(FILE_RISK_EVENTS, &snapshot);
    }

    // ── Scoring ────────────────────────────────────────────────────────────

    fn score_of(events: &[RiskEvent], now: u64) -> f64 {
        events
            .iter()
            .map(|e| {
                let age = now.saturating_sub(e.timestamp) as f64;
                let decay = (1.0 - age / RISK_RETENTION_MS as f64).max(0.0);
                e.weight * decay
            })
            .sum()
    }

    fn level_of(events: &[RiskEvent], now: u64) -> RiskLevel {
        let mut level = RiskLevel::from_score(Self::score_of(events, now));

        // Fast paths: ignore decay for the patterns WhatsApp reacts to
        // hardest. Either pattern inside the 5-minute window floors the
        // level at HIGH.
        let recent = |e: &&RiskEvent| now.saturating_sub(e.timestamp) < FAST_PATH_WINDOW_MS;
        let blocks = events.iter().filter(recent).filter(|e| e.kind == RiskKind::RecipientBlock).count();
        let failures =
            events.iter().filter(recent).filter(|e| e.kind == RiskKind::DeliveryFailure).count();
        if (blocks >= 1 || failures >= 2) && level < RiskLevel::High {
            level = RiskLevel::High;
        }
        level
    }

    fn recommendation(level: RiskLevel, hibernating: bool) -> &'static str {
        if hibernating {
            return "hibernating — let the account cool down before sending again";
        }
        match level {
            RiskLevel::Normal => "operating normally",
            RiskLevel::Elevated => "slow down: increase delays and avoid new contacts",
            RiskLevel::High => "stop messaging new contacts; reply-only until the score decays",
            RiskLevel::Critical => "halt all sending immediately",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;

    fn make(clock: Arc<ManualClock>) -> BanWarningSystem {
        BanWarningSystem::new(clock, Arc::new(StateDir::ephemeral()))
    }

    #[test]
    fn test_score_accumulates_weights() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock);
        system.record(RiskKind::RateLimitHit);
        system.record(RiskKind::ConnectionDrop);
        let status = system.status();
        assert!((status.score - 18.0).abs() < 0.01);
        assert_eq!(status.level, RiskLevel::Normal);
    }

    #[test]
    fn test_events_decay_linearly() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock.clone());
        system.record(RiskKind::RateLimitHit); // weight 10
        clock.advance(12 * 3_600_000); // half the retention window
        let status = system.status();
        assert!((status.score - 5.0).abs() < 0.01, "score {}", status.score);
    }

    #[test]
    fn test_single_block_fast_paths_to_high() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock);
        system.record(RiskKind::RecipientBlock); // weight 35 → ELEVATED by score
        assert_eq!(system.status().level, RiskLevel::High);
    }

    #[test]
    fn test_two_failures_fast_path_to_high() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock.clone());
        system.record(RiskKind::DeliveryFailure);
        clock.advance(60_000);
        system.record(RiskKind::DeliveryFailure); // 40 by score → ELEVATED
        assert_eq!(system.status().level, RiskLevel::High);
    }

    #[test]
    fn test_fast_path_expires_with_window() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock.clone());
        system.record(RiskKind::RecipientBlock);
        clock.advance(FAST_PATH_WINDOW_MS);
        // Score ~35 → ELEVATED once the fast-path window closes.
        assert_eq!(system.status().level, RiskLevel::Elevated);
    }

    #[test]
    fn test_critical_auto_hibernates() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock.clone());
        for _ in 0..3 {
            system.record(RiskKind::RecipientBlock);
            clock.advance(20_000);
        }
        let status = system.status();
        assert_eq!(status.level, RiskLevel::Critical);
        assert!(status.hibernating);
        assert!(!system.admit());

        // Too early to exit.
        clock.advance(10 * 60_000);
        assert!(system.exit_hibernation().is_err());
        assert!(!system.admit());

        // After the minimum, exit is honored; much later, decay lands HIGH.
        clock.advance(HIBERNATION_MIN_MS);
        system.exit_hibernation().unwrap();
        assert!(system.admit());
        clock.advance(6 * 3_600_000);
        assert_eq!(system.status().level, RiskLevel::High);
    }

    #[test]
    fn test_hibernation_started_event_logged() {
        let clock = ManualClock::new(1_000_000);
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateDir::open(dir.path()).unwrap());
        let system = BanWarningSystem::new(clock.clone(), store.clone());
        for _ in 0..3 {
            system.record(RiskKind::RecipientBlock);
        }
        // The synthetic event is durable even though the latch is not.
        let file: RiskFile = store.load(FILE_RISK_EVENTS).unwrap();
        assert!(file.events.iter().any(|e| e.kind == RiskKind::HibernationStarted));
    }

    #[test]
    fn test_manual_enter_and_exit() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock.clone());
        system.enter_hibernation(5 * 60_000);
        assert!(!system.admit());
        assert!(system.exit_hibernation().is_err());
        clock.advance(5 * 60_000);
        system.exit_hibernation().unwrap();
        assert!(system.admit());
    }

    #[test]
    fn test_reset_clears_everything() {
        let clock = ManualClock::new(1_000_000);
        let system = make(clock);
        for _ in 0..3 {
            system.record(RiskKind::RecipientBlock);
        }
        assert!(!system.admit());
        system.reset();
        assert!(system.admit());
        assert_eq!(system.status().score, 0.0);
        assert_eq!(system.status().level, RiskLevel::Normal);
    }
}
