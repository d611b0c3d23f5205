// ── Bridge Engine: Send Pipeline ───────────────────────────────────────────
// The path every outbound message walks. Admission gates fail fast in a
// fixed order, then the send is shaped to look hand-typed:
//
//   normalize jid → connected? → hibernating? → warmup ceiling? → rate
//   limit? → variator → subscribe → composing → typing pause → hesitation →
//   protocol send → settle → paused → commit counters
//
// Two sends to the same jid serialize on a per-jid lock so their composing/
// paused indicators never interleave; sends to distinct jids run in parallel
// up to a process-wide cap. An INTERVAL-scoped denial under 30s is absorbed
// by one internal wait; every other denial surfaces to the caller.
//
// Cancellation: a deadline (or shutdown) cancels during any pre-send sleep
// with no counters mutated. Once the protocol send has happened the tail of
// the pipeline always runs — the message exists, the counters must agree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use crate::atoms::constants::*;
use crate::atoms::error::{BridgeError, BridgeResult};
use crate::atoms::types::{ConnectionState, Jid, PresenceKind, RateScope, RiskKind, SendReceipt};
use crate::engine::activity::ActivityTracker;
use crate::engine::ban_warning::BanWarningSystem;
use crate::engine::clock::{Clock, Randomness};
use crate::engine::humanize::{human_delay, typing_duration};
use crate::engine::rate_limit::{RateLimiter, RateVerdict};
use crate::engine::receive::DeliveryLedger;
use crate::engine::variator::{MessageVariator, VariatorOutcome};
use crate::engine::warmup::WarmupRegistry;
use crate::engine::wire::WireClient;

pub struct SendPipeline {
    clock: Arc<dyn Clock>,
    rng: Randomness,
    wire: Arc<dyn WireClient>,
    rate: Arc<RateLimiter>,
    warmup: Arc<WarmupRegistry>,
    ban: Arc<BanWarningSystem>,
    variator: Arc<MessageVariator>,
    activity: Arc<ActivityTracker>,
    ledger: Arc<DeliveryLedger>,
    conn: watch::Receiver<ConnectionState>,
    shutdown: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
    jid_locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    message_delay_base_ms: u64,
    typing_floor_ms: u64,
}

impl SendPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        rng: Randomness,
        wire: Arc<dyn WireClient>,
        rate: Arc<RateLimiter>,
        warmup: Arc<WarmupRegistry>,
        ban: Arc<BanWarningSystem>,
        variator: Arc<MessageVariator>,
        activity: Arc<ActivityTracker>,
        ledger: Arc<DeliveryLedger>,
        conn: watch::Receiver<ConnectionState>,
        shutdown: watch::Receiver<bool>,
        send_concurrency: usize,
        message_delay_base_ms: u64,
        typing_floor_ms: u64,
    ) -> Self {
        SendPipeline {
            clock,
            rng,
            wire,
            rate,
            warmup,
            ban,
            variator,
            activity,
            ledger,
            conn,
            shutdown,
            semaphore: Arc::new(Semaphore::new(send_concurrency.max(1))),
            jid_locks: parking_lot::Mutex::new(HashMap::new()),
            message_delay_base_ms,
            typing_floor_ms,
        }
    }

    /// Send a text message. `deadline_ms` is an absolute instant on the
    /// bridge clock; the call is canceled if it is still pre-dispatch at
    /// that point.
    pub async fn send(
        &self,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
        deadline_ms: Option<u64>,
    ) -> BridgeResult<SendReceipt> {
        let jid = Jid::normalize(to)?;

        // Per-jid serialization first, then the global concurrency cap —
        // queued same-jid sends must not hold admission slots.
        let jid_lock = self.lock_for(&jid);
        let _jid_guard = jid_lock.lock_owned().await;
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::Canceled)?;

        // ── Admission gates ────────────────────────────────────────────────
        if *self.conn.borrow() != ConnectionState::Open {
            return Err(BridgeError::NotConnected);
        }
        if !self.ban.admit() {
            debug!("[pipeline] {} rejected: hibernating", jid);
            return Err(BridgeError::Hibernating);
        }
        let verdict = self.warmup.may_message(&jid);
        if !verdict.allow {
            return Err(BridgeError::WarmupLimit {
                jid: jid.to_string(),
                per_day_remaining: verdict.per_day_remaining.unwrap_or(0),
            });
        }
        self.admit_rate(deadline_ms).await?;

        // ── Shaping ────────────────────────────────────────────────────────
        let final_text = match self.variator.vary(&jid, text) {
            VariatorOutcome::Unchanged => text.to_string(),
            VariatorOutcome::Varied(variant) => {
                debug!("[pipeline] varied repeat for {}", jid);
                variant
            }
            VariatorOutcome::Exhausted => {
                warn!("[pipeline] variation exhausted for {} — sending original", jid);
                self.ban.record(RiskKind::SuspiciousLatency);
                text.to_string()
            }
        };

        if let Err(e) = self.wire.presence_subscribe(&jid).await {
            warn!("[pipeline] presence subscribe failed for {}: {}", jid, e);
        }
        self.pause(human_delay(&self.rng, self.message_delay_base_ms, 0.5), deadline_ms).await?;
        let _ = self.wire.presence_update(PresenceKind::Composing, Some(&jid)).await;

        self.pause(
            typing_duration(&self.rng, &final_text, self.typing_floor_ms, TYPING_MAX_MS),
            deadline_ms,
        )
        .await?;
        self.pause(human_delay(&self.rng, HESITATION_BASE_MS, 0.5), deadline_ms).await?;

        // ── Protocol dispatch ──────────────────────────────────────────────
        let message_id = match self.wire.send_message(&jid, &final_text, reply_to).await {
            Ok(id) => id,
            Err(e) => {
                let _ = self.wire.presence_update(PresenceKind::Paused, Some(&jid)).await;
                self.ban.record(RiskKind::DeliveryFailure);
                let (message, retryable) = match e {
                    BridgeError::Protocol { message, retryable } => (message, retryable),
                    other => (other.to_string(), false),
                };
                return Err(BridgeError::Protocol { message, retryable });
            }
        };

        // ── Post-send tail: runs to completion regardless of deadline ──────
        self.clock.sleep(human_delay(&self.rng, SETTLE_BASE_MS, 0.3)).await;
        let _ = self.wire.presence_update(PresenceKind::Paused, Some(&jid)).await;

        self.rate.commit();
        self.warmup.record_send(&jid);
        self.variator.record_sent(&jid, &final_text);
        self.activity.record_sent(&jid);
        self.ledger.track(&message_id);

        info!("[pipeline] sent {} to {}", message_id, jid);
        Ok(SendReceipt { message_id })
    }

    // ── Rate admission with the single internal wait ───────────────────────

    async fn admit_rate(&self, deadline_ms: Option<u64>) -> BridgeResult<()> {
        match self.rate.check_and_reserve() {
            RateVerdict::Allow => Ok(()),
            RateVerdict::Deny { scope: RateScope::Interval, wait_ms }
                if wait_ms < INTERNAL_WAIT_CEILING_MS =>
            {
                debug!("[pipeline] absorbing {}ms interval wait", wait_ms);
                self.pause(Duration::from_millis(wait_ms), deadline_ms).await?;
                match self.rate.check_and_reserve() {
                    RateVerdict::Allow => Ok(()),
                    RateVerdict::Deny { scope, wait_ms } => {
                        self.ban.record(RiskKind::RateLimitHit);
                        Err(BridgeError::RateLimited { scope, wait_ms })
                    }
                }
            }
            RateVerdict::Deny { scope, wait_ms } => {
                self.ban.record(RiskKind::RateLimitHit);
                Err(BridgeError::RateLimited { scope, wait_ms })
            }
        }
    }

    // ── Cancellable sleep ──────────────────────────────────────────────────

    async fn pause(&self, dur: Duration, deadline_ms: Option<u64>) -> BridgeResult<()> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(BridgeError::Canceled);
        }
        let now = self.clock.now_ms();
        let effective = match deadline_ms {
            Some(deadline) => {
                if now >= deadline {
                    return Err(BridgeError::Canceled);
                }
                dur.min(Duration::from_millis(deadline - now))
            }
            None => dur,
        };
        tokio::select! {
            _ = self.clock.sleep(effective) => {
                if effective < dur {
                    Err(BridgeError::Canceled)
                } else {
                    Ok(())
                }
            }
            _ = shutdown.changed() => Err(BridgeError::Canceled),
        }
    }

    fn lock_for(&self, jid: &Jid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.jid_locks.lock();
        locks.entry(jid.as_str().to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::persist::StateDir;
    use crate::engine::wire::{SimulatedWire, WireCall};

    struct Rig {
        clock: Arc<ManualClock>,
        wire: Arc<SimulatedWire>,
        ban: Arc<BanWarningSystem>,
        rate: Arc<RateLimiter>,
        pipeline: SendPipeline,
        conn_tx: watch::Sender<ConnectionState>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn rig(weeks: u32) -> Rig {
        let clock = ManualClock::new(1_000_000);
        let rng = Randomness::seeded(21);
        let wire = Arc::new(SimulatedWire::new());
        let store = Arc::new(StateDir::ephemeral());
        let rate = Arc::new(RateLimiter::new(clock.clone(), rng.clone(), store.clone(), weeks));
        let warmup = Arc::new(WarmupRegistry::new(clock.clone(), store.clone()));
        let ban = Arc::new(BanWarningSystem::new(clock.clone(), store.clone()));
        let variator = Arc::new(MessageVariator::new(rng.clone()));
        let activity = Arc::new(ActivityTracker::new(clock.clone(), store));
        let ledger = DeliveryLedger::new(clock.clone());
        let (conn_tx, conn_rx) = watch::channel(ConnectionState::Open);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = SendPipeline::new(
            clock.clone(),
            rng,
            wire.clone(),
            rate.clone(),
            warmup,
            ban.clone(),
            variator,
            activity,
            ledger,
            conn_rx,
            shutdown_rx,
            DEFAULT_SEND_CONCURRENCY,
            DEFAULT_MESSAGE_DELAY_BASE_MS,
            TYPING_MIN_MS,
        );
        Rig { clock, wire, ban, rate, pipeline, conn_tx, shutdown_tx }
    }

    const TO: &str = "15550102233";

    #[tokio::test]
    async fn test_successful_send_presence_sequence() {
        let rig = rig(10);
        let receipt = rig.pipeline.send(TO, "hello from the bridge", None, None).await.unwrap();
        assert!(receipt.message_id.starts_with("sim-"));

        let calls = rig.wire.calls();
        let jid = Jid::normalize(TO).unwrap();
        let scoped: Vec<&WireCall> = calls
            .iter()
            .filter(|c| matches!(c, WireCall::PresenceUpdate { jid: Some(j), .. } if *j == jid))
            .collect();
        // Exactly composing → paused, in that order.
        assert_eq!(scoped.len(), 2);
        assert!(matches!(scoped[0], WireCall::PresenceUpdate { kind: PresenceKind::Composing, .. }));
        assert!(matches!(scoped[1], WireCall::PresenceUpdate { kind: PresenceKind::Paused, .. }));

        // Subscribe precedes composing precedes the send itself.
        let subscribe_at =
            calls.iter().position(|c| matches!(c, WireCall::PresenceSubscribe(_))).unwrap();
        let composing_at = calls
            .iter()
            .position(|c| matches!(c, WireCall::PresenceUpdate { kind: PresenceKind::Composing, .. }))
            .unwrap();
        let send_at = calls.iter().position(|c| matches!(c, WireCall::Send { .. })).unwrap();
        assert!(subscribe_at < composing_at && composing_at < send_at);
    }

    #[tokio::test]
    async fn test_invalid_jid() {
        let rig = rig(10);
        let err = rig.pipeline.send("12345", "hi", None, None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_JID");
        assert!(rig.wire.calls().is_empty());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let rig = rig(10);
        rig.conn_tx.send(ConnectionState::ClosedRetrying).unwrap();
        let err = rig.pipeline.send(TO, "hi", None, None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_hibernation_gate() {
        let rig = rig(10);
        rig.ban.enter_hibernation(HIBERNATION_MIN_MS);
        let err = rig.pipeline.send(TO, "hi", None, None).await.unwrap_err();
        assert_eq!(err.code(), "HIBERNATING");
        assert!(rig.wire.calls().is_empty());
    }

    #[tokio::test]
    async fn test_warmup_limit_on_fourth_send() {
        let rig = rig(10);
        for i in 0..3 {
            rig.pipeline.send(TO, &format!("message {}", i), None, None).await.unwrap();
            rig.clock.advance(35_000);
        }
        let err = rig.pipeline.send(TO, "message 3", None, None).await.unwrap_err();
        match err {
            BridgeError::WarmupLimit { per_day_remaining, .. } => {
                assert_eq!(per_day_remaining, 0);
            }
            other => panic!("expected warmup limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interval_denial_surfaces_on_fresh_tier() {
        let rig = rig(1); // FRESH: 180s interval, far past the 30s absorb cap
        rig.pipeline.send(TO, "first", None, None).await.unwrap();
        let err =
            rig.pipeline.send("15550109999", "second", None, None).await.unwrap_err();
        match err {
            BridgeError::RateLimited { scope, wait_ms } => {
                assert_eq!(scope, RateScope::Interval);
                assert!(wait_ms > INTERNAL_WAIT_CEILING_MS);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        // The surfaced denial fed risk scoring.
        assert!(rig.ban.status().score >= RiskKind::RateLimitHit.weight() - 0.01);
    }

    #[tokio::test]
    async fn test_interval_denial_absorbed_on_mature_tier() {
        let rig = rig(10); // MATURE: 30s interval
        rig.pipeline.send(TO, "first", None, None).await.unwrap();
        let first_done = rig.clock.now_ms();
        // Ten seconds later the remaining ~20s wait is under the absorb
        // ceiling, so the second send waits it out internally.
        rig.clock.advance(10_000);
        rig.pipeline.send("15550109999", "second", None, None).await.unwrap();
        assert_eq!(rig.rate.status().hourly_used, 2);
        assert!(rig.clock.now_ms() - first_done >= 30_000);
    }

    #[tokio::test]
    async fn test_protocol_failure_records_and_skips_commit() {
        let rig = rig(10);
        rig.wire.fail_sends(true);
        let err = rig.pipeline.send(TO, "hi there", None, None).await.unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_ERROR");

        // Failure downgraded presence and recorded a delivery failure…
        let jid = Jid::normalize(TO).unwrap();
        assert!(rig.wire.calls().iter().any(|c| matches!(
            c,
            WireCall::PresenceUpdate { kind: PresenceKind::Paused, jid: Some(j) } if *j == jid
        )));
        assert!(rig.ban.status().score >= RiskKind::DeliveryFailure.weight() - 0.01);
        // …and no budget was consumed.
        assert_eq!(rig.rate.status().hourly_used, 0);
    }

    #[tokio::test]
    async fn test_deadline_cancels_before_dispatch() {
        let rig = rig(10);
        let deadline = rig.clock.now_ms() + 1;
        let err = rig.pipeline.send(TO, "hi", None, Some(deadline)).await.unwrap_err();
        assert_eq!(err.code(), "CANCELED");
        assert!(!rig.wire.calls().iter().any(|c| matches!(c, WireCall::Send { .. })));
        assert_eq!(rig.rate.status().hourly_used, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_send() {
        let rig = rig(10);
        rig.shutdown_tx.send(true).unwrap();
        let err = rig.pipeline.send(TO, "hi", None, None).await.unwrap_err();
        assert_eq!(err.code(), "CANCELED");
    }

    #[tokio::test]
    async fn test_repeat_text_goes_out_varied() {
        let rig = rig(10);
        rig.pipeline.send(TO, "Hello", None, None).await.unwrap();
        rig.clock.advance(35_000);
        rig.pipeline.send(TO, "Hello", None, None).await.unwrap();

        let sends: Vec<String> = rig
            .wire
            .calls()
            .iter()
            .filter_map(|c| match c {
                WireCall::Send { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0], "Hello");
        assert_ne!(sends[1], "Hello");
    }

    #[tokio::test]
    async fn test_parallel_sends_to_distinct_jids() {
        let rig = rig(10);
        let pipeline = Arc::new(rig.pipeline);
        let a = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.send("15550100001", "to a", None, None).await })
        };
        let b = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.send("15550100002", "to b", None, None).await })
        };
        // Both pass admission before either commits, then shape in
        // parallel; neither blocks the other.
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(rig.rate.status().hourly_used, 2);
    }
}
