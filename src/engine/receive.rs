// ── Bridge Engine: Receive Path ────────────────────────────────────────────
// Inbound flow: wait a human read delay, mark the message read, hand the
// event to the upstream webhook collaborator, and feed the activity tracker.
// The receive path is never gated — hibernation only closes the send side.
//
// The delivery ledger rides along here: every outbound message id is
// tracked until a DELIVERED/READ receipt arrives. Ids still unresolved
// after 10 minutes become SUSPICIOUS_LATENCY risk events (silent
// non-delivery is how shadow bans look from the inside).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::atoms::constants::*;
use crate::atoms::types::{DeliveryStatus, InboundMessage, RiskKind};
use crate::engine::activity::ActivityTracker;
use crate::engine::ban_warning::BanWarningSystem;
use crate::engine::clock::{Clock, Randomness};
use crate::engine::humanize::read_delay;
use crate::engine::wire::WireClient;

// ── Delivery ledger ────────────────────────────────────────────────────────

pub struct DeliveryLedger {
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<String, u64>>,
}

impl DeliveryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(DeliveryLedger { clock, pending: Mutex::new(HashMap::new()) })
    }

    /// Start watching an outbound message id.
    pub fn track(&self, message_id: &str) {
        self.pending.lock().insert(message_id.to_string(), self.clock.now_ms());
    }

    /// A receipt arrived; the candidate is cleared.
    pub fn resolve(&self, message_id: &str) -> bool {
        self.pending.lock().remove(message_id).is_some()
    }

    /// Convert overdue entries into risk events. Called by the background
    /// sweeper.
    pub fn sweep(&self, ban: &BanWarningSystem) {
        let now = self.clock.now_ms();
        let overdue: Vec<String> = {
            let mut pending = self.pending.lock();
            let expired: Vec<String> = pending
                .iter()
                .filter(|(_, &sent_at)| now.saturating_sub(sent_at) >= DELIVERY_TIMEOUT_MS)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                pending.remove(id);
            }
            expired
        };
        for id in overdue {
            warn!("[receive] no receipt for {} within {}min", id, DELIVERY_TIMEOUT_MS / 60_000);
            ban.record(RiskKind::SuspiciousLatency);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ── Receive path ───────────────────────────────────────────────────────────

pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

pub struct ReceivePath {
    clock: Arc<dyn Clock>,
    rng: Randomness,
    wire: Arc<dyn WireClient>,
    activity: Arc<ActivityTracker>,
    ban: Arc<BanWarningSystem>,
    ledger: Arc<DeliveryLedger>,
    callback: Mutex<Option<MessageCallback>>,
}

impl ReceivePath {
    pub fn new(
        clock: Arc<dyn Clock>,
        rng: Randomness,
        wire: Arc<dyn WireClient>,
        activity: Arc<ActivityTracker>,
        ban: Arc<BanWarningSystem>,
        ledger: Arc<DeliveryLedger>,
    ) -> Arc<Self> {
        Arc::new(ReceivePath {
            clock,
            rng,
            wire,
            activity,
            ban,
            ledger,
            callback: Mutex::new(None),
        })
    }

    /// Register the upstream webhook collaborator. One callback; the
    /// collaborator owns its own fan-out and retries.
    pub fn set_callback(&self, callback: MessageCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Handle one inbound message event end to end.
    pub async fn handle_inbound(&self, message: InboundMessage) {
        let pause = read_delay(&self.rng, &message.text);
        self.clock.sleep(pause).await;

        if let Err(e) = self.wire.read_messages(&[message.message_id.clone()]).await {
            warn!("[receive] mark-read failed for {}: {}", message.message_id, e);
        }

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(message.clone());
        }
        self.activity.record_received(&message.from);
        debug!("[receive] inbound {} from {}", message.message_id, message.from);
    }

    /// Handle a delivery-status update for a previously sent message.
    pub fn handle_receipt(&self, message_id: &str, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Delivered | DeliveryStatus::Read => {
                if self.ledger.resolve(message_id) {
                    debug!("[receive] {} receipt for {}", match status {
                        DeliveryStatus::Read => "read",
                        _ => "delivery",
                    }, message_id);
                }
            }
            DeliveryStatus::Failed => {
                self.ledger.resolve(message_id);
                self.ban.record(RiskKind::DeliveryFailure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Jid;
    use crate::engine::clock::ManualClock;
    use crate::engine::persist::StateDir;
    use crate::engine::wire::{SimulatedWire, WireCall};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<ManualClock>, Arc<SimulatedWire>, Arc<ReceivePath>, Arc<DeliveryLedger>, Arc<BanWarningSystem>)
    {
        let clock = ManualClock::new(1_000_000);
        let wire = Arc::new(SimulatedWire::new());
        let store = Arc::new(StateDir::ephemeral());
        let activity = Arc::new(ActivityTracker::new(clock.clone(), store.clone()));
        let ban = Arc::new(BanWarningSystem::new(clock.clone(), store));
        let ledger = DeliveryLedger::new(clock.clone());
        let receive = ReceivePath::new(
            clock.clone(),
            Randomness::seeded(6),
            wire.clone(),
            activity,
            ban.clone(),
            ledger.clone(),
        );
        (clock, wire, receive, ledger, ban)
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            from: Jid::normalize("15550102233").unwrap(),
            text: text.to_string(),
            message_id: "in-1".to_string(),
            is_group: false,
            group_id: None,
            quoted_message: None,
        }
    }

    #[tokio::test]
    async fn test_inbound_marks_read_and_invokes_callback() {
        let (clock, wire, receive, _, _) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_callback = hits.clone();
        receive.set_callback(Arc::new(move |msg| {
            assert_eq!(msg.text, "hello there");
            hits_in_callback.fetch_add(1, Ordering::SeqCst);
        }));

        let before = clock.now_ms();
        receive.handle_inbound(inbound("hello there")).await;

        // The read delay actually elapsed on the virtual clock.
        assert!(clock.now_ms() > before);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(wire
            .calls()
            .iter()
            .any(|c| matches!(c, WireCall::ReadMessages(ids) if ids == &vec!["in-1".to_string()])));
    }

    #[tokio::test]
    async fn test_receipt_resolves_pending() {
        let (_, _, receive, ledger, _) = setup();
        ledger.track("msg-7");
        assert_eq!(ledger.pending_count(), 1);
        receive.handle_receipt("msg-7", DeliveryStatus::Read);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_flags_overdue_messages() {
        let (clock, _, _, ledger, ban) = setup();
        ledger.track("msg-8");
        clock.advance(DELIVERY_TIMEOUT_MS);
        ledger.sweep(&ban);
        assert_eq!(ledger.pending_count(), 0);
        assert!(ban.status().score >= RiskKind::SuspiciousLatency.weight() - 0.01);
    }

    #[tokio::test]
    async fn test_receipt_before_timeout_prevents_event() {
        let (clock, _, receive, ledger, ban) = setup();
        ledger.track("msg-9");
        clock.advance(DELIVERY_TIMEOUT_MS / 2);
        receive.handle_receipt("msg-9", DeliveryStatus::Delivered);
        clock.advance(DELIVERY_TIMEOUT_MS);
        ledger.sweep(&ban);
        assert_eq!(ban.status().score, 0.0);
    }

    #[tokio::test]
    async fn test_failed_receipt_records_delivery_failure() {
        let (_, _, receive, ledger, ban) = setup();
        ledger.track("msg-10");
        receive.handle_receipt("msg-10", DeliveryStatus::Failed);
        assert!(ban.status().score >= RiskKind::DeliveryFailure.weight() - 0.01);
    }
}
