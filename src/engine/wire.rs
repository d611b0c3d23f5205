// ── Bridge Engine: Wire Client Seam ────────────────────────────────────────
// The protocol library (connect, send text, presence, mark-read, event
// stream) lives behind this trait. The engine never touches sockets or the
// on-disk session blob directly — it drives whatever implementation the
// embedder hands it.
//
// SimulatedWire is the in-repo implementation: a scripted client used by the
// dev binary's dry-run mode and by the integration tests. It records every
// call and lets a test inject connection phases, inbound messages, and
// receipts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::atoms::error::{BridgeError, BridgeResult};
use crate::atoms::types::{
    CloseDisposition, DeliveryStatus, InboundMessage, Jid, PresenceKind, WireIdentity,
};

// ── Events ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum WirePhase {
    Connecting,
    AwaitingPairing { qr: String },
    Open,
    Closed { disposition: CloseDisposition },
}

#[derive(Debug, Clone)]
pub enum WireEvent {
    Connection { phase: WirePhase, identity: Option<WireIdentity> },
    MessageUpsert(InboundMessage),
    Receipt { message_id: String, status: DeliveryStatus },
}

// ── Trait ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait WireClient: Send + Sync {
    /// Begin (re)connecting. Progress arrives on the event stream.
    async fn connect(&self) -> BridgeResult<()>;

    /// Send a text message; returns the protocol's message id.
    async fn send_message(&self, jid: &Jid, text: &str, reply_to: Option<&str>)
        -> BridgeResult<String>;

    async fn presence_subscribe(&self, jid: &Jid) -> BridgeResult<()>;

    /// Global beacon when `jid` is None, jid-scoped composing/paused
    /// otherwise.
    async fn presence_update(&self, kind: PresenceKind, jid: Option<&Jid>) -> BridgeResult<()>;

    async fn read_messages(&self, message_ids: &[String]) -> BridgeResult<()>;

    async fn logout(&self) -> BridgeResult<()>;

    /// Wipe the library-owned session blob. Only called on fatal closures.
    async fn reset_session(&self) -> BridgeResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<WireEvent>;
}

// ── Call log (simulated client) ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum WireCall {
    Connect,
    Send { jid: Jid, text: String, reply_to: Option<String> },
    PresenceSubscribe(Jid),
    PresenceUpdate { kind: PresenceKind, jid: Option<Jid> },
    ReadMessages(Vec<String>),
    Logout,
    ResetSession,
}

// ── Simulated client ───────────────────────────────────────────────────────

/// Scripted wire client. `connect` emits Connecting and, unless pairing is
/// scripted, Open with a fixed identity. Tests drive everything else through
/// the `emit_*` helpers.
pub struct SimulatedWire {
    events: broadcast::Sender<WireEvent>,
    calls: Mutex<Vec<WireCall>>,
    fail_sends: AtomicBool,
    needs_pairing: AtomicBool,
    auto_open: AtomicBool,
    identity: WireIdentity,
}

impl SimulatedWire {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        SimulatedWire {
            events,
            calls: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            needs_pairing: AtomicBool::new(false),
            auto_open: AtomicBool::new(true),
            identity: WireIdentity {
                phone: Some("15550100000".into()),
                display_name: Some("Bridge".into()),
            },
        }
    }

    // ── Scripting knobs ────────────────────────────────────────────────────

    /// Make subsequent `send_message` calls fail at the protocol layer.
    pub fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    /// First `connect` emits AwaitingPairing with a QR payload instead of
    /// opening.
    pub fn require_pairing(&self, on: bool) {
        self.needs_pairing.store(on, Ordering::SeqCst);
    }

    /// Disable the automatic Open after Connecting (tests emit phases by
    /// hand).
    pub fn manual_phases(&self) {
        self.auto_open.store(false, Ordering::SeqCst);
    }

    pub fn emit_open(&self) {
        let _ = self.events.send(WireEvent::Connection {
            phase: WirePhase::Open,
            identity: Some(self.identity.clone()),
        });
    }

    pub fn emit_close(&self, disposition: CloseDisposition) {
        let _ = self.events.send(WireEvent::Connection {
            phase: WirePhase::Closed { disposition },
            identity: None,
        });
    }

    pub fn emit_inbound(&self, message: InboundMessage) {
        let _ = self.events.send(WireEvent::MessageUpsert(message));
    }

    pub fn emit_receipt(&self, message_id: &str, status: DeliveryStatus) {
        let _ = self.events.send(WireEvent::Receipt { message_id: message_id.to_string(), status });
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<WireCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: WireCall) {
        self.calls.lock().push(call);
    }
}

impl Default for SimulatedWire {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireClient for SimulatedWire {
    async fn connect(&self) -> BridgeResult<()> {
        self.record(WireCall::Connect);
        let _ = self
            .events
            .send(WireEvent::Connection { phase: WirePhase::Connecting, identity: None });
        if self.needs_pairing.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(WireEvent::Connection {
                phase: WirePhase::AwaitingPairing { qr: format!("sim-qr-{}", Uuid::new_v4()) },
                identity: None,
            });
        } else if self.auto_open.load(Ordering::SeqCst) {
            self.emit_open();
        }
        Ok(())
    }

    async fn send_message(
        &self,
        jid: &Jid,
        text: &str,
        reply_to: Option<&str>,
    ) -> BridgeResult<String> {
        self.record(WireCall::Send {
            jid: jid.clone(),
            text: text.to_string(),
            reply_to: reply_to.map(str::to_string),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::protocol("simulated delivery failure", true));
        }
        Ok(format!("sim-{}", Uuid::new_v4()))
    }

    async fn presence_subscribe(&self, jid: &Jid) -> BridgeResult<()> {
        self.record(WireCall::PresenceSubscribe(jid.clone()));
        Ok(())
    }

    async fn presence_update(&self, kind: PresenceKind, jid: Option<&Jid>) -> BridgeResult<()> {
        self.record(WireCall::PresenceUpdate { kind, jid: jid.cloned() });
        Ok(())
    }

    async fn read_messages(&self, message_ids: &[String]) -> BridgeResult<()> {
        self.record(WireCall::ReadMessages(message_ids.to_vec()));
        Ok(())
    }

    async fn logout(&self) -> BridgeResult<()> {
        self.record(WireCall::Logout);
        Ok(())
    }

    async fn reset_session(&self) -> BridgeResult<()> {
        self.record(WireCall::ResetSession);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WireEvent> {
        self.events.subscribe()
    }
}
