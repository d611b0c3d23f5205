// ── Bridge Engine: Session Supervisor ──────────────────────────────────────
// Owns the wire client handle for the life of the process. Consumes the
// protocol event stream and drives the connection state machine:
//
//   DISCONNECTED → CONNECTING → (AWAITING_PAIRING) → OPEN
//   OPEN → CLOSED_RETRYING → CONNECTING     (backoff, CONNECTION_DROP event)
//   OPEN → CLOSED_FATAL                     (session wiped, manual re-pair)
//
// Retryable closures reconnect on the jittered exponential schedule; after
// 15 straight failures a GIVE_UP status is surfaced while attempts continue
// at the capped delay. LOGGED_OUT and BAD_SESSION wipe the session blob and
// park the machine until an operator asks for a reconnect.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::atoms::error::BridgeResult;
use crate::atoms::types::{ConnectionState, RiskKind, WireIdentity};
use crate::engine::ban_warning::BanWarningSystem;
use crate::engine::clock::{Clock, Randomness};
use crate::engine::receive::ReceivePath;
use crate::engine::reconnect::{ReconnectConfig, ReconnectSchedule};
use crate::engine::wire::{WireClient, WireEvent, WirePhase};

pub struct SessionSupervisor {
    clock: Arc<dyn Clock>,
    wire: Arc<dyn WireClient>,
    ban: Arc<BanWarningSystem>,
    receive: Arc<ReceivePath>,
    conn_tx: watch::Sender<ConnectionState>,
    schedule: Mutex<ReconnectSchedule>,
    identity: Mutex<WireIdentity>,
    qr: Mutex<Option<String>>,
    opened_at: Mutex<Option<u64>>,
    gave_up: AtomicBool,
}

impl SessionSupervisor {
    pub fn new(
        clock: Arc<dyn Clock>,
        rng: Randomness,
        wire: Arc<dyn WireClient>,
        ban: Arc<BanWarningSystem>,
        receive: Arc<ReceivePath>,
        reconnect: ReconnectConfig,
    ) -> Arc<Self> {
        let (conn_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(SessionSupervisor {
            clock,
            wire,
            ban,
            receive,
            conn_tx,
            schedule: Mutex::new(ReconnectSchedule::new(reconnect, rng)),
            identity: Mutex::new(WireIdentity::default()),
            qr: Mutex::new(None),
            opened_at: Mutex::new(None),
            gave_up: AtomicBool::new(false),
        })
    }

    // ── Observers ──────────────────────────────────────────────────────────

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.conn_tx.borrow()
    }

    pub fn identity(&self) -> WireIdentity {
        self.identity.lock().clone()
    }

    pub fn qr_code(&self) -> Option<String> {
        self.qr.lock().clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.schedule.lock().attempts()
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up.load(Ordering::Relaxed)
    }

    /// Milliseconds since the session last opened; 0 while closed.
    pub fn session_uptime_ms(&self) -> u64 {
        match (*self.opened_at.lock(), self.state()) {
            (Some(at), ConnectionState::Open) => self.clock.now_ms().saturating_sub(at),
            _ => 0,
        }
    }

    /// Operator request: start connecting. A no-op while already OPEN.
    pub async fn request_reconnect(&self) -> BridgeResult<()> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }
        info!("[supervisor] reconnect requested");
        self.schedule.lock().reset();
        self.gave_up.store(false, Ordering::Relaxed);
        let _ = self.conn_tx.send(ConnectionState::Connecting);
        self.wire.connect().await
    }

    // ── Main loop ──────────────────────────────────────────────────────────

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.wire.subscribe();

        let _ = self.conn_tx.send(ConnectionState::Connecting);
        if let Err(e) = self.wire.connect().await {
            error!("[supervisor] initial connect failed: {}", e);
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event, &mut shutdown).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[supervisor] event stream lagged, {} dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("[supervisor] wire event stream closed");
                        break;
                    }
                },
            }
        }

        let _ = self.conn_tx.send(ConnectionState::Disconnected);
        info!("[supervisor] stopped");
    }

    async fn handle_event(&self, event: WireEvent, shutdown: &mut watch::Receiver<bool>) {
        match event {
            WireEvent::Connection { phase, identity } => {
                self.handle_connection(phase, identity, shutdown).await
            }
            WireEvent::MessageUpsert(message) => {
                let receive = self.receive.clone();
                tokio::spawn(async move { receive.handle_inbound(message).await });
            }
            WireEvent::Receipt { message_id, status } => {
                self.receive.handle_receipt(&message_id, status);
            }
        }
    }

    async fn handle_connection(
        &self,
        phase: WirePhase,
        identity: Option<WireIdentity>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        match phase {
            WirePhase::Connecting => {
                let _ = self.conn_tx.send(ConnectionState::Connecting);
            }
            WirePhase::AwaitingPairing { qr } => {
                info!("[supervisor] pairing required — QR ready");
                *self.qr.lock() = Some(qr);
                let _ = self.conn_tx.send(ConnectionState::AwaitingPairing);
            }
            WirePhase::Open => {
                if let Some(identity) = identity {
                    *self.identity.lock() = identity;
                }
                *self.qr.lock() = None;
                *self.opened_at.lock() = Some(self.clock.now_ms());
                self.schedule.lock().reset();
                self.gave_up.store(false, Ordering::Relaxed);
                let _ = self.conn_tx.send(ConnectionState::Open);
                info!("[supervisor] session open");
            }
            WirePhase::Closed { disposition } => {
                if disposition.is_fatal() {
                    error!(
                        "[supervisor] fatal closure ({:?}) — wiping session, manual re-pair required",
                        disposition
                    );
                    if let Err(e) = self.wire.reset_session().await {
                        error!("[supervisor] session wipe failed: {}", e);
                    }
                    *self.opened_at.lock() = None;
                    let _ = self.conn_tx.send(ConnectionState::ClosedFatal);
                    return;
                }

                self.ban.record(RiskKind::ConnectionDrop);
                *self.opened_at.lock() = None;
                let _ = self.conn_tx.send(ConnectionState::ClosedRetrying);

                let (delay, attempts, gave_up) = {
                    let mut schedule = self.schedule.lock();
                    let delay = schedule.next_delay();
                    (delay, schedule.attempts(), schedule.gave_up())
                };
                if gave_up && !self.gave_up.swap(true, Ordering::Relaxed) {
                    warn!(
                        "[supervisor] {} straight failures — giving up status, still retrying at cap",
                        attempts
                    );
                }
                warn!(
                    "[supervisor] closed ({:?}) — reconnecting in {}ms (attempt {})",
                    disposition,
                    delay.as_millis(),
                    attempts
                );

                tokio::select! {
                    _ = self.clock.sleep(delay) => {
                        let _ = self.conn_tx.send(ConnectionState::Connecting);
                        if let Err(e) = self.wire.connect().await {
                            error!("[supervisor] reconnect failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}
