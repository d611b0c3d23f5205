// ── Bridge Engine: Core ────────────────────────────────────────────────────
// The one value constructed at startup and handed to every collaborator:
// the HTTP router calls the operation methods, the supervisor and the
// protocol event handlers run as background tasks owned here.
//
// Construction wires the component graph (clock/rng → stores → gates →
// pipeline → supervisor); `start()` spawns the background tasks (session
// supervisor, presence cycler, persistence flush, delivery sweep);
// `shutdown()` signals them, runs a final flush, and waits.
//
// Background maintenance (flush, sweep) ticks on real time; everything
// behavioral (delays, windows, decay) runs on the injected Clock.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::atoms::constants::*;
use crate::atoms::error::BridgeResult;
use crate::atoms::types::{
    BanWarningStatus, RateLimitStatus, RiskKind, SendReceipt, StatusSnapshot,
};
use crate::engine::activity::ActivityTracker;
use crate::engine::ban_warning::BanWarningSystem;
use crate::engine::clock::{Clock, Randomness};
use crate::engine::config::BridgeConfig;
use crate::engine::fingerprint::{FingerprintRecord, FingerprintStore};
use crate::engine::persist::{default_state_dir, StateDir};
use crate::engine::pipeline::SendPipeline;
use crate::engine::presence::PresenceCycler;
use crate::engine::rate_limit::RateLimiter;
use crate::engine::receive::{DeliveryLedger, MessageCallback, ReceivePath};
use crate::engine::reconnect::ReconnectConfig;
use crate::engine::supervisor::SessionSupervisor;
use crate::engine::variator::MessageVariator;
use crate::engine::warmup::WarmupRegistry;
use crate::engine::wire::WireClient;

pub struct Core {
    config: BridgeConfig,
    fingerprint: FingerprintStore,
    rate: Arc<RateLimiter>,
    warmup: Arc<WarmupRegistry>,
    ban: Arc<BanWarningSystem>,
    activity: Arc<ActivityTracker>,
    ledger: Arc<DeliveryLedger>,
    receive: Arc<ReceivePath>,
    supervisor: Arc<SessionSupervisor>,
    presence: Arc<PresenceCycler>,
    pipeline: SendPipeline,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    pub fn new(
        config: BridgeConfig,
        clock: Arc<dyn Clock>,
        rng: Randomness,
        wire: Arc<dyn WireClient>,
    ) -> BridgeResult<Arc<Core>> {
        config.validate()?;
        let state_dir = config.state_dir.clone().unwrap_or_else(default_state_dir);
        let store = Arc::new(StateDir::open(&state_dir)?);
        info!("[core] state directory: {}", store.root().display());

        let fingerprint = FingerprintStore::new(clock.clone(), rng.clone(), store.clone());
        let rate = Arc::new(RateLimiter::new(
            clock.clone(),
            rng.clone(),
            store.clone(),
            config.account_age_weeks,
        ));
        let warmup = Arc::new(WarmupRegistry::new(clock.clone(), store.clone()));
        let ban = Arc::new(BanWarningSystem::new(clock.clone(), store.clone()));
        let variator = Arc::new(MessageVariator::new(rng.clone()));
        let activity = Arc::new(ActivityTracker::new(clock.clone(), store));
        let ledger = DeliveryLedger::new(clock.clone());

        let receive = ReceivePath::new(
            clock.clone(),
            rng.clone(),
            wire.clone(),
            activity.clone(),
            ban.clone(),
            ledger.clone(),
        );

        let reconnect = ReconnectConfig {
            initial_ms: config.reconnect.initial_ms,
            cap_ms: config.reconnect.cap_ms,
            give_up_after: config.reconnect.give_up_after,
        };
        let supervisor = SessionSupervisor::new(
            clock.clone(),
            rng.clone(),
            wire.clone(),
            ban.clone(),
            receive.clone(),
            reconnect,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ban_for_cycler = ban.clone();
        let presence = PresenceCycler::new(
            clock.clone(),
            rng.clone(),
            wire.clone(),
            config.clone(),
            supervisor.subscribe_state(),
            Arc::new(move || !ban_for_cycler.admit()),
        );

        let pipeline = SendPipeline::new(
            clock,
            rng,
            wire,
            rate.clone(),
            warmup.clone(),
            ban.clone(),
            variator,
            activity.clone(),
            ledger.clone(),
            supervisor.subscribe_state(),
            shutdown_rx,
            config.send_concurrency,
            config.message_delay_base_ms,
            config.typing_delay_base_ms,
        );

        Ok(Arc::new(Core {
            config,
            fingerprint,
            rate,
            warmup,
            ban,
            activity,
            ledger,
            receive,
            supervisor,
            presence,
            pipeline,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the background tasks. Call once after `new`.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        tasks.push(tokio::spawn(
            self.supervisor.clone().run(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.presence.clone().run(self.shutdown_tx.subscribe()),
        ));

        // Persistence flush, real-time cadence.
        let core = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(FLUSH_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = tick.tick() => core.flush(),
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        }));

        // Delivery-latency sweep.
        let core = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(DELIVERY_SWEEP_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = tick.tick() => core.ledger.sweep(&core.ban),
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        }));

        info!("[core] background tasks started");
    }

    /// Signal every task, run a final flush, and wait for them to exit.
    pub async fn shutdown(&self) {
        info!("[core] shutting down");
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.flush();
    }

    fn flush(&self) {
        self.rate.persist();
        self.warmup.persist();
        self.activity.persist();
        self.ban.persist();
    }

    // ── §6.1 operations ────────────────────────────────────────────────────

    pub async fn send(
        &self,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> BridgeResult<SendReceipt> {
        self.pipeline.send(to, text, reply_to, None).await
    }

    /// `send` with an absolute deadline on the bridge clock.
    pub async fn send_with_deadline(
        &self,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
        deadline_ms: u64,
    ) -> BridgeResult<SendReceipt> {
        self.pipeline.send(to, text, reply_to, Some(deadline_ms)).await
    }

    pub fn status(&self) -> StatusSnapshot {
        let identity = self.supervisor.identity();
        let ban = self.ban.status();
        let (sent_total, received_total) = self.activity.totals();
        StatusSnapshot {
            connection: self.supervisor.state(),
            phone: identity.phone,
            display_name: identity.display_name,
            uptime_ms: self.supervisor.session_uptime_ms(),
            sent_total,
            received_total,
            response_ratio: self.activity.response_ratio(),
            mean_response_ms: self.activity.mean_response_ms(),
            risk_level: ban.level,
            hibernating: ban.hibernating,
            reconnect_attempts: self.supervisor.reconnect_attempts(),
            warmup: self.warmup.summary(),
            qr_code: self.supervisor.qr_code(),
        }
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.rate.status()
    }

    /// Returns the new tier description.
    pub fn set_account_age(&self, weeks: u32) -> String {
        self.rate.set_account_age(weeks).describe()
    }

    pub async fn reconnect(&self) -> BridgeResult<()> {
        self.supervisor.request_reconnect().await
    }

    pub fn ban_warning_status(&self) -> BanWarningStatus {
        self.ban.status()
    }

    pub fn enter_hibernation(&self, minimum_ms: u64) {
        self.ban.enter_hibernation(minimum_ms);
    }

    pub fn exit_hibernation(&self) -> BridgeResult<()> {
        self.ban.exit_hibernation()
    }

    pub fn reset_ban_warning(&self) {
        self.ban.reset();
    }

    pub async fn presence_override(&self, online: bool) {
        self.presence.set_override(online).await;
    }

    /// Release a presence override. The pinned state holds until the
    /// interrupted phase's boundary, then natural cycling resumes.
    pub fn clear_presence_override(&self) {
        self.presence.clear_override();
    }

    /// Register the upstream webhook collaborator for inbound messages.
    pub fn on_message(&self, callback: MessageCallback) {
        self.receive.set_callback(callback);
    }

    /// Device identity to present at connection time.
    pub fn fingerprint(&self) -> FingerprintRecord {
        self.fingerprint.get()
    }

    /// Report an adverse signal observed by a collaborator (e.g. the
    /// upstream app learning a recipient blocked this account).
    pub fn record_risk(&self, kind: RiskKind) {
        self.ban.record(kind);
    }

    // ── Component access for embedders and tests ───────────────────────────

    pub fn supervisor(&self) -> Arc<SessionSupervisor> {
        self.supervisor.clone()
    }

    pub fn sweep_deliveries(&self) {
        self.ledger.sweep(&self.ban);
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
