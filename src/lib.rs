// wabridge — library entry point.
// Headless WhatsApp bridge core: human-cadence send pipeline, ban-risk
// scoring with hibernation, contact warmup, fingerprint rotation, and a
// supervised reconnecting session over a pluggable wire client.
//
// An embedder constructs a `Core` from a `BridgeConfig`, a clock, a
// randomness handle, and a `WireClient` implementation, then fronts it with
// whatever transport it likes (the dev binary just runs the simulated wire).

// ── Bridge Atoms (constants, error and data types) ─────────────────────────
pub mod atoms;

// ── Bridge Engine ──────────────────────────────────────────────────────────
pub mod engine;

// ── Public surface ─────────────────────────────────────────────────────────

pub use atoms::error::{BridgeError, BridgeResult};
pub use atoms::types::{
    BanWarningStatus, CloseDisposition, ConnectionState, ContactStage, DeliveryStatus,
    InboundMessage, Jid, PresenceKind, RateLimitStatus, RateScope, RiskKind, RiskLevel,
    SendReceipt, StatusSnapshot, Tier, WarmupSummary, WireIdentity,
};
pub use engine::clock::{Clock, ManualClock, Randomness, SystemClock};
pub use engine::config::BridgeConfig;
pub use engine::core::Core;
pub use engine::fingerprint::FingerprintRecord;
pub use engine::wire::{SimulatedWire, WireClient, WireEvent, WirePhase};
