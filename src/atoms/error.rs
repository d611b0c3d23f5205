// ── Bridge Atoms: Error Types ──────────────────────────────────────────────
// Single canonical error enum for the bridge core, built with `thiserror`.
//
// Design rules:
//   • Caller-visible variants mirror the send-pipeline contract exactly
//     (InvalidJid, NotConnected, Hibernating, WarmupLimit, RateLimited,
//     Canceled, Protocol). Infrastructure variants are coarse-grained.
//   • The `#[from]` attribute wires std/external error conversions.
//   • Every variant maps to a stable machine code via `code()` so the HTTP
//     router above us can build structured responses without string matching.
//   • No variant carries session key material in its message.

use thiserror::Error;

use crate::atoms::types::RateScope;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Recipient identifier could not be normalized to a canonical jid.
    #[error("invalid jid: {0}")]
    InvalidJid(String),

    /// The wire session is not OPEN; nothing can be sent.
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// The ban warning system has latched the pipeline closed.
    #[error("hibernating: outbound sending is paused")]
    Hibernating,

    /// Per-recipient warmup ceiling reached for this 24h window.
    #[error("warmup limit reached for {jid} ({per_day_remaining} remaining today)")]
    WarmupLimit { jid: String, per_day_remaining: u32 },

    /// Global rate limit denied the send. `wait_ms` is how long until the
    /// earliest moment the same request could be admitted.
    #[error("rate limited ({scope:?}): retry in {wait_ms}ms")]
    RateLimited { scope: RateScope, wait_ms: u64 },

    /// The per-request deadline or a shutdown signal fired before the
    /// protocol call. No counters were mutated.
    #[error("send canceled before dispatch")]
    Canceled,

    /// The protocol library failed the operation.
    #[error("protocol error: {message}")]
    Protocol { message: String, retryable: bool },

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bridge configuration is invalid or missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Machine codes ──────────────────────────────────────────────────────────

impl BridgeError {
    /// Stable machine-readable code for structured error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidJid(_) => "INVALID_JID",
            BridgeError::NotConnected => "NOT_CONNECTED",
            BridgeError::Hibernating => "HIBERNATING",
            BridgeError::WarmupLimit { .. } => "WARMUP_LIMIT",
            BridgeError::RateLimited { .. } => "RATE_LIMITED",
            BridgeError::Canceled => "CANCELED",
            BridgeError::Protocol { .. } => "PROTOCOL_ERROR",
            BridgeError::Io(_) => "IO",
            BridgeError::Serialization(_) => "SERIALIZATION",
            BridgeError::Config(_) => "CONFIG",
            BridgeError::Other(_) => "INTERNAL",
        }
    }

    /// Create a protocol error, marking whether the caller may retry.
    pub fn protocol(message: impl Into<String>, retryable: bool) -> Self {
        Self::Protocol { message: message.into(), retryable }
    }
}

// ── Migration bridge: String → BridgeError ─────────────────────────────────
// Allows `?` on helpers still returning `Result<T, String>`.

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Other(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All bridge operations should return this type.
pub type BridgeResult<T> = Result<T, BridgeError>;
