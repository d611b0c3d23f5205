// ── Bridge Atoms: Pure Data Types ──────────────────────────────────────────
// Plain struct/enum definitions plus the jid normalizer.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};

use crate::atoms::constants::*;
use crate::atoms::error::{BridgeError, BridgeResult};

// ── Jid ────────────────────────────────────────────────────────────────────

/// Canonical recipient identifier: `<digits>@s.whatsapp.net`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    /// Normalize any reasonable recipient spelling into a canonical jid.
    ///
    /// Accepts bare digits, `+`-prefixed international numbers with
    /// punctuation ("+1 (555) 010-2233"), and already-canonical jids.
    /// Anything after an `@` is discarded and rebuilt. Fewer than 8 digits
    /// is rejected — shorter strings are never valid phone numbers.
    pub fn normalize(input: &str) -> BridgeResult<Jid> {
        let local = input.split('@').next().unwrap_or_default();
        let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 8 {
            return Err(BridgeError::InvalidJid(input.to_string()));
        }
        Ok(Jid(format!("{}@s.whatsapp.net", digits)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare phone-number part.
    pub fn digits(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Account-age tier ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fresh,
    Warming,
    Mature,
}

impl Tier {
    /// weeks ≤ 1 ⇒ Fresh, 2–4 ⇒ Warming, ≥ 5 ⇒ Mature.
    pub fn from_weeks(weeks: u32) -> Tier {
        match weeks {
            0 | 1 => Tier::Fresh,
            2..=4 => Tier::Warming,
            _ => Tier::Mature,
        }
    }

    pub fn hourly_cap(self) -> u32 {
        match self {
            Tier::Fresh => FRESH_HOURLY_CAP,
            Tier::Warming => WARMING_HOURLY_CAP,
            Tier::Mature => MATURE_HOURLY_CAP,
        }
    }

    pub fn daily_cap(self) -> u32 {
        match self {
            Tier::Fresh => FRESH_DAILY_CAP,
            Tier::Warming => WARMING_DAILY_CAP,
            Tier::Mature => MATURE_DAILY_CAP,
        }
    }

    pub fn min_interval_ms(self) -> u64 {
        match self {
            Tier::Fresh => FRESH_MIN_INTERVAL_MS,
            Tier::Warming => WARMING_MIN_INTERVAL_MS,
            Tier::Mature => MATURE_MIN_INTERVAL_MS,
        }
    }

    /// Operator-facing description for status payloads.
    pub fn describe(self) -> String {
        format!(
            "{:?}: {}/hour, {}/day, {}s between messages",
            self,
            self.hourly_cap(),
            self.daily_cap(),
            self.min_interval_ms() / 1000
        )
    }
}

/// Which window denied a rate-limited send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RateScope {
    Hourly,
    Daily,
    Interval,
}

// ── Contact warmup ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStage {
    New,
    Warming,
    Warmed,
}

impl ContactStage {
    /// Daily ceiling for this stage; `None` means only global limits apply.
    pub fn per_day_ceiling(self) -> Option<u32> {
        match self {
            ContactStage::New => Some(NEW_CONTACT_DAILY_CEILING),
            ContactStage::Warming => Some(WARMING_CONTACT_DAILY_CEILING),
            ContactStage::Warmed => None,
        }
    }
}

// ── Risk events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskKind {
    DeliveryFailure,
    RateLimitHit,
    ConnectionDrop,
    RecipientBlock,
    SuspiciousLatency,
    /// Synthetic marker logged when hibernation engages. Weightless.
    HibernationStarted,
}

impl RiskKind {
    pub fn weight(self) -> f64 {
        match self {
            RiskKind::DeliveryFailure => WEIGHT_DELIVERY_FAILURE,
            RiskKind::RateLimitHit => WEIGHT_RATE_LIMIT_HIT,
            RiskKind::ConnectionDrop => WEIGHT_CONNECTION_DROP,
            RiskKind::RecipientBlock => WEIGHT_RECIPIENT_BLOCK,
            RiskKind::SuspiciousLatency => WEIGHT_SUSPICIOUS_LATENCY,
            RiskKind::HibernationStarted => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> RiskLevel {
        if score >= LEVEL_CRITICAL_AT {
            RiskLevel::Critical
        } else if score >= LEVEL_HIGH_AT {
            RiskLevel::High
        } else if score >= LEVEL_ELEVATED_AT {
            RiskLevel::Elevated
        } else {
            RiskLevel::Normal
        }
    }
}

// ── Connection lifecycle ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Open,
    ClosedRetrying,
    ClosedFatal,
}

/// Why the protocol library closed the session. Fatal dispositions require a
/// fresh pairing; everything else is retried with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseDisposition {
    LoggedOut,
    BadSession,
    ConnectionLost,
    ConnectionReplaced,
    TimedOut,
    RestartRequired,
    Unknown,
}

impl CloseDisposition {
    pub fn is_fatal(self) -> bool {
        matches!(self, CloseDisposition::LoggedOut | CloseDisposition::BadSession)
    }
}

// ── Presence ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Available,
    Unavailable,
    Composing,
    Paused,
}

// ── Wire-facing payloads ───────────────────────────────────────────────────

/// Phone-side identity reported by the protocol library once the session
/// opens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireIdentity {
    pub phone: Option<String>,
    pub display_name: Option<String>,
}

/// Inbound message event handed to the webhook collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: Jid,
    pub text: String,
    pub message_id: String,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<String>,
}

/// Delivery status reported for a previously sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Delivered,
    Read,
    Failed,
}

/// Successful pipeline result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
}

// ── Status snapshots (§6.1 payloads) ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub tier: Tier,
    pub tier_description: String,
    pub hourly_used: u32,
    pub hourly_cap: u32,
    pub daily_used: u32,
    pub daily_cap: u32,
    /// Milliseconds until the oldest hourly entry ages out (0 when under cap).
    pub hourly_reset_ms: u64,
    pub daily_reset_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupSummary {
    pub total_contacts: usize,
    pub new_contacts: usize,
    pub warming_contacts: usize,
    pub warmed_contacts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanWarningStatus {
    pub score: f64,
    pub level: RiskLevel,
    pub hibernating: bool,
    pub recommendation: String,
    /// Milliseconds remaining before a manual exit is honored (0 once open).
    pub hibernation_remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connection: ConnectionState,
    pub phone: Option<String>,
    pub display_name: Option<String>,
    pub uptime_ms: u64,
    pub sent_total: u64,
    pub received_total: u64,
    pub response_ratio: f64,
    pub mean_response_ms: Option<u64>,
    pub risk_level: RiskLevel,
    pub hibernating: bool,
    pub reconnect_attempts: u32,
    pub warmup: WarmupSummary,
    /// Latest pairing QR payload, present only while AWAITING_PAIRING.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jid_normalize_forms() {
        let canonical = "15550102233@s.whatsapp.net";
        assert_eq!(Jid::normalize("15550102233").unwrap().as_str(), canonical);
        assert_eq!(Jid::normalize("+1 (555) 010-2233").unwrap().as_str(), canonical);
        assert_eq!(Jid::normalize("15550102233@s.whatsapp.net").unwrap().as_str(), canonical);
        assert_eq!(Jid::normalize("15550102233@g.us").unwrap().as_str(), canonical);
    }

    #[test]
    fn test_jid_rejects_short() {
        assert!(Jid::normalize("1234567").is_err());
        assert!(Jid::normalize("").is_err());
        assert!(Jid::normalize("hello").is_err());
    }

    #[test]
    fn test_tier_mapping() {
        assert_eq!(Tier::from_weeks(0), Tier::Fresh);
        assert_eq!(Tier::from_weeks(1), Tier::Fresh);
        assert_eq!(Tier::from_weeks(2), Tier::Warming);
        assert_eq!(Tier::from_weeks(4), Tier::Warming);
        assert_eq!(Tier::from_weeks(5), Tier::Mature);
        assert_eq!(Tier::from_weeks(52), Tier::Mature);
    }

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Normal);
        assert_eq!(RiskLevel::from_score(29.9), RiskLevel::Normal);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Elevated);
        assert_eq!(RiskLevel::from_score(60.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80.0), RiskLevel::Critical);
    }

    #[test]
    fn test_fatal_dispositions() {
        assert!(CloseDisposition::LoggedOut.is_fatal());
        assert!(CloseDisposition::BadSession.is_fatal());
        assert!(!CloseDisposition::ConnectionLost.is_fatal());
        assert!(!CloseDisposition::TimedOut.is_fatal());
    }
}
