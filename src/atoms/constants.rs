// ── Bridge Atoms: Constants ────────────────────────────────────────────────
// All named constants for the crate live here.
// Collecting them in one place eliminates magic numbers and makes the
// anti-ban policy auditable at a glance.

// ── Account-age tiers ──────────────────────────────────────────────────────
// (hourly cap, daily cap, minimum interval between sends)

pub const FRESH_HOURLY_CAP: u32 = 5;
pub const FRESH_DAILY_CAP: u32 = 15;
pub const FRESH_MIN_INTERVAL_MS: u64 = 180_000;

pub const WARMING_HOURLY_CAP: u32 = 15;
pub const WARMING_DAILY_CAP: u32 = 40;
pub const WARMING_MIN_INTERVAL_MS: u64 = 90_000;

pub const MATURE_HOURLY_CAP: u32 = 30;
pub const MATURE_DAILY_CAP: u32 = 150;
pub const MATURE_MIN_INTERVAL_MS: u64 = 30_000;

/// Sliding windows the rate limiter counts over.
pub const HOUR_MS: u64 = 3_600_000;
pub const DAY_MS: u64 = 86_400_000;

/// Added on top of an INTERVAL denial's wait: ±50% around this base.
pub const INTERVAL_JITTER_BASE_MS: u64 = 1_000;

// ── Contact warmup ─────────────────────────────────────────────────────────

/// A contact is NEW for its first 72 hours, WARMING until a full week.
pub const CONTACT_NEW_MS: u64 = 72 * 3_600_000;
pub const CONTACT_WARMING_MS: u64 = 168 * 3_600_000;

pub const NEW_CONTACT_DAILY_CEILING: u32 = 3;
pub const WARMING_CONTACT_DAILY_CEILING: u32 = 10;

// ── Risk scoring ───────────────────────────────────────────────────────────
// Weighted events decay linearly to zero over 24 hours.

pub const RISK_RETENTION_MS: u64 = DAY_MS;

pub const WEIGHT_DELIVERY_FAILURE: f64 = 20.0;
pub const WEIGHT_RATE_LIMIT_HIT: f64 = 10.0;
pub const WEIGHT_CONNECTION_DROP: f64 = 8.0;
pub const WEIGHT_RECIPIENT_BLOCK: f64 = 35.0;
pub const WEIGHT_SUSPICIOUS_LATENCY: f64 = 5.0;

pub const LEVEL_ELEVATED_AT: f64 = 30.0;
pub const LEVEL_HIGH_AT: f64 = 60.0;
pub const LEVEL_CRITICAL_AT: f64 = 80.0;

/// Two delivery failures inside this window force level to at least HIGH.
pub const FAST_PATH_WINDOW_MS: u64 = 5 * 60_000;

/// Auto-hibernation holds the pipeline closed for at least this long.
pub const HIBERNATION_MIN_MS: u64 = 30 * 60_000;

// ── Message variation ──────────────────────────────────────────────────────

/// Recent-output ring depth per recipient.
pub const VARIATOR_RING: usize = 8;

pub const EMOJI_CATALOG: &[&str] = &["🙂", "👍", "😊", "🙌", "✨"];

/// Greeting prefixes considered interchangeable (matched case-insensitively).
pub const GREETING_PREFIXES: &[&str] = &["hello", "hi", "hey", "hi there"];

// ── Typing / read simulation ───────────────────────────────────────────────

pub const TYPING_MS_PER_CHAR_LO: f64 = 35.0;
pub const TYPING_MS_PER_CHAR_HI: f64 = 65.0;
pub const TYPING_MIN_MS: u64 = 1_000;
pub const TYPING_MAX_MS: u64 = 6_000;

pub const THINKING_FLOOR_MS: u64 = 250;
pub const THINKING_CEIL_MS: u64 = 4_000;

pub const READ_MS_PER_WORD: u64 = 300;
pub const READ_FLOOR_MS: u64 = 500;
pub const READ_CEIL_MS: u64 = 15_000;

// ── Reconnection ───────────────────────────────────────────────────────────

pub const RECONNECT_INITIAL_MS: u64 = 1_000;
pub const RECONNECT_CAP_MS: u64 = 300_000;
/// After this many consecutive failed attempts, surface GIVE_UP but keep
/// trying at the capped delay.
pub const RECONNECT_GIVE_UP_AFTER: u32 = 15;

/// Jitter added to each backoff delay: 30%–50% of the nominal.
pub const RECONNECT_JITTER_LO: f64 = 0.30;
pub const RECONNECT_JITTER_HI: f64 = 0.50;

// ── Presence cycling ───────────────────────────────────────────────────────

pub const PRESENCE_ONLINE_MIN_S: u64 = 5 * 60;
pub const PRESENCE_ONLINE_MAX_S: u64 = 45 * 60;
pub const PRESENCE_OFFLINE_MIN_S: u64 = 2 * 60;
pub const PRESENCE_OFFLINE_MAX_S: u64 = 15 * 60;

// ── Send pipeline ──────────────────────────────────────────────────────────

pub const DEFAULT_SEND_CONCURRENCY: usize = 4;

/// INTERVAL denials below this wait are absorbed inside the pipeline (one
/// internal wait-and-retry); everything else fails fast to the caller.
pub const INTERNAL_WAIT_CEILING_MS: u64 = 30_000;

pub const DEFAULT_MESSAGE_DELAY_BASE_MS: u64 = 100;
pub const HESITATION_BASE_MS: u64 = 300;
pub const SETTLE_BASE_MS: u64 = 200;

// ── Delivery latency watch ─────────────────────────────────────────────────

/// A sent message with no DELIVERED/READ receipt after this long counts as
/// suspicious latency.
pub const DELIVERY_TIMEOUT_MS: u64 = 10 * 60_000;
pub const DELIVERY_SWEEP_INTERVAL_MS: u64 = 60_000;

/// An inbound message within this long of our last outbound to the same jid
/// counts as a response-time sample.
pub const RESPONSE_SAMPLE_WINDOW_MS: u64 = 30 * 60_000;
pub const RESPONSE_SAMPLE_RING: usize = 64;

// ── Fingerprint rotation ───────────────────────────────────────────────────

pub const FINGERPRINT_ROTATE_MIN_MS: u64 = 24 * 3_600_000;
pub const FINGERPRINT_ROTATE_MAX_MS: u64 = 48 * 3_600_000;

/// Identity presented to existing sessions created before rotation existed.
pub const LEGACY_FINGERPRINT: (&str, &str, &str) = ("Ubuntu", "Chrome", "114.0.5735.90");

/// Plausible desktop client identities the store rotates between.
pub const FINGERPRINT_CATALOG: &[(&str, &str, &str)] = &[
    ("Windows", "Chrome", "120.0.6099.109"),
    ("Windows", "Edge", "120.0.2210.91"),
    ("Windows", "Firefox", "121.0"),
    ("Mac OS", "Safari", "17.2"),
    ("Mac OS", "Chrome", "120.0.6099.71"),
    ("Ubuntu", "Chrome", "119.0.6045.159"),
    ("Ubuntu", "Firefox", "120.0.1"),
    ("Fedora", "Firefox", "121.0"),
];

// ── Persistence ────────────────────────────────────────────────────────────

/// Current on-disk format version. Files with any other `v` are reset.
pub const STATE_FORMAT_VERSION: u32 = 1;

pub const FILE_FINGERPRINT: &str = "fingerprint.json";
pub const FILE_RATE_LIMITS: &str = "rate-limits.json";
pub const FILE_CONTACTS: &str = "contacts.json";
pub const FILE_RISK_EVENTS: &str = "risk-events.json";
pub const FILE_ACTIVITY: &str = "activity.json";

pub const FLUSH_INTERVAL_MS: u64 = 60_000;
