// ── Bridge Engine: Message Variator ────────────────────────────────────────
// Per-recipient recent-output history. Sending identical text to the same
// contact repeatedly is the cheapest bot signal there is, so when a draft
// matches anything in the recipient's ring of the last 8 messages we produce
// a lexically varied surface form instead:
//
//   • append or strip a trailing emoji from a small fixed catalog
//   • swap the greeting prefix (hello / hi / hey / hi there)
//   • adjust final punctuation (`.` / `!` / none)
//
// The variant must differ from the draft AND from everything in the ring.
// When no candidate satisfies both, the draft goes out unchanged and the
// caller records the anomaly (suspicious-latency event) to surface it.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::atoms::constants::*;
use crate::atoms::types::Jid;
use crate::engine::clock::Randomness;

// ── Outcome ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariatorOutcome {
    /// Draft repeats nothing recent — send as-is.
    Unchanged,
    /// Draft repeated recent output; send this variant instead.
    Varied(String),
    /// Draft repeats and every candidate is also burned. Send the original
    /// and record the anomaly.
    Exhausted,
}

// ── Variator ───────────────────────────────────────────────────────────────

pub struct MessageVariator {
    rng: Randomness,
    rings: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MessageVariator {
    pub fn new(rng: Randomness) -> Self {
        MessageVariator { rng, rings: Mutex::new(HashMap::new()) }
    }

    pub fn vary(&self, jid: &Jid, text: &str) -> VariatorOutcome {
        let rings = self.rings.lock();
        let ring = match rings.get(jid.as_str()) {
            Some(r) => r,
            None => return VariatorOutcome::Unchanged,
        };
        let repeats = ring.iter().any(|prev| prev.eq_ignore_ascii_case(text));
        if !repeats {
            return VariatorOutcome::Unchanged;
        }

        let mut candidates = Self::candidates(text);
        candidates.retain(|c| {
            !c.eq_ignore_ascii_case(text) && !ring.iter().any(|prev| prev.eq_ignore_ascii_case(c))
        });
        if candidates.is_empty() {
            return VariatorOutcome::Exhausted;
        }
        let pick = self.rng.pick(&candidates).clone();
        VariatorOutcome::Varied(pick)
    }

    /// Remember what actually went out, post-variation.
    pub fn record_sent(&self, jid: &Jid, text: &str) {
        let mut rings = self.rings.lock();
        let ring = rings.entry(jid.as_str().to_string()).or_default();
        if ring.len() >= VARIATOR_RING {
            ring.pop_front();
        }
        ring.push_back(text.to_string());
    }

    // ── Candidate generation ───────────────────────────────────────────────

    fn candidates(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let trimmed = text.trim_end();

        // Trailing emoji: strip if present, otherwise offer each append.
        let mut stripped = None;
        for emoji in EMOJI_CATALOG {
            if let Some(base) = trimmed.strip_suffix(emoji) {
                stripped = Some(base.trim_end().to_string());
            }
        }
        match stripped {
            Some(base) => out.push(base),
            None => {
                for emoji in EMOJI_CATALOG {
                    out.push(format!("{} {}", trimmed, emoji));
                }
            }
        }

        // Greeting prefix swap, preserving leading capitalization.
        let lower = trimmed.to_lowercase();
        for prefix in GREETING_PREFIXES {
            if lower.starts_with(prefix) {
                let rest = &trimmed[prefix.len()..];
                let capitalized = trimmed.chars().next().is_some_and(|c| c.is_uppercase());
                for replacement in GREETING_PREFIXES {
                    if replacement == prefix {
                        continue;
                    }
                    let head = if capitalized {
                        let mut chars = replacement.chars();
                        match chars.next() {
                            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                            None => String::new(),
                        }
                    } else {
                        replacement.to_string()
                    };
                    out.push(format!("{}{}", head, rest));
                }
                break;
            }
        }

        // Final punctuation.
        if let Some(base) = trimmed.strip_suffix('.') {
            out.push(format!("{}!", base));
            out.push(base.to_string());
        } else if let Some(base) = trimmed.strip_suffix('!') {
            out.push(format!("{}.", base));
            out.push(base.to_string());
        } else if !trimmed.is_empty() && trimmed.chars().last().is_some_and(|c| c.is_alphanumeric())
        {
            out.push(format!("{}.", trimmed));
            out.push(format!("{}!", trimmed));
        }

        out
    }
}
